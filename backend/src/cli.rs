//! Command-line arguments of the `formboard` binary.

use clap::{Parser, Subcommand};
use serde_json::Value;

use formboard::domain::reaction::{
    ActorId, ReactionKind, ReactionTarget, ReactionToggle, ToggleIntent,
};
use formboard::domain::user_record::{Attributes, Email, NewUserRecord, RecordId, RecordPatch};

/// `formboard` command arguments.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "formboard",
    about = "Apply lock-protected mutations to board users and reactions",
    version
)]
pub struct CliArgs {
    /// Mutation to apply.
    #[command(subcommand)]
    pub command: Command,
}

/// One mutation.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Create a user unless the email is already registered.
    CreateUser {
        /// Email the record is unique by.
        #[arg(long, value_parser = parse_email)]
        email: Email,
        /// Explicit record id; generated when omitted.
        #[arg(long, value_parser = parse_record_id)]
        id: Option<RecordId>,
        /// Create the record deactivated.
        #[arg(long)]
        inactive: bool,
        /// Initial attributes as a JSON object.
        #[arg(long, value_name = "json", value_parser = parse_attributes)]
        attributes: Option<Attributes>,
    },
    /// Merge changes into an existing user.
    UpdateUser {
        /// Record to change.
        #[arg(long, value_parser = parse_record_id)]
        id: RecordId,
        /// Replacement email.
        #[arg(long, value_parser = parse_email)]
        email: Option<Email>,
        /// Replacement activity flag.
        #[arg(long)]
        active: Option<bool>,
        /// Attribute merge patch as a JSON object; `null` removes a key.
        #[arg(long, value_name = "json", value_parser = parse_attributes)]
        attributes: Option<Attributes>,
    },
    /// Soft-delete a user.
    DeactivateUser {
        /// Record to deactivate.
        #[arg(long, value_parser = parse_record_id)]
        id: RecordId,
    },
    /// Add, remove or flip one reaction on a board row.
    ToggleReaction {
        /// Sheet holding the row; the configured board sheet when omitted.
        #[arg(long)]
        sheet: Option<String>,
        /// 1-based row number below the header row.
        #[arg(long)]
        row: u32,
        /// Reaction kind (`UNDERSTAND`, `LIKE` or `CURIOUS`).
        #[arg(long)]
        kind: ReactionKind,
        /// Reacting participant.
        #[arg(long, value_parser = parse_actor)]
        actor: ActorId,
        /// `add`, `remove` or `flip`.
        #[arg(long, default_value = "flip")]
        intent: ToggleIntent,
    },
}

impl Command {
    /// Input for create-if-absent; `None` for other commands.
    pub fn new_record(&self) -> Option<NewUserRecord> {
        match self {
            Self::CreateUser {
                email,
                id,
                inactive,
                attributes,
            } => Some(NewUserRecord {
                id: id.clone(),
                email: email.clone(),
                is_active: !inactive,
                attributes: attributes.clone().unwrap_or_default(),
            }),
            _ => None,
        }
    }

    /// Patch for an update; `None` for other commands.
    pub fn patch(&self) -> Option<RecordPatch> {
        match self {
            Self::UpdateUser {
                email,
                active,
                attributes,
                ..
            } => Some(RecordPatch {
                email: email.clone(),
                is_active: *active,
                attributes: attributes.clone(),
            }),
            _ => None,
        }
    }

    /// Toggle request, using `board_sheet` when no sheet was given.
    pub fn toggle(&self, board_sheet: &str) -> Result<Option<ReactionToggle>, String> {
        let Self::ToggleReaction {
            sheet,
            row,
            kind,
            actor,
            intent,
        } = self
        else {
            return Ok(None);
        };
        let target = ReactionTarget::new(sheet.as_deref().unwrap_or(board_sheet), *row)
            .map_err(|error| error.to_string())?;
        Ok(Some(ReactionToggle {
            target,
            kind: *kind,
            actor: actor.clone(),
            intent: *intent,
        }))
    }
}

fn parse_email(raw: &str) -> Result<Email, String> {
    Email::new(raw).map_err(|error| error.to_string())
}

fn parse_record_id(raw: &str) -> Result<RecordId, String> {
    RecordId::new(raw).map_err(|error| error.to_string())
}

fn parse_actor(raw: &str) -> Result<ActorId, String> {
    ActorId::new(raw).map_err(|error| error.to_string())
}

fn parse_attributes(raw: &str) -> Result<Attributes, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("attributes must be a JSON object".to_owned()),
        Err(error) => Err(format!("attributes are not valid JSON: {error}")),
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for CLI parsing helpers.

    use super::*;
    use rstest::rstest;

    #[rstest]
    fn attributes_must_be_objects() {
        let error = parse_attributes("[1, 2]").expect_err("arrays are rejected");
        assert!(error.contains("JSON object"));
        let parsed = parse_attributes(r#"{"team": "core"}"#).expect("object parses");
        assert_eq!(parsed.get("team"), Some(&Value::from("core")));
    }

    #[rstest]
    fn create_user_builds_a_new_record() {
        let args = CliArgs::try_parse_from([
            "formboard",
            "create-user",
            "--email",
            "Ada@Example.org",
            "--inactive",
        ])
        .expect("arguments parse");

        let new = args.command.new_record().expect("create command");
        assert_eq!(new.email.as_str(), "ada@example.org");
        assert!(!new.is_active);
        assert!(new.id.is_none());
    }

    #[rstest]
    fn toggle_reaction_defaults_to_the_board_sheet_and_flip() {
        let args = CliArgs::try_parse_from([
            "formboard",
            "toggle-reaction",
            "--row",
            "7",
            "--kind",
            "like",
            "--actor",
            "ada",
        ])
        .expect("arguments parse");

        let toggle = args
            .command
            .toggle("Posts")
            .expect("valid target")
            .expect("toggle command");
        assert_eq!(toggle.target.sheet(), "Posts");
        assert_eq!(toggle.target.row(), 7);
        assert_eq!(toggle.kind, ReactionKind::Like);
        assert_eq!(toggle.intent, ToggleIntent::Flip);
    }

    #[rstest]
    #[case("0")]
    #[case("1")]
    fn toggle_reaction_rejects_rows_at_or_above_the_header(#[case] row: &str) {
        let args = CliArgs::try_parse_from([
            "formboard",
            "toggle-reaction",
            "--row",
            row,
            "--kind",
            "LIKE",
            "--actor",
            "ada",
        ])
        .expect("arguments parse");

        assert!(args.command.toggle("Posts").is_err());
    }
}
