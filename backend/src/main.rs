//! `formboard` entry-point: applies one lock-protected mutation and prints
//! the outcome as JSON.

mod cli;
mod wiring;

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use mockable::{Clock, DefaultClock, DefaultEnv};
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt};

use formboard::domain::mutation::MutationResponse;
use formboard::domain::resilience::ResilientExecutor;
use formboard::services::CoreServices;
use formboard::settings::CoreSettings;

use cli::{CliArgs, Command};

fn main() -> io::Result<ExitCode> {
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let args = CliArgs::try_parse().map_err(io::Error::other)?;
    let settings = CoreSettings::from_env(&DefaultEnv::new()).map_err(io::Error::other)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(args.command, settings))
}

async fn run(command: Command, settings: CoreSettings) -> io::Result<ExitCode> {
    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
    let executor = Arc::new(ResilientExecutor::new(Arc::clone(&clock), settings.breaker));
    let ports = wiring::build_ports(&settings, &executor, &clock).await?;
    let services = CoreServices::new(ports, executor, clock, &settings);

    match &command {
        Command::CreateUser { .. } => {
            let Some(new) = command.new_record() else {
                return Err(io::Error::other("create-user without a record"));
            };
            print_response(&services.create_record(new).await)
        }
        Command::UpdateUser { id, .. } => {
            let Some(patch) = command.patch() else {
                return Err(io::Error::other("update-user without a patch"));
            };
            print_response(&services.update_record(id, patch).await)
        }
        Command::DeactivateUser { id } => print_response(&services.deactivate_record(id).await),
        Command::ToggleReaction { .. } => {
            let request = command
                .toggle(&settings.board_sheet)
                .map_err(io::Error::other)?
                .ok_or_else(|| io::Error::other("toggle-reaction without a request"))?;
            print_response(&services.toggle_reaction(request).await)
        }
    }
}

fn print_response<T: Serialize>(response: &MutationResponse<T>) -> io::Result<ExitCode> {
    let rendered = serde_json::to_string_pretty(response).map_err(io::Error::other)?;
    println!("{rendered}");
    Ok(if response.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
