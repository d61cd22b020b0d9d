//! Tests for record validation, merge patches and row encoding.

use super::*;
use crate::domain::ports::Row;
use chrono::TimeZone;
use rstest::{fixture, rstest};
use serde_json::json;

fn attributes(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

#[fixture]
fn stamped() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

#[fixture]
fn ada(stamped: DateTime<Utc>) -> UserRecord {
    UserRecord::new(
        RecordId::new("42").expect("valid id"),
        Email::new("ada@example.org").expect("valid email"),
        true,
        attributes(json!({"name": "Ada"})),
        stamped,
    )
}

#[rstest]
#[case("plain")]
#[case("@example.org")]
#[case("ada@")]
#[case("ada@@example.org")]
#[case("a da@example.org")]
fn email_rejects_malformed_addresses(#[case] raw: &str) {
    assert_eq!(
        Email::new(raw).expect_err("invalid"),
        RecordValidationError::InvalidEmail
    );
}

#[rstest]
#[case("", RecordValidationError::EmptyId)]
#[case("has space", RecordValidationError::InvalidId)]
fn record_id_rejects_invalid_values(#[case] raw: &str, #[case] expected: RecordValidationError) {
    assert_eq!(RecordId::new(raw).expect_err("invalid"), expected);
}

#[rstest]
fn generated_ids_are_unique() {
    assert_ne!(RecordId::generate(), RecordId::generate());
}

#[rstest]
fn attribute_patch_merges_without_dropping_keys(ada: UserRecord, stamped: DateTime<Utc>) {
    let patch = RecordPatch {
        attributes: Some(attributes(json!({"role": "admin"}))),
        ..RecordPatch::default()
    };

    let updated = patch.apply(&ada, stamped + TimeDelta::seconds(5));

    assert_eq!(
        Value::Object(updated.attributes().clone()),
        json!({"name": "Ada", "role": "admin"})
    );
    assert_eq!(updated.id(), ada.id());
    assert!(updated.last_modified() > ada.last_modified());
}

#[rstest]
fn merge_patch_removes_nulls_and_merges_nested_objects() {
    let mut target = attributes(json!({
        "name": "Ada",
        "prefs": {"theme": "dark", "lang": "en"},
        "legacy": true
    }));
    let patch = attributes(json!({
        "prefs": {"lang": null, "font": "mono"},
        "legacy": null
    }));

    merge_patch(&mut target, &patch);

    assert_eq!(
        Value::Object(target),
        json!({"name": "Ada", "prefs": {"theme": "dark", "font": "mono"}})
    );
}

#[rstest]
fn last_modified_advances_even_when_clock_stalls(ada: UserRecord, stamped: DateTime<Utc>) {
    let behind = stamped - TimeDelta::seconds(3);

    let updated = RecordPatch::deactivate().apply(&ada, behind);

    assert_eq!(
        updated.last_modified(),
        stamped + TimeDelta::milliseconds(1)
    );
    assert!(!updated.is_active());
}

#[rstest]
fn next_modified_truncates_to_milliseconds(stamped: DateTime<Utc>) {
    let now = stamped + TimeDelta::nanoseconds(2_500_000);
    assert_eq!(
        next_modified(stamped, now),
        stamped + TimeDelta::milliseconds(2)
    );
}

#[rstest]
fn rows_round_trip_through_the_sheet_layout(ada: UserRecord) {
    let row = encode_row(&ada);

    assert_eq!(row.len(), usize::try_from(USER_COLUMNS).expect("fits"));
    assert_eq!(row[3], json!("{\"name\":\"Ada\"}"));
    assert_eq!(row[4], json!("2026-03-01T09:00:00.000Z"));
    assert_eq!(decode_row(&row).expect("decodes"), ada);
}

#[rstest]
fn decode_accepts_sheet_style_scalars() {
    let row = vec![
        json!("u-7"),
        json!("GRACE@example.org"),
        json!("TRUE"),
        json!(""),
        json!("2026-03-01T09:00:00Z"),
    ];

    let record = decode_row(&row).expect("decodes");

    assert_eq!(record.email().as_str(), "grace@example.org");
    assert!(record.is_active());
    assert!(record.attributes().is_empty());
}

#[rstest]
#[case(vec![json!("u-1")], RowDecodeError::MissingColumn { column: "email" })]
#[case(
    vec![json!("u-1"), json!("a@b.c"), json!("maybe"), json!(""), json!("2026-03-01T09:00:00Z")],
    RowDecodeError::InvalidField {
        column: "isActive",
        message: "expected TRUE or FALSE, found maybe".to_owned(),
    }
)]
fn decode_reports_the_offending_column(#[case] row: Row, #[case] expected: RowDecodeError) {
    assert_eq!(decode_row(&row).expect_err("invalid row"), expected);
}

#[rstest]
fn blank_rows_are_detected() {
    assert!(is_blank_row(&[json!(""), Value::Null]));
    assert!(is_blank_row(&[]));
    assert!(!is_blank_row(&[json!(""), json!("x")]));
}
