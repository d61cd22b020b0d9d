//! Tests for the record write coordinator.

use std::time::Duration;

use rstest::{fixture, rstest};
use serde_json::{Value, json};

use super::*;
use crate::domain::ErrorCode;
use crate::domain::mutation::Contention;
use crate::domain::ports::SheetStoreError;
use crate::domain::user_record::Attributes;
use crate::test_support::{Harness, ScriptedStep, StoreCall, USERS_SHEET};

struct Fixture {
    harness: Harness,
    coordinator: RecordWriteCoordinator,
}

#[fixture]
fn fixture() -> Fixture {
    let harness = Harness::new();
    let coordinator = RecordWriteCoordinator::new(harness.deps(), RecordCoordinatorConfig::default());
    Fixture {
        harness,
        coordinator,
    }
}

fn email(raw: &str) -> Email {
    Email::new(raw).expect("valid email")
}

fn attributes(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map,
        other => panic!("attributes must be an object, got {other}"),
    }
}

fn applied<T: std::fmt::Debug>(outcome: MutationOutcome<T>) -> T {
    match outcome {
        MutationOutcome::Applied(value) => value,
        MutationOutcome::Contended(contention) => panic!("unexpected contention: {contention:?}"),
    }
}

fn data_rows(harness: &Harness) -> usize {
    harness.sheets.snapshot(USERS_SHEET).len() - 1
}

async fn seed(fixture: &Fixture, raw_email: &str) -> UserRecord {
    let created = fixture
        .coordinator
        .create(NewUserRecord::for_email(email(raw_email)), &fixture.harness.budget())
        .await
        .expect("create succeeds");
    applied(created).record
}

#[rstest]
#[tokio::test]
async fn create_appends_a_row_once(fixture: Fixture) {
    let budget = fixture.harness.budget();
    let new = NewUserRecord::for_email(email("ada@example.org"));

    let first = applied(
        fixture
            .coordinator
            .create(new.clone(), &budget)
            .await
            .expect("first create"),
    );
    let second = applied(fixture.coordinator.create(new, &budget).await.expect("second create"));

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.record.id(), second.record.id());
    assert_eq!(data_rows(&fixture.harness), 1);
}

#[rstest]
#[tokio::test]
async fn concurrent_creates_of_one_email_converge(fixture: Fixture) {
    let budget = fixture.harness.budget();
    let left = NewUserRecord::for_email(email("ada@example.org"));
    let right = NewUserRecord::for_email(email(" ADA@example.org"));

    let (left, right) = tokio::join!(
        fixture.coordinator.create(left, &budget),
        fixture.coordinator.create(right, &budget)
    );
    let left = applied(left.expect("left create"));
    let right = applied(right.expect("right create"));

    assert_eq!(left.record.id(), right.record.id());
    assert_ne!(left.created, right.created);
    assert_eq!(data_rows(&fixture.harness), 1);
}

#[rstest]
#[tokio::test]
async fn explicit_ids_used_by_another_email_conflict(fixture: Fixture) {
    let existing = seed(&fixture, "ada@example.org").await;
    let mut new = NewUserRecord::for_email(email("grace@example.org"));
    new.id = Some(existing.id().clone());

    let error = fixture
        .coordinator
        .create(new, &fixture.harness.budget())
        .await
        .expect_err("id taken");

    assert_eq!(error.code(), ErrorCode::Conflict);
    assert_eq!(data_rows(&fixture.harness), 1);
}

#[rstest]
#[tokio::test]
async fn concurrent_creates_sharing_an_explicit_id_store_one_row(fixture: Fixture) {
    let budget = fixture.harness.budget();
    let id = RecordId::new("u1").expect("valid id");
    let mut left = NewUserRecord::for_email(email("ada@example.org"));
    left.id = Some(id.clone());
    let mut right = NewUserRecord::for_email(email("grace@example.org"));
    right.id = Some(id.clone());

    let (left, right) = tokio::join!(
        fixture.coordinator.create(left, &budget),
        fixture.coordinator.create(right, &budget)
    );

    let (created, rejected) = match (left, right) {
        (Ok(outcome), Err(error)) | (Err(error), Ok(outcome)) => (applied(outcome), error),
        other => panic!("expected one create and one conflict, got {other:?}"),
    };
    assert!(created.created);
    assert_eq!(created.record.id(), &id);
    assert_eq!(rejected.code(), ErrorCode::Conflict);
    assert_eq!(data_rows(&fixture.harness), 1);
    assert!(
        !fixture
            .harness
            .locks
            .is_held(&LockName::record(&id)),
        "record scope released"
    );
}

#[rstest]
#[tokio::test]
async fn update_merges_attributes_and_advances_last_modified(fixture: Fixture) {
    let mut new = NewUserRecord::for_email(email("ada@example.org"));
    new.attributes = attributes(json!({"team": "core", "profile": {"lang": "en", "tz": "UTC"}}));
    let created = applied(
        fixture
            .coordinator
            .create(new, &fixture.harness.budget())
            .await
            .expect("create"),
    )
    .record;

    let patch = RecordPatch {
        attributes: Some(attributes(json!({"team": null, "profile": {"tz": "CET"}}))),
        ..RecordPatch::default()
    };
    let updated = applied(
        fixture
            .coordinator
            .update(created.id(), patch, &fixture.harness.budget())
            .await
            .expect("update"),
    );

    assert_eq!(
        Value::Object(updated.attributes().clone()),
        json!({"profile": {"lang": "en", "tz": "CET"}})
    );
    assert!(updated.last_modified() > created.last_modified());
    let stored = fixture
        .coordinator
        .get(created.id(), &fixture.harness.budget())
        .await
        .expect("get")
        .expect("present");
    assert_eq!(stored, updated);
}

#[rstest]
#[tokio::test]
async fn concurrent_partial_updates_keep_both_fields(fixture: Fixture) {
    let record = seed(&fixture, "ada@example.org").await;
    let budget = fixture.harness.budget();
    let team = RecordPatch {
        attributes: Some(attributes(json!({"team": "core"}))),
        ..RecordPatch::default()
    };
    let role = RecordPatch {
        attributes: Some(attributes(json!({"role": "lead"}))),
        ..RecordPatch::default()
    };

    let (left, right) = tokio::join!(
        fixture.coordinator.update(record.id(), team, &budget),
        fixture.coordinator.update(record.id(), role, &budget)
    );
    applied(left.expect("team update"));
    applied(right.expect("role update"));

    let stored = fixture
        .coordinator
        .get(record.id(), &budget)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(
        Value::Object(stored.attributes().clone()),
        json!({"team": "core", "role": "lead"})
    );
}

#[rstest]
#[tokio::test]
async fn email_changes_to_a_taken_address_conflict(fixture: Fixture) {
    let ada = seed(&fixture, "ada@example.org").await;
    seed(&fixture, "grace@example.org").await;
    let patch = RecordPatch {
        email: Some(email("grace@example.org")),
        ..RecordPatch::default()
    };

    let error = fixture
        .coordinator
        .update(ada.id(), patch, &fixture.harness.budget())
        .await
        .expect_err("email taken");

    assert_eq!(error.code(), ErrorCode::Conflict);
    let stored = fixture
        .coordinator
        .get(ada.id(), &fixture.harness.budget())
        .await
        .expect("get")
        .expect("present");
    assert_eq!(stored.email(), &email("ada@example.org"));
}

#[rstest]
#[tokio::test]
async fn email_changes_move_the_email_index(fixture: Fixture) {
    let ada = seed(&fixture, "ada@example.org").await;
    let patch = RecordPatch {
        email: Some(email("lovelace@example.org")),
        is_active: Some(false),
        ..RecordPatch::default()
    };

    applied(
        fixture
            .coordinator
            .update(ada.id(), patch, &fixture.harness.budget())
            .await
            .expect("update"),
    );

    let budget = fixture.harness.budget();
    let moved = fixture
        .coordinator
        .find_by_email(&email("lovelace@example.org"), &budget)
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(moved.id(), ada.id());
    assert!(!moved.is_active());
    assert!(
        fixture
            .coordinator
            .find_by_email(&email("ada@example.org"), &budget)
            .await
            .expect("lookup")
            .is_none()
    );
}

#[rstest]
#[tokio::test]
async fn missing_records_and_empty_patches_are_rejected(fixture: Fixture) {
    let budget = fixture.harness.budget();
    let missing = RecordId::new("missing").expect("valid id");

    let not_found = fixture
        .coordinator
        .deactivate(&missing, &budget)
        .await
        .expect_err("no such record");
    let empty = fixture
        .coordinator
        .update(&missing, RecordPatch::default(), &budget)
        .await
        .expect_err("empty patch");

    assert_eq!(not_found.code(), ErrorCode::NotFound);
    assert_eq!(empty.code(), ErrorCode::InvalidRequest);
    assert_eq!(fixture.harness.store.calls(StoreCall::Write), 0);
}

#[rstest]
#[tokio::test]
async fn deactivate_keeps_the_row(fixture: Fixture) {
    let record = seed(&fixture, "ada@example.org").await;

    let deactivated = applied(
        fixture
            .coordinator
            .deactivate(record.id(), &fixture.harness.budget())
            .await
            .expect("deactivate"),
    );

    assert!(!deactivated.is_active());
    assert_eq!(data_rows(&fixture.harness), 1);
}

#[rstest]
#[tokio::test]
async fn held_record_locks_report_contention() {
    let harness = Harness::new();
    let config = RecordCoordinatorConfig {
        lock_timeout: Duration::from_millis(20),
        ..RecordCoordinatorConfig::default()
    };
    let coordinator = RecordWriteCoordinator::new(harness.deps(), config);
    let fixture = Fixture {
        harness,
        coordinator,
    };
    let record = seed(&fixture, "ada@example.org").await;
    let scope = LockName::record(record.id());
    assert!(
        fixture
            .harness
            .locks
            .try_acquire(&scope, Duration::ZERO)
            .await
            .expect("acquire")
    );

    let outcome = fixture
        .coordinator
        .deactivate(record.id(), &fixture.harness.budget())
        .await
        .expect("contention is not an error");

    assert_eq!(
        outcome,
        MutationOutcome::Contended(Contention::LockBusy {
            scope: scope.to_string()
        })
    );
    assert_eq!(fixture.harness.store.calls(StoreCall::Write), 0);
}

#[rstest]
#[tokio::test]
async fn reads_are_served_from_the_cache_after_a_commit(fixture: Fixture) {
    let record = seed(&fixture, "ada@example.org").await;
    let reads = fixture.harness.store.calls(StoreCall::Read);

    let cached = fixture
        .coordinator
        .get(record.id(), &fixture.harness.budget())
        .await
        .expect("get")
        .expect("present");

    assert_eq!(cached, record);
    assert_eq!(fixture.harness.store.calls(StoreCall::Read), reads);
}

#[rstest]
#[tokio::test]
async fn commits_bump_the_users_epoch(fixture: Fixture) {
    let namespace = CacheNamespace::users();
    let before = fixture
        .harness
        .versions
        .current_epoch(&namespace)
        .await
        .expect("epoch");

    let record = seed(&fixture, "ada@example.org").await;
    let after_create = fixture
        .harness
        .versions
        .current_epoch(&namespace)
        .await
        .expect("epoch");
    fixture
        .coordinator
        .deactivate(record.id(), &fixture.harness.budget())
        .await
        .expect("deactivate");
    let after_update = fixture
        .harness
        .versions
        .current_epoch(&namespace)
        .await
        .expect("epoch");

    assert!(before < after_create);
    assert!(after_create < after_update);
    let refreshed = fixture
        .coordinator
        .get(record.id(), &fixture.harness.budget())
        .await
        .expect("get")
        .expect("present");
    assert!(!refreshed.is_active());
}

#[rstest]
#[tokio::test]
async fn ambiguous_appends_are_not_duplicated(fixture: Fixture) {
    fixture.harness.store.script(
        StoreCall::Append,
        ScriptedStep::LandThenFail(SheetStoreError::timeout("response lost")),
    );

    let created = applied(
        fixture
            .coordinator
            .create(
                NewUserRecord::for_email(email("ada@example.org")),
                &fixture.harness.budget(),
            )
            .await
            .expect("create recovers"),
    );

    assert!(created.created);
    assert_eq!(data_rows(&fixture.harness), 1);
    assert_eq!(fixture.harness.store.calls(StoreCall::Append), 1);
}

#[rstest]
#[tokio::test]
async fn transient_read_failures_are_retried(fixture: Fixture) {
    let record = seed(&fixture, "ada@example.org").await;
    fixture.harness.store.fail_times(
        StoreCall::Read,
        2,
        &SheetStoreError::rate_limited("quota"),
    );

    let outcome = fixture
        .coordinator
        .deactivate(record.id(), &fixture.harness.budget())
        .await
        .expect("retries succeed");

    assert!(!applied(outcome).is_active());
}

#[rstest]
#[tokio::test]
async fn retries_stop_when_the_budget_runs_out(fixture: Fixture) {
    let record = seed(&fixture, "ada@example.org").await;
    fixture.harness.store.fail_times(
        StoreCall::Read,
        4,
        &SheetStoreError::unavailable("backend down"),
    );
    let budget = ExecutionBudget::start(
        fixture.harness.clock.clone(),
        Duration::from_secs(1),
        Duration::ZERO,
    );

    let error = fixture
        .coordinator
        .deactivate(record.id(), &budget)
        .await
        .expect_err("budget exhausted");

    assert_eq!(error.code(), ErrorCode::DeadlineExceeded);
    assert_eq!(fixture.harness.store.calls(StoreCall::Write), 0);
    assert!(!fixture.harness.locks.is_held(&LockName::record(record.id())));
}

#[rstest]
#[tokio::test]
async fn permission_failures_surface_as_forbidden(fixture: Fixture) {
    fixture.harness.store.script(
        StoreCall::Read,
        ScriptedStep::Fail(SheetStoreError::permission_denied("no access")),
    );

    let error = fixture
        .coordinator
        .create(
            NewUserRecord::for_email(email("ada@example.org")),
            &fixture.harness.budget(),
        )
        .await
        .expect_err("denied");

    assert_eq!(error.code(), ErrorCode::Forbidden);
    assert_eq!(fixture.harness.store.calls(StoreCall::Read), 1);
}
