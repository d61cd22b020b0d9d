//! Lock-protected writes to user records.
//!
//! Creates are double-checked under a create barrier scoped to the email,
//! so concurrent creators of one address converge on a single row. Updates
//! re-read the row under a lock scoped to the record id, merge, and write the
//! whole row back, so concurrent partial updates never lose each other's
//! fields. After a commit the `users` epoch is bumped and the cache refreshed
//! at the new epoch before the lock is released.

use std::sync::Arc;
use std::time::Duration;

use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::domain::Error;
use crate::domain::budget::ExecutionBudget;
use crate::domain::cache::{CacheNamespace, CacheVersionRegistry, TieredCache};
use crate::domain::mutation::{MutationOutcome, MutationResult};
use crate::domain::ports::{LockName, NamedLock, SheetStore};
use crate::domain::resilience::{ResilientExecutor, RetryPolicy};
use crate::domain::user_record::{Email, NewUserRecord, RecordId, RecordPatch, UserRecord};

mod exclusive;
mod publish;
mod table;

pub use exclusive::{CriticalSection, ExclusiveRunner, Phase};
pub use publish::CachePublisher;
pub use table::{LocatedRecord, UsersTable};

/// Tunables for [`RecordWriteCoordinator`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordCoordinatorConfig {
    /// Sheet holding user rows.
    pub sheet: String,
    /// Longest wait for a record or create-barrier lock.
    pub lock_timeout: Duration,
    /// Lifetime of cached records in the shared tier.
    pub cache_ttl: Duration,
    /// Backoff for store and epoch calls.
    pub policy: RetryPolicy,
}

impl Default for RecordCoordinatorConfig {
    fn default() -> Self {
        Self {
            sheet: "Users".to_owned(),
            lock_timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(300),
            policy: RetryPolicy::default(),
        }
    }
}

/// Result of create-if-absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRecord {
    /// Stored record.
    pub record: UserRecord,
    /// Whether this call created it.
    pub created: bool,
}

/// Shared infrastructure handed to the coordinators.
#[derive(Clone)]
pub struct CoordinatorDeps {
    /// Backing store.
    pub store: Arc<dyn SheetStore>,
    /// Lock service.
    pub locks: Arc<dyn NamedLock>,
    /// Two-tier cache.
    pub cache: Arc<TieredCache>,
    /// Epoch registry over the shared tier.
    pub versions: Arc<CacheVersionRegistry>,
    /// Retrying executor shared by every remote call.
    pub executor: Arc<ResilientExecutor>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

/// Writes and reads user records.
pub struct RecordWriteCoordinator {
    table: UsersTable,
    runner: ExclusiveRunner,
    publisher: CachePublisher,
    clock: Arc<dyn Clock>,
    config: RecordCoordinatorConfig,
}

impl RecordWriteCoordinator {
    /// Build a coordinator.
    pub fn new(deps: CoordinatorDeps, config: RecordCoordinatorConfig) -> Self {
        let table = UsersTable::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.executor),
            config.sheet.clone(),
            config.policy,
        );
        let runner = ExclusiveRunner::new(Arc::clone(&deps.locks), Arc::clone(&deps.clock));
        let publisher = CachePublisher::new(
            CacheNamespace::users(),
            &deps,
            config.policy,
            config.cache_ttl,
        );
        Self {
            table,
            runner,
            publisher,
            clock: Arc::clone(&deps.clock),
            config,
        }
    }

    /// Create a record unless one with the same email exists.
    ///
    /// Returns the existing record with `created = false` when the email is
    /// taken. An explicit id already used by a different email is a
    /// conflict.
    pub async fn create(
        &self,
        new: NewUserRecord,
        budget: &ExecutionBudget,
    ) -> MutationResult<CreatedRecord> {
        if let Some(existing) = self.table.find_by_email(&new.email, budget).await? {
            debug!(id = %existing.record.id(), "record exists; skipping create");
            return Ok(MutationOutcome::Applied(CreatedRecord {
                record: existing.record,
                created: false,
            }));
        }

        match new.id.clone() {
            Some(id) => {
                self.runner
                    .run(
                        LockName::record(&id),
                        "create.id",
                        self.config.lock_timeout,
                        budget,
                        |section| async move {
                            self.create_under_barrier(&new, section.budget()).await
                        },
                    )
                    .await
            }
            None => self.create_under_barrier(&new, budget).await,
        }
    }

    /// Double-checked insert under the create barrier of `new.email`.
    ///
    /// Explicit ids arrive here already holding their record scope, taken
    /// before the barrier in the same order an email move nests them.
    async fn create_under_barrier(
        &self,
        new: &NewUserRecord,
        budget: &ExecutionBudget,
    ) -> MutationResult<CreatedRecord> {
        let scope = LockName::create_barrier(&new.email);
        self.runner
            .run(scope, "create", self.config.lock_timeout, budget, |section| async move {
                let records = self.table.load(section.budget()).await?;
                if let Some(existing) = records
                    .iter()
                    .find(|located| located.record.email() == &new.email)
                {
                    return Ok(MutationOutcome::Applied(CreatedRecord {
                        record: existing.record.clone(),
                        created: false,
                    }));
                }
                let id = new.id.clone().unwrap_or_else(RecordId::generate);
                if records.iter().any(|located| located.record.id() == &id) {
                    return Err(Error::conflict(format!("record id {id} is already in use"))
                        .with_details(json!({ "id": id.as_str() })));
                }

                let record = UserRecord::new(
                    id,
                    new.email.clone(),
                    new.is_active,
                    new.attributes.clone(),
                    self.clock.utc(),
                );
                section.enter_commit()?;
                self.table.append(&record, section.budget()).await?;
                self.publish(&record, section.budget()).await;
                info!(id = %record.id(), "record created");
                Ok(MutationOutcome::Applied(CreatedRecord {
                    record,
                    created: true,
                }))
            })
            .await
    }

    /// Apply `patch` to the record with `id`.
    ///
    /// The patch is merged into a fresh read taken under the record lock.
    /// Changing the email additionally takes the create barrier of the new
    /// address so a concurrent create cannot claim it.
    pub async fn update(
        &self,
        id: &RecordId,
        patch: RecordPatch,
        budget: &ExecutionBudget,
    ) -> MutationResult<UserRecord> {
        if patch.is_empty() {
            return Err(Error::invalid_request("patch changes nothing")
                .with_details(json!({ "id": id.as_str() })));
        }

        self.runner
            .run(
                LockName::record(id),
                "update",
                self.config.lock_timeout,
                budget,
                |section| async move {
                    let Some(current) = self.table.find_by_id(id, section.budget()).await? else {
                        return Err(Error::not_found(format!("record {id} not found"))
                            .with_details(json!({ "id": id.as_str() })));
                    };
                    let next = patch.apply(&current.record, self.clock.utc());

                    match patch.email.as_ref() {
                        Some(email) if email != current.record.email() => {
                            self.commit_with_new_email(current.row, next, email, &section)
                                .await
                        }
                        _ => {
                            self.commit(current.row, &next, &section).await?;
                            Ok(MutationOutcome::Applied(next))
                        }
                    }
                },
            )
            .await
    }

    /// Soft-delete the record with `id`.
    pub async fn deactivate(
        &self,
        id: &RecordId,
        budget: &ExecutionBudget,
    ) -> MutationResult<UserRecord> {
        self.update(id, RecordPatch::deactivate(), budget).await
    }

    /// Read a record through the cache.
    pub async fn get(
        &self,
        id: &RecordId,
        budget: &ExecutionBudget,
    ) -> Result<Option<UserRecord>, Error> {
        self.publisher
            .read_through(&id_entity(id), || async move {
                let located = self.table.find_by_id(id, budget).await?;
                Ok(located.map(|located| located.record))
            })
            .await
    }

    /// Read a record by email through the cache.
    pub async fn find_by_email(
        &self,
        email: &Email,
        budget: &ExecutionBudget,
    ) -> Result<Option<UserRecord>, Error> {
        self.publisher
            .read_through(&email_entity(email), || async move {
                let located = self.table.find_by_email(email, budget).await?;
                Ok(located.map(|located| located.record))
            })
            .await
    }

    async fn commit_with_new_email(
        &self,
        row: u32,
        next: UserRecord,
        email: &Email,
        section: &CriticalSection,
    ) -> MutationResult<UserRecord> {
        self.runner
            .run(
                LockName::create_barrier(email),
                "update.email",
                self.config.lock_timeout,
                section.budget(),
                |_| async move {
                    let records = self.table.load(section.budget()).await?;
                    if records
                        .iter()
                        .any(|located| located.record.email() == email && located.row != row)
                    {
                        return Err(Error::conflict(format!("email {email} is already in use"))
                            .with_details(json!({ "id": next.id().as_str() })));
                    }
                    self.commit(row, &next, section).await?;
                    Ok(MutationOutcome::Applied(next))
                },
            )
            .await
    }

    async fn commit(
        &self,
        row: u32,
        record: &UserRecord,
        section: &CriticalSection,
    ) -> Result<(), Error> {
        section.enter_commit()?;
        self.table.write(row, record, section.budget()).await?;
        self.publish(record, section.budget()).await;
        info!(id = %record.id(), row, "record updated");
        Ok(())
    }

    /// Bump the `users` epoch and refresh both lookup keys of `record`.
    async fn publish(&self, record: &UserRecord, budget: &ExecutionBudget) {
        let entities = [id_entity(record.id()), email_entity(record.email())];
        self.publisher.publish(&entities, record, budget).await;
    }
}

fn id_entity(id: &RecordId) -> String {
    format!("id:{id}")
}

fn email_entity(email: &Email) -> String {
    format!("email:{}", email.fingerprint())
}

#[cfg(test)]
mod tests;
