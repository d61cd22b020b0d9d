//! Two-phase reaction toggling.
//!
//! Phase 1 claims a short-lived guard in the shared cache keyed by target
//! row and reaction kind; a claimed guard means an identical toggle is in
//! flight and the request is turned away as contention. Phase 2 takes the
//! row lock, re-reads the reaction cell, applies the intent and writes the
//! whole cell back. The desired membership is fixed from the first fresh
//! read under the lock, so retried writes converge instead of flipping
//! twice.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::domain::Error;
use crate::domain::budget::ExecutionBudget;
use crate::domain::cache::CacheNamespace;
use crate::domain::mutation::{Contention, MutationOutcome, MutationResult};
use crate::domain::ports::{CacheKey, LockName, SharedCache, SheetRange, SheetStore, SheetStoreError};
use crate::domain::reaction::{ReactionKind, ReactionState, ReactionTarget, ReactionToggle, ToggleOutcome};
use crate::domain::record_coordinator::{
    CachePublisher, CoordinatorDeps, CriticalSection, ExclusiveRunner,
};
use crate::domain::resilience::{ExecuteOptions, ResilientExecutor, RetryPolicy};

/// Tunables for [`ReactionToggleProtocol`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReactionToggleConfig {
    /// 1-based column holding the reaction cell on every target row.
    pub column: u32,
    /// Longest wait for the row lock.
    pub lock_timeout: Duration,
    /// Lifetime of the phase 1 guard. Must exceed `lock_timeout` so a guard
    /// outlives the toggle that claimed it.
    pub guard_ttl: Duration,
    /// Lifetime of cached reaction states in the shared tier.
    pub cache_ttl: Duration,
    /// Backoff for store and epoch calls.
    pub policy: RetryPolicy,
}

impl Default for ReactionToggleConfig {
    fn default() -> Self {
        Self {
            column: 3,
            lock_timeout: Duration::from_secs(3),
            guard_ttl: Duration::from_secs(6),
            cache_ttl: Duration::from_secs(120),
            policy: RetryPolicy::default(),
        }
    }
}

enum Guard {
    Claimed(CacheKey),
    Unguarded,
}

/// Toggles reactions and serves reaction reads.
pub struct ReactionToggleProtocol {
    store: Arc<dyn SheetStore>,
    shared: Arc<dyn SharedCache>,
    executor: Arc<ResilientExecutor>,
    runner: ExclusiveRunner,
    publisher: CachePublisher,
    config: ReactionToggleConfig,
}

impl ReactionToggleProtocol {
    /// Build the protocol.
    pub fn new(deps: CoordinatorDeps, config: ReactionToggleConfig) -> Self {
        let publisher = CachePublisher::new(
            CacheNamespace::reactions(),
            &deps,
            config.policy,
            config.cache_ttl,
        );
        Self {
            store: Arc::clone(&deps.store),
            shared: Arc::clone(deps.cache.shared()),
            executor: Arc::clone(&deps.executor),
            runner: ExclusiveRunner::new(Arc::clone(&deps.locks), Arc::clone(&deps.clock)),
            publisher,
            config,
        }
    }

    /// Apply `request` to the target row.
    ///
    /// Busy guards and busy row locks both yield
    /// [`MutationOutcome::Contended`]. The guard is removed once phase 2
    /// finishes, whatever its outcome.
    pub async fn toggle(
        &self,
        request: ReactionToggle,
        budget: &ExecutionBudget,
    ) -> MutationResult<ToggleOutcome> {
        let guard_key = guard_key(&request.target, request.kind)?;
        let guard = match self.claim_guard(&guard_key).await {
            Some(true) => Guard::Claimed(guard_key),
            Some(false) => {
                debug!(guard = %guard_key, "identical toggle in flight");
                return Ok(MutationOutcome::Contended(Contention::ToggleInFlight {
                    scope: guard_key.to_string(),
                }));
            }
            None => Guard::Unguarded,
        };

        let result = self
            .runner
            .run(
                LockName::reaction_row(&request.target),
                "reaction.toggle",
                self.config.lock_timeout,
                budget,
                |section| self.apply(&request, section),
            )
            .await;

        if let Guard::Claimed(key) = guard {
            if let Err(error) = self.shared.remove(&key).await {
                warn!(guard = %key, error = %error, "failed to clear reaction guard");
            }
        }
        result
    }

    /// Current reactions on `target`, read through the cache.
    pub async fn reactions(
        &self,
        target: &ReactionTarget,
        budget: &ExecutionBudget,
    ) -> Result<ReactionState, Error> {
        let state = self
            .publisher
            .read_through(&state_entity(target), || async move {
                self.read_state(target, budget).await.map(Some)
            })
            .await?;
        Ok(state.unwrap_or_default())
    }

    async fn apply(
        &self,
        request: &ReactionToggle,
        section: CriticalSection,
    ) -> MutationResult<ToggleOutcome> {
        let current = self.read_state(&request.target, section.budget()).await?;
        let was_present = current.contains(request.kind, &request.actor);
        let present = request.intent.resolve(was_present);
        if present == was_present {
            debug!(
                row = request.target.row(),
                kind = %request.kind,
                "reaction already in requested state"
            );
            return Ok(MutationOutcome::Applied(ToggleOutcome {
                kind: request.kind,
                actor: request.actor.clone(),
                present,
                changed: false,
                count: current.count(request.kind),
            }));
        }

        section.enter_commit()?;
        let range = self.cell(&request.target)?;
        let store = Arc::clone(&self.store);
        let kind = request.kind;
        let actor = request.actor.clone();
        let written = self
            .executor
            .execute(
                &ExecuteOptions::idempotent("sheets.reaction", self.config.policy),
                section.budget(),
                move |attempt| {
                    let store = Arc::clone(&store);
                    let range = range.clone();
                    let actor = actor.clone();
                    let first_read = current.clone();
                    async move {
                        // Later attempts cannot tell whether an earlier write
                        // landed, so they start from a fresh read.
                        let mut state = if attempt == 1 {
                            first_read
                        } else {
                            read_cell(store.as_ref(), &range).await?
                        };
                        if state.set(kind, &actor, present) {
                            let cell = vec![vec![Value::String(state.to_blob())]];
                            store.write_rows(&range, &cell).await?;
                        }
                        Ok::<_, SheetStoreError>(state)
                    }
                },
            )
            .await?;

        self.publisher
            .publish(&[state_entity(&request.target)], &written, section.budget())
            .await;
        info!(
            row = request.target.row(),
            kind = %request.kind,
            present,
            "reaction toggled"
        );
        Ok(MutationOutcome::Applied(ToggleOutcome {
            kind: request.kind,
            actor: request.actor.clone(),
            present,
            changed: true,
            count: written.count(request.kind),
        }))
    }

    async fn read_state(
        &self,
        target: &ReactionTarget,
        budget: &ExecutionBudget,
    ) -> Result<ReactionState, Error> {
        let range = self.cell(target)?;
        let store = Arc::clone(&self.store);
        let state = self
            .executor
            .execute(
                &ExecuteOptions::idempotent("sheets.read", self.config.policy),
                budget,
                move |_| {
                    let store = Arc::clone(&store);
                    let range = range.clone();
                    async move { read_cell(store.as_ref(), &range).await }
                },
            )
            .await?;
        Ok(state)
    }

    /// Claim the phase 1 guard. `None` when the shared tier failed and the
    /// toggle proceeds on the row lock alone.
    async fn claim_guard(&self, key: &CacheKey) -> Option<bool> {
        match self
            .shared
            .put_if_absent(key, b"1", self.config.guard_ttl)
            .await
        {
            Ok(claimed) => Some(claimed),
            Err(error) => {
                warn!(guard = %key, error = %error, "reaction guard unavailable; relying on row lock");
                None
            }
        }
    }

    fn cell(&self, target: &ReactionTarget) -> Result<SheetRange, Error> {
        SheetRange::cell(target.sheet(), target.row(), self.config.column).map_err(|error| {
            Error::invalid_request(format!("invalid reaction target: {error}"))
                .with_details(json!({ "sheet": target.sheet(), "row": target.row() }))
        })
    }
}

fn guard_key(target: &ReactionTarget, kind: ReactionKind) -> Result<CacheKey, Error> {
    CacheKey::new(format!(
        "reaction-guard:{}:{}:{}",
        target.sheet().replace(char::is_whitespace, "_"),
        target.row(),
        kind.as_str()
    ))
    .map_err(|error| Error::internal(format!("invalid reaction guard key: {error}")))
}

fn state_entity(target: &ReactionTarget) -> String {
    format!("row:{}:{}", target.sheet(), target.row())
}

async fn read_cell(store: &dyn SheetStore, range: &SheetRange) -> Result<ReactionState, SheetStoreError> {
    let rows = store.read_range(range).await?;
    let cell = rows.first().and_then(|cells| cells.first());
    match cell {
        None | Some(Value::Null) => Ok(ReactionState::default()),
        Some(Value::String(blob)) => ReactionState::from_blob(blob)
            .map_err(|error| SheetStoreError::decode(format!("{range}: {error}"))),
        Some(other) => Err(SheetStoreError::decode(format!(
            "{range}: reaction cell holds {other}"
        ))),
    }
}
