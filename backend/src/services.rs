//! Composition of the coordinators behind the operations exposed to
//! collaborators.
//!
//! Each operation starts its own execution budget and answers with a
//! [`MutationResponse`], so callers can tell applied writes, benign
//! contention and failures apart without matching on domain types.

use std::sync::Arc;
use std::time::Duration;

use mockable::Clock;

use crate::domain::budget::ExecutionBudget;
use crate::domain::cache::{CacheVersionRegistry, LocalCacheTier, TieredCache};
use crate::domain::mutation::MutationResponse;
use crate::domain::ports::{NamedLock, SharedCache, SheetStore};
use crate::domain::reaction::{ReactionState, ReactionTarget, ReactionToggle, ToggleOutcome};
use crate::domain::resilience::ResilientExecutor;
use crate::domain::user_record::{NewUserRecord, RecordId, RecordPatch, UserRecord};
use crate::domain::{
    CoordinatorDeps, CreatedRecord, Error, ReactionToggleProtocol, RecordWriteCoordinator,
};
use crate::settings::CoreSettings;

/// Driven ports the services run against.
#[derive(Clone)]
pub struct CorePorts {
    /// Backing store.
    pub store: Arc<dyn SheetStore>,
    /// Lock service.
    pub locks: Arc<dyn NamedLock>,
    /// Shared cache tier.
    pub shared: Arc<dyn SharedCache>,
}

/// Record and reaction services sharing one executor and cache.
pub struct CoreServices {
    records: RecordWriteCoordinator,
    reactions: ReactionToggleProtocol,
    clock: Arc<dyn Clock>,
    ceiling: Duration,
    safety_margin: Duration,
}

impl CoreServices {
    /// Wire the coordinators over `ports`.
    ///
    /// `executor` is shared with adapters that make their own remote calls
    /// so every operation class has exactly one breaker.
    pub fn new(
        ports: CorePorts,
        executor: Arc<ResilientExecutor>,
        clock: Arc<dyn Clock>,
        settings: &CoreSettings,
    ) -> Self {
        let cache = Arc::new(TieredCache::new(
            LocalCacheTier::new(settings.local_cache_capacity),
            Arc::clone(&ports.shared),
            Arc::clone(&clock),
            settings.local_cache_ttl,
        ));
        let deps = CoordinatorDeps {
            store: ports.store,
            locks: ports.locks,
            cache,
            versions: Arc::new(CacheVersionRegistry::new(ports.shared)),
            executor,
            clock: Arc::clone(&clock),
        };
        Self {
            records: RecordWriteCoordinator::new(deps.clone(), settings.record_config()),
            reactions: ReactionToggleProtocol::new(deps, settings.reaction_config()),
            clock,
            ceiling: settings.execution_ceiling,
            safety_margin: settings.safety_margin,
        }
    }

    /// Start the execution budget of one request.
    pub fn begin_request(&self) -> ExecutionBudget {
        ExecutionBudget::start(Arc::clone(&self.clock), self.ceiling, self.safety_margin)
    }

    /// Create a user record unless its email is taken.
    pub async fn create_record(&self, new: NewUserRecord) -> MutationResponse<CreatedRecord> {
        let budget = self.begin_request();
        self.records.create(new, &budget).await.into()
    }

    /// Merge `patch` into the record with `id`.
    pub async fn update_record(
        &self,
        id: &RecordId,
        patch: RecordPatch,
    ) -> MutationResponse<UserRecord> {
        let budget = self.begin_request();
        self.records.update(id, patch, &budget).await.into()
    }

    /// Soft-delete the record with `id`.
    pub async fn deactivate_record(&self, id: &RecordId) -> MutationResponse<UserRecord> {
        let budget = self.begin_request();
        self.records.deactivate(id, &budget).await.into()
    }

    /// Toggle one reaction.
    pub async fn toggle_reaction(&self, request: ReactionToggle) -> MutationResponse<ToggleOutcome> {
        let budget = self.begin_request();
        self.reactions.toggle(request, &budget).await.into()
    }

    /// Read a record through the cache.
    pub async fn record(&self, id: &RecordId) -> Result<Option<UserRecord>, Error> {
        let budget = self.begin_request();
        self.records.get(id, &budget).await
    }

    /// Read the reactions on one row through the cache.
    pub async fn reactions(&self, target: &ReactionTarget) -> Result<ReactionState, Error> {
        let budget = self.begin_request();
        self.reactions.reactions(target, &budget).await
    }
}
