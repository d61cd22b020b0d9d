//! In-memory wiring of every port for coordinator tests.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use super::{ClockAdvancingSleeper, MutableClock, NoJitter, ScriptedSheetStore};
use crate::domain::budget::ExecutionBudget;
use crate::domain::cache::{CacheVersionRegistry, LocalCacheTier, TieredCache};
use crate::domain::record_coordinator::CoordinatorDeps;
use crate::domain::resilience::{CircuitBreakerConfig, ExecutorRuntime, ResilientExecutor};
use crate::domain::user_record::header_row;
use crate::outbound::memory::{InMemoryNamedLock, InMemorySharedCache, InMemorySheetStore};

/// Users sheet seeded by [`Harness::new`].
pub const USERS_SHEET: &str = "Users";
/// Board sheet seeded by [`Harness::new`]; rows 2 to 11 hold posts.
pub const BOARD_SHEET: &str = "Posts";

/// Every port backed by process memory, sharing one [`MutableClock`].
///
/// Retry sleeps advance the clock instead of waiting, so budgets see the
/// time retries would take without slowing tests down.
pub struct Harness {
    /// Shared time source.
    pub clock: Arc<MutableClock>,
    /// Grid behind the scripted store.
    pub sheets: Arc<InMemorySheetStore>,
    /// Store handed to coordinators.
    pub store: Arc<ScriptedSheetStore>,
    /// Lock service.
    pub locks: Arc<InMemoryNamedLock>,
    /// Shared cache tier.
    pub shared: Arc<InMemorySharedCache>,
    /// Two-tier cache over `shared`.
    pub cache: Arc<TieredCache>,
    /// Epoch registry over `shared`.
    pub versions: Arc<CacheVersionRegistry>,
    /// Executor with deterministic sleeps.
    pub executor: Arc<ResilientExecutor>,
}

impl Harness {
    /// Seeded users and board sheets with default breaker settings.
    pub fn new() -> Self {
        Self::with_breaker(CircuitBreakerConfig::default())
    }

    /// Seeded sheets with custom breaker settings.
    pub fn with_breaker(breaker: CircuitBreakerConfig) -> Self {
        let clock = Arc::new(MutableClock::default());
        let sheets = Arc::new(
            InMemorySheetStore::new()
                .with_sheet(USERS_SHEET, vec![header_row()])
                .with_sheet(BOARD_SHEET, board_rows()),
        );
        let store = Arc::new(ScriptedSheetStore::new(Arc::clone(&sheets)));
        let locks = Arc::new(InMemoryNamedLock::new());
        let shared = Arc::new(InMemorySharedCache::new(clock.clone()));
        let cache = Arc::new(TieredCache::new(
            LocalCacheTier::new(64),
            shared.clone(),
            clock.clone(),
            Duration::from_secs(5),
        ));
        let versions = Arc::new(CacheVersionRegistry::new(shared.clone()));
        let runtime = ExecutorRuntime {
            sleeper: Arc::new(ClockAdvancingSleeper(clock.clone())),
            jitter: Arc::new(NoJitter),
        };
        let executor = Arc::new(ResilientExecutor::with_runtime(
            clock.clone(),
            runtime,
            breaker,
        ));
        Self {
            clock,
            sheets,
            store,
            locks,
            shared,
            cache,
            versions,
            executor,
        }
    }

    /// Coordinator dependencies over these ports.
    pub fn deps(&self) -> CoordinatorDeps {
        CoordinatorDeps {
            store: self.store.clone(),
            locks: self.locks.clone(),
            cache: Arc::clone(&self.cache),
            versions: Arc::clone(&self.versions),
            executor: Arc::clone(&self.executor),
            clock: self.clock.clone(),
        }
    }

    /// Budget of 30 seconds with a 2 second margin, starting now.
    pub fn budget(&self) -> ExecutionBudget {
        ExecutionBudget::start(
            self.clock.clone(),
            Duration::from_secs(30),
            Duration::from_secs(2),
        )
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

fn board_rows() -> Vec<Vec<Value>> {
    let mut rows = vec![vec![json!("title"), json!("author"), json!("reactions")]];
    rows.extend((1..=10).map(|n| vec![json!(format!("post {n}")), json!("board"), json!("")]));
    rows
}
