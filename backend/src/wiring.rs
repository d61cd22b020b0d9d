//! Adapter selection for the `formboard` binary.
//!
//! Redis backs the shared cache and named locks when a URL is configured,
//! otherwise the process-local adapters are used. The HTTP sheet store is
//! used when a spreadsheet id is configured, otherwise an in-memory store
//! seeded with empty users and board sheets.

use std::io;
use std::sync::Arc;

use mockable::Clock;
use serde_json::Value;
use url::Url;

use formboard::domain::ports::{NamedLock, Row, SharedCache, SheetStore};
use formboard::domain::resilience::ResilientExecutor;
use formboard::domain::user_record::header_row;
use formboard::outbound::memory::{InMemoryNamedLock, InMemorySharedCache, InMemorySheetStore};
use formboard::outbound::redis::{
    RedisLockConfig, RedisNamedLock, RedisPool, RedisPoolConfig, RedisSharedCache,
};
use formboard::outbound::sheets::{HttpSheetStore, HttpSheetStoreConfig, StaticCredentialProvider};
use formboard::services::CorePorts;
use formboard::settings::CoreSettings;

const BOARD_HEADER: [&str; 3] = ["title", "author", "reactions"];

/// Build the driven ports described by `settings`.
pub async fn build_ports(
    settings: &CoreSettings,
    executor: &Arc<ResilientExecutor>,
    clock: &Arc<dyn Clock>,
) -> io::Result<CorePorts> {
    let (locks, shared) = build_coordination(settings, clock).await?;
    let store = build_store(settings, executor, clock)?;
    Ok(CorePorts {
        store,
        locks,
        shared,
    })
}

async fn build_coordination(
    settings: &CoreSettings,
    clock: &Arc<dyn Clock>,
) -> io::Result<(Arc<dyn NamedLock>, Arc<dyn SharedCache>)> {
    match settings.adapters.redis_url.as_deref() {
        Some(url) => {
            let pool = RedisPool::new(RedisPoolConfig::new(url))
                .await
                .map_err(io::Error::other)?;
            tracing::info!("using redis for locks and the shared cache");
            Ok((
                Arc::new(RedisNamedLock::new(pool.clone(), lock_config(settings))),
                Arc::new(RedisSharedCache::new(pool)),
            ))
        }
        None => {
            tracing::warn!("no redis url configured; locks and cache are process-local");
            Ok((
                Arc::new(InMemoryNamedLock::new()),
                Arc::new(InMemorySharedCache::new(Arc::clone(clock))),
            ))
        }
    }
}

fn lock_config(settings: &CoreSettings) -> RedisLockConfig {
    RedisLockConfig {
        lease: settings.lock_lease(),
        ..RedisLockConfig::default()
    }
}

fn build_store(
    settings: &CoreSettings,
    executor: &Arc<ResilientExecutor>,
    clock: &Arc<dyn Clock>,
) -> io::Result<Arc<dyn SheetStore>> {
    let adapters = &settings.adapters;
    let Some(spreadsheet_id) = adapters.spreadsheet_id.as_deref() else {
        tracing::warn!("no spreadsheet configured; using an in-memory sheet store");
        return Ok(Arc::new(seeded_memory_store(settings)));
    };

    let mut config = HttpSheetStoreConfig::new(spreadsheet_id).map_err(io::Error::other)?;
    if let Some(base) = adapters.sheets_api_base.as_deref() {
        config.api_base = Url::parse(base).map_err(io::Error::other)?;
    }
    let token = adapters
        .sheets_token
        .as_ref()
        .map(|token| token.as_str().to_owned());
    let store = HttpSheetStore::new(
        config,
        Arc::new(StaticCredentialProvider::new(token)),
        Arc::clone(executor),
        Arc::clone(clock),
    )
    .map_err(io::Error::other)?;
    Ok(Arc::new(store))
}

fn seeded_memory_store(settings: &CoreSettings) -> InMemorySheetStore {
    let board_header: Row = BOARD_HEADER.into_iter().map(Value::from).collect();
    InMemorySheetStore::new()
        .with_sheet(settings.users_sheet.clone(), vec![header_row()])
        .with_sheet(settings.board_sheet.clone(), vec![board_header])
}
