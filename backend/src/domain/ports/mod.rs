//! Domain ports and supporting types for the hexagonal boundary.
//!
//! Coordinators depend only on these traits; `outbound` supplies in-memory,
//! Redis and HTTP implementations.

mod macros;
pub(crate) use macros::define_port_error;

mod cache_key;
mod credential_provider;
mod lock_name;
mod named_lock;
mod shared_cache;
mod sheet_store;

pub use cache_key::{CacheKey, CacheKeyValidationError, MAX_CACHE_KEY_LEN};
#[cfg(test)]
pub use credential_provider::MockCredentialProvider;
pub use credential_provider::{BearerToken, CredentialError, CredentialProvider};
pub use lock_name::{LockName, LockNameValidationError};
#[cfg(test)]
pub use named_lock::MockNamedLock;
pub use named_lock::{LockServiceError, NamedLock};
#[cfg(test)]
pub use shared_cache::MockSharedCache;
pub use shared_cache::{SharedCache, SharedCacheError};
#[cfg(test)]
pub use sheet_store::MockSheetStore;
pub use sheet_store::{
    Cell, CellRef, Extent, Row, SheetRange, SheetRangeError, SheetStore, SheetStoreError,
    column_letters,
};
