//! Process-local adapters.
//!
//! These honour the same contracts as the networked adapters but only
//! coordinate tasks within one process.

mod cache;
mod lock;
mod sheet_store;

pub use cache::InMemorySharedCache;
pub use lock::InMemoryNamedLock;
pub use sheet_store::InMemorySheetStore;
