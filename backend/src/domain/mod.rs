//! Domain types, services, and driven ports.
//!
//! Purpose: keep every rule about concurrent mutation in one place. The
//! services here talk to the outside world only through the traits in
//! [`ports`], so each can run against in-memory adapters in tests and
//! against Redis and the sheets API in production.
//!
//! Public surface:
//! - Error (alias to `error::Error`): failure payload returned to callers.
//! - ErrorCode (alias to `error::ErrorCode`): stable error identifier.
//! - RecordWriteCoordinator: lock-protected user record writes.
//! - ReactionToggleProtocol: two-phase reaction toggling.

pub mod budget;
pub mod cache;
pub mod error;
pub mod mutation;
pub mod named_lock;
pub mod ports;
pub mod reaction;
pub mod reaction_toggle;
pub mod record_coordinator;
pub mod resilience;
pub mod user_record;

pub use self::error::{Error, ErrorCode, ErrorValidationError};
pub use self::reaction_toggle::{ReactionToggleConfig, ReactionToggleProtocol};
pub use self::record_coordinator::{
    CoordinatorDeps, CreatedRecord, RecordCoordinatorConfig, RecordWriteCoordinator,
};
