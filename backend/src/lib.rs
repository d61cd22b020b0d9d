//! Concurrent mutation and cache-consistency core of the forms board.
//!
//! Records and reactions live in a remote, quota-limited sheet store with no
//! transactions. Writers coordinate through named locks, readers through an
//! epoch-versioned two-tier cache, and every remote call runs through a
//! retrying executor with per-operation circuit breakers.

pub mod domain;
pub mod outbound;
pub mod services;
pub mod settings;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
