//! Port abstraction for named mutual exclusion.
//!
//! Adapters grant at most one holder per [`LockName`] across every process
//! sharing the backend. Acquisition waits up to the supplied timeout and
//! reports contention as `Ok(false)` rather than an error.

use std::time::Duration;

use async_trait::async_trait;

use super::LockName;
use super::define_port_error;

define_port_error! {
    /// Errors raised by lock service adapters.
    pub enum LockServiceError {
        /// The lock backend could not be reached or failed the command.
        Backend { message: String } => "lock backend failure: {message}",
        /// The lock was released by a caller that does not hold it.
        NotHeld { name: String } => "lock {name} is not held by this process",
    }
}

/// Named lock service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NamedLock: Send + Sync {
    /// Try to take `name`, waiting up to `timeout` for a current holder.
    ///
    /// Returns `Ok(true)` when granted and `Ok(false)` on timeout.
    async fn try_acquire(&self, name: &LockName, timeout: Duration)
    -> Result<bool, LockServiceError>;

    /// Release `name` previously granted to this caller.
    async fn release(&self, name: &LockName) -> Result<(), LockServiceError>;
}
