//! Redis-backed adapters for the shared cache tier and named locks.
//!
//! Both adapters check connections out of one [`RedisPool`] built on
//! `bb8-redis`, so a deployment opens a single bounded set of connections.

mod cache;
mod lock;
mod pool;

pub use cache::RedisSharedCache;
pub use lock::{RedisLockConfig, RedisNamedLock};
pub use pool::{RedisPool, RedisPoolConfig, RedisPoolError};

use std::time::Duration;

/// Whole milliseconds in `duration`, never less than one.
///
/// Redis rejects zero expiries, so sub-millisecond durations are rounded up.
fn expiry_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Duration::ZERO, 1)]
    #[case(Duration::from_micros(10), 1)]
    #[case(Duration::from_millis(1500), 1500)]
    fn expiries_are_at_least_one_millisecond(#[case] duration: Duration, #[case] expected: u64) {
        assert_eq!(expiry_millis(duration), expected);
    }
}
