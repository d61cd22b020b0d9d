//! Environment-driven settings for the mutation core.
//!
//! Every value has a default, so an empty environment yields a working
//! in-memory configuration. Values that are present but malformed are
//! rejected rather than silently replaced.

use std::str::FromStr;
use std::time::Duration;

use mockable::Env;
use zeroize::Zeroizing;

use crate::domain::resilience::{CircuitBreakerConfig, RetryPolicy};
use crate::domain::{ReactionToggleConfig, RecordCoordinatorConfig};

const EXECUTION_CEILING_ENV: &str = "FORMBOARD_EXECUTION_CEILING_MS";
const SAFETY_MARGIN_ENV: &str = "FORMBOARD_SAFETY_MARGIN_MS";
const RECORD_LOCK_TIMEOUT_ENV: &str = "FORMBOARD_RECORD_LOCK_TIMEOUT_MS";
const REACTION_LOCK_TIMEOUT_ENV: &str = "FORMBOARD_REACTION_LOCK_TIMEOUT_MS";
const REACTION_GUARD_TTL_ENV: &str = "FORMBOARD_REACTION_GUARD_TTL_MS";
const RECORD_CACHE_TTL_ENV: &str = "FORMBOARD_RECORD_CACHE_TTL_SECS";
const REACTION_CACHE_TTL_ENV: &str = "FORMBOARD_REACTION_CACHE_TTL_SECS";
const LOCAL_CACHE_TTL_ENV: &str = "FORMBOARD_LOCAL_CACHE_TTL_SECS";
const LOCAL_CACHE_CAPACITY_ENV: &str = "FORMBOARD_LOCAL_CACHE_CAPACITY";
const RETRY_MAX_ENV: &str = "FORMBOARD_RETRY_MAX";
const RETRY_BASE_DELAY_ENV: &str = "FORMBOARD_RETRY_BASE_DELAY_MS";
const RETRY_MAX_DELAY_ENV: &str = "FORMBOARD_RETRY_MAX_DELAY_MS";
const RETRY_MULTIPLIER_ENV: &str = "FORMBOARD_RETRY_MULTIPLIER";
const BREAKER_FAILURES_ENV: &str = "FORMBOARD_BREAKER_FAILURE_THRESHOLD";
const BREAKER_WINDOW_ENV: &str = "FORMBOARD_BREAKER_WINDOW_SECS";
const BREAKER_RESET_ENV: &str = "FORMBOARD_BREAKER_RESET_SECS";
const BREAKER_SUCCESSES_ENV: &str = "FORMBOARD_BREAKER_SUCCESS_THRESHOLD";
const USERS_SHEET_ENV: &str = "FORMBOARD_USERS_SHEET";
const BOARD_SHEET_ENV: &str = "FORMBOARD_BOARD_SHEET";
const REACTION_COLUMN_ENV: &str = "FORMBOARD_REACTION_COLUMN";
const REDIS_URL_ENV: &str = "FORMBOARD_REDIS_URL";
const SHEETS_API_BASE_ENV: &str = "FORMBOARD_SHEETS_API_BASE";
const SPREADSHEET_ID_ENV: &str = "FORMBOARD_SPREADSHEET_ID";
const SHEETS_TOKEN_ENV: &str = "FORMBOARD_SHEETS_TOKEN";

const INTEGER_EXPECTED: &str = "a non-negative integer";
const MULTIPLIER_EXPECTED: &str = "a number >= 1";
const TEXT_EXPECTED: &str = "non-blank text";

/// Where the backing services live. Absent values select in-memory adapters.
#[derive(Clone, Default)]
pub struct AdapterSettings {
    /// Redis connection URL for the shared cache tier and named locks.
    pub redis_url: Option<String>,
    /// Base URL of the sheets API; the adapter's default when absent.
    pub sheets_api_base: Option<String>,
    /// Spreadsheet holding the users and board sheets.
    pub spreadsheet_id: Option<String>,
    /// Bearer token for the sheets API.
    pub sheets_token: Option<Zeroizing<String>>,
}

/// Settings for the coordinators and their adapters.
#[derive(Clone)]
pub struct CoreSettings {
    /// Hard wall-clock ceiling of one request.
    pub execution_ceiling: Duration,
    /// Time reserved at the end of the ceiling for releasing locks.
    pub safety_margin: Duration,
    /// Longest wait for a record or create-barrier lock.
    pub record_lock_timeout: Duration,
    /// Longest wait for a reaction row lock.
    pub reaction_lock_timeout: Duration,
    /// Lifetime of the reaction fast-path guard.
    pub reaction_guard_ttl: Duration,
    /// Shared-tier lifetime of cached records.
    pub record_cache_ttl: Duration,
    /// Shared-tier lifetime of cached reaction states.
    pub reaction_cache_ttl: Duration,
    /// Local-tier lifetime of promoted entries.
    pub local_cache_ttl: Duration,
    /// Entry bound of the local tier.
    pub local_cache_capacity: usize,
    /// Backoff for remote calls.
    pub retry: RetryPolicy,
    /// Breaker tuning shared by every operation class.
    pub breaker: CircuitBreakerConfig,
    /// Sheet holding user rows.
    pub users_sheet: String,
    /// Sheet holding board rows.
    pub board_sheet: String,
    /// 1-based column holding reaction cells on the board sheet.
    pub reaction_column: u32,
    /// Backing service endpoints.
    pub adapters: AdapterSettings,
}

impl Default for CoreSettings {
    fn default() -> Self {
        let record = RecordCoordinatorConfig::default();
        let reaction = ReactionToggleConfig::default();
        Self {
            execution_ceiling: Duration::from_secs(30),
            safety_margin: Duration::from_secs(5),
            record_lock_timeout: record.lock_timeout,
            reaction_lock_timeout: reaction.lock_timeout,
            reaction_guard_ttl: reaction.guard_ttl,
            record_cache_ttl: record.cache_ttl,
            reaction_cache_ttl: reaction.cache_ttl,
            local_cache_ttl: Duration::from_secs(5),
            local_cache_capacity: 1024,
            retry: RetryPolicy::default(),
            breaker: CircuitBreakerConfig::default(),
            users_sheet: record.sheet,
            board_sheet: "Posts".to_owned(),
            reaction_column: reaction.column,
            adapters: AdapterSettings::default(),
        }
    }
}

/// Errors raised while reading or validating settings.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum SettingsError {
    /// A variable is present but contains an invalid value.
    #[error("invalid value for {name}='{value}'; expected {expected}")]
    InvalidEnv {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
    /// A lock wait would not fit in the usable execution budget.
    #[error("{name} must be shorter than the execution ceiling minus the safety margin")]
    LockTimeoutTooLong { name: &'static str },
    /// The reaction guard would expire while its toggle may still run.
    #[error("FORMBOARD_REACTION_GUARD_TTL_MS must exceed FORMBOARD_REACTION_LOCK_TIMEOUT_MS")]
    GuardTtlTooShort,
    /// The safety margin swallows the whole ceiling.
    #[error("FORMBOARD_SAFETY_MARGIN_MS must be shorter than FORMBOARD_EXECUTION_CEILING_MS")]
    MarginTooLarge,
    /// Base retry delay above the maximum delay.
    #[error("FORMBOARD_RETRY_BASE_DELAY_MS must not exceed FORMBOARD_RETRY_MAX_DELAY_MS")]
    BaseDelayExceedsMax,
    /// A threshold or count that must be positive is zero.
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },
}

impl CoreSettings {
    /// Read settings from `FORMBOARD_*` variables and validate them.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use formboard::settings::CoreSettings;
    /// use mockable::MockEnv;
    ///
    /// let mut env = MockEnv::new();
    /// env.expect_string().returning(|name| match name {
    ///     "FORMBOARD_RECORD_LOCK_TIMEOUT_MS" => Some("2500".to_owned()),
    ///     _ => None,
    /// });
    ///
    /// let settings = CoreSettings::from_env(&env).map_err(|error| error.to_string());
    /// assert_eq!(
    ///     settings.map(|settings| settings.record_lock_timeout.as_millis()),
    ///     Ok(2500)
    /// );
    /// ```
    pub fn from_env<E: Env>(env: &E) -> Result<Self, SettingsError> {
        let defaults = Self::default();
        let settings = Self {
            execution_ceiling: millis_from_env(env, EXECUTION_CEILING_ENV, defaults.execution_ceiling)?,
            safety_margin: millis_from_env(env, SAFETY_MARGIN_ENV, defaults.safety_margin)?,
            record_lock_timeout: millis_from_env(
                env,
                RECORD_LOCK_TIMEOUT_ENV,
                defaults.record_lock_timeout,
            )?,
            reaction_lock_timeout: millis_from_env(
                env,
                REACTION_LOCK_TIMEOUT_ENV,
                defaults.reaction_lock_timeout,
            )?,
            reaction_guard_ttl: millis_from_env(
                env,
                REACTION_GUARD_TTL_ENV,
                defaults.reaction_guard_ttl,
            )?,
            record_cache_ttl: secs_from_env(env, RECORD_CACHE_TTL_ENV, defaults.record_cache_ttl)?,
            reaction_cache_ttl: secs_from_env(
                env,
                REACTION_CACHE_TTL_ENV,
                defaults.reaction_cache_ttl,
            )?,
            local_cache_ttl: secs_from_env(env, LOCAL_CACHE_TTL_ENV, defaults.local_cache_ttl)?,
            local_cache_capacity: parsed_from_env(
                env,
                LOCAL_CACHE_CAPACITY_ENV,
                defaults.local_cache_capacity,
                INTEGER_EXPECTED,
            )?,
            retry: retry_from_env(env, defaults.retry)?,
            breaker: breaker_from_env(env, defaults.breaker)?,
            users_sheet: text_from_env(env, USERS_SHEET_ENV, defaults.users_sheet)?,
            board_sheet: text_from_env(env, BOARD_SHEET_ENV, defaults.board_sheet)?,
            reaction_column: parsed_from_env(
                env,
                REACTION_COLUMN_ENV,
                defaults.reaction_column,
                INTEGER_EXPECTED,
            )?,
            adapters: AdapterSettings {
                redis_url: optional_from_env(env, REDIS_URL_ENV),
                sheets_api_base: optional_from_env(env, SHEETS_API_BASE_ENV),
                spreadsheet_id: optional_from_env(env, SPREADSHEET_ID_ENV),
                sheets_token: optional_from_env(env, SHEETS_TOKEN_ENV).map(Zeroizing::new),
            },
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Check relationships between values.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.safety_margin >= self.execution_ceiling {
            return Err(SettingsError::MarginTooLarge);
        }
        let usable = self.execution_ceiling - self.safety_margin;
        if self.record_lock_timeout >= usable {
            return Err(SettingsError::LockTimeoutTooLong {
                name: RECORD_LOCK_TIMEOUT_ENV,
            });
        }
        if self.reaction_lock_timeout >= usable {
            return Err(SettingsError::LockTimeoutTooLong {
                name: REACTION_LOCK_TIMEOUT_ENV,
            });
        }
        if self.reaction_guard_ttl <= self.reaction_lock_timeout {
            return Err(SettingsError::GuardTtlTooShort);
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(SettingsError::BaseDelayExceedsMax);
        }
        let positive = [
            (BREAKER_FAILURES_ENV, u64::from(self.breaker.failure_threshold)),
            (BREAKER_SUCCESSES_ENV, u64::from(self.breaker.success_threshold)),
            (REACTION_COLUMN_ENV, u64::from(self.reaction_column)),
            (
                LOCAL_CACHE_CAPACITY_ENV,
                u64::try_from(self.local_cache_capacity).unwrap_or(u64::MAX),
            ),
        ];
        if let Some((name, _)) = positive.into_iter().find(|(_, value)| *value == 0) {
            return Err(SettingsError::Zero { name });
        }
        Ok(())
    }

    /// Lease on a distributed lock grant. A holder cannot outlive its
    /// request's ceiling, so a grant lapses only once its holder is gone.
    pub fn lock_lease(&self) -> Duration {
        self.execution_ceiling
    }

    /// Record coordinator tuning.
    pub fn record_config(&self) -> RecordCoordinatorConfig {
        RecordCoordinatorConfig {
            sheet: self.users_sheet.clone(),
            lock_timeout: self.record_lock_timeout,
            cache_ttl: self.record_cache_ttl,
            policy: self.retry,
        }
    }

    /// Reaction protocol tuning.
    pub fn reaction_config(&self) -> ReactionToggleConfig {
        ReactionToggleConfig {
            column: self.reaction_column,
            lock_timeout: self.reaction_lock_timeout,
            guard_ttl: self.reaction_guard_ttl,
            cache_ttl: self.reaction_cache_ttl,
            policy: self.retry,
        }
    }
}

fn retry_from_env<E: Env>(env: &E, defaults: RetryPolicy) -> Result<RetryPolicy, SettingsError> {
    let backoff_multiplier = parsed_from_env(
        env,
        RETRY_MULTIPLIER_ENV,
        defaults.backoff_multiplier,
        MULTIPLIER_EXPECTED,
    )?;
    if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
        return Err(SettingsError::InvalidEnv {
            name: RETRY_MULTIPLIER_ENV,
            value: backoff_multiplier.to_string(),
            expected: MULTIPLIER_EXPECTED,
        });
    }
    Ok(RetryPolicy {
        max_retries: parsed_from_env(env, RETRY_MAX_ENV, defaults.max_retries, INTEGER_EXPECTED)?,
        base_delay: millis_from_env(env, RETRY_BASE_DELAY_ENV, defaults.base_delay)?,
        max_delay: millis_from_env(env, RETRY_MAX_DELAY_ENV, defaults.max_delay)?,
        backoff_multiplier,
    })
}

fn breaker_from_env<E: Env>(
    env: &E,
    defaults: CircuitBreakerConfig,
) -> Result<CircuitBreakerConfig, SettingsError> {
    Ok(CircuitBreakerConfig {
        failure_threshold: parsed_from_env(
            env,
            BREAKER_FAILURES_ENV,
            defaults.failure_threshold,
            INTEGER_EXPECTED,
        )?,
        monitor_window: secs_from_env(env, BREAKER_WINDOW_ENV, defaults.monitor_window)?,
        reset_timeout: secs_from_env(env, BREAKER_RESET_ENV, defaults.reset_timeout)?,
        success_threshold: parsed_from_env(
            env,
            BREAKER_SUCCESSES_ENV,
            defaults.success_threshold,
            INTEGER_EXPECTED,
        )?,
    })
}

fn parsed_from_env<E: Env, T: FromStr>(
    env: &E,
    name: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, SettingsError> {
    match env.string(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| SettingsError::InvalidEnv {
                name,
                value,
                expected,
            }),
        None => Ok(default),
    }
}

fn millis_from_env<E: Env>(
    env: &E,
    name: &'static str,
    default: Duration,
) -> Result<Duration, SettingsError> {
    let fallback = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parsed_from_env(env, name, fallback, INTEGER_EXPECTED).map(Duration::from_millis)
}

fn secs_from_env<E: Env>(
    env: &E,
    name: &'static str,
    default: Duration,
) -> Result<Duration, SettingsError> {
    parsed_from_env(env, name, default.as_secs(), INTEGER_EXPECTED).map(Duration::from_secs)
}

fn text_from_env<E: Env>(
    env: &E,
    name: &'static str,
    default: String,
) -> Result<String, SettingsError> {
    match env.string(name) {
        Some(value) if value.trim().is_empty() => Err(SettingsError::InvalidEnv {
            name,
            value,
            expected: TEXT_EXPECTED,
        }),
        Some(value) => Ok(value.trim().to_owned()),
        None => Ok(default),
    }
}

fn optional_from_env<E: Env>(env: &E, name: &'static str) -> Option<String> {
    env.string(name)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests;
