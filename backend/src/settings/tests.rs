//! Unit tests for settings parsing.

use super::*;
use mockable::MockEnv;
use rstest::rstest;
use std::collections::HashMap;

fn mock_env(vars: &[(&str, &str)]) -> MockEnv {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
        .collect();
    let mut env = MockEnv::new();
    env.expect_string()
        .times(0..)
        .returning(move |key| vars.get(key).cloned());
    env
}

fn expect_error(result: Result<CoreSettings, SettingsError>, label: &str) -> SettingsError {
    match result {
        Ok(_) => panic!("{label}"),
        Err(error) => error,
    }
}

fn expect_settings(result: Result<CoreSettings, SettingsError>) -> CoreSettings {
    match result {
        Ok(settings) => settings,
        Err(error) => panic!("settings should parse: {error}"),
    }
}

#[rstest]
fn empty_environment_yields_defaults() {
    let settings = expect_settings(CoreSettings::from_env(&mock_env(&[])));

    assert_eq!(settings.execution_ceiling, Duration::from_secs(30));
    assert_eq!(settings.record_lock_timeout, Duration::from_secs(5));
    assert_eq!(settings.reaction_guard_ttl, Duration::from_secs(6));
    assert_eq!(settings.breaker, CircuitBreakerConfig::default());
    assert_eq!(settings.users_sheet, "Users");
    assert!(settings.adapters.redis_url.is_none());
    assert!(settings.adapters.sheets_token.is_none());
}

#[rstest]
fn values_are_read_from_prefixed_variables() {
    let env = mock_env(&[
        (RETRY_MAX_ENV, "5"),
        (RETRY_BASE_DELAY_ENV, "50"),
        (RETRY_MULTIPLIER_ENV, "1.5"),
        (BREAKER_FAILURES_ENV, "3"),
        (USERS_SHEET_ENV, " Members "),
        (REDIS_URL_ENV, "redis://cache:6379"),
        (SHEETS_TOKEN_ENV, "secret"),
    ]);

    let settings = expect_settings(CoreSettings::from_env(&env));

    assert_eq!(settings.retry.max_retries, 5);
    assert_eq!(settings.retry.base_delay, Duration::from_millis(50));
    assert!((settings.retry.backoff_multiplier - 1.5).abs() < f64::EPSILON);
    assert_eq!(settings.breaker.failure_threshold, 3);
    assert_eq!(settings.record_config().sheet, "Members");
    assert_eq!(
        settings.adapters.redis_url.as_deref(),
        Some("redis://cache:6379")
    );
    assert_eq!(
        settings.adapters.sheets_token.as_ref().map(|token| token.as_str()),
        Some("secret")
    );
}

#[rstest]
#[case(RECORD_LOCK_TIMEOUT_ENV, "soon", INTEGER_EXPECTED)]
#[case(LOCAL_CACHE_CAPACITY_ENV, "-1", INTEGER_EXPECTED)]
#[case(RETRY_MULTIPLIER_ENV, "0.5", MULTIPLIER_EXPECTED)]
#[case(BOARD_SHEET_ENV, "  ", TEXT_EXPECTED)]
fn malformed_values_are_rejected(
    #[case] name: &'static str,
    #[case] value: &str,
    #[case] expected: &'static str,
) {
    let err = expect_error(
        CoreSettings::from_env(&mock_env(&[(name, value)])),
        "expected malformed value to fail",
    );

    match err {
        SettingsError::InvalidEnv {
            name: reported,
            expected: reported_expected,
            ..
        } => {
            assert_eq!(reported, name);
            assert_eq!(reported_expected, expected);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[rstest]
#[case(&[(RECORD_LOCK_TIMEOUT_ENV, "25000")], SettingsError::LockTimeoutTooLong { name: RECORD_LOCK_TIMEOUT_ENV })]
#[case(&[(REACTION_GUARD_TTL_ENV, "3000")], SettingsError::GuardTtlTooShort)]
#[case(&[(SAFETY_MARGIN_ENV, "30000")], SettingsError::MarginTooLarge)]
#[case(&[(RETRY_BASE_DELAY_ENV, "9000")], SettingsError::BaseDelayExceedsMax)]
#[case(&[(BREAKER_FAILURES_ENV, "0")], SettingsError::Zero { name: BREAKER_FAILURES_ENV })]
fn inconsistent_values_fail_validation(
    #[case] vars: &[(&str, &str)],
    #[case] expected: SettingsError,
) {
    let err = expect_error(
        CoreSettings::from_env(&mock_env(vars)),
        "expected validation to fail",
    );
    assert_eq!(err, expected);
}

#[rstest]
fn derived_configs_follow_settings() {
    let env = mock_env(&[
        (REACTION_LOCK_TIMEOUT_ENV, "1500"),
        (REACTION_GUARD_TTL_ENV, "4000"),
        (REACTION_COLUMN_ENV, "5"),
    ]);
    let settings = expect_settings(CoreSettings::from_env(&env));

    let reaction = settings.reaction_config();

    assert_eq!(reaction.column, 5);
    assert_eq!(reaction.lock_timeout, Duration::from_millis(1500));
    assert_eq!(reaction.guard_ttl, Duration::from_secs(4));
}

#[rstest]
#[case(&[])]
#[case(&[(EXECUTION_CEILING_ENV, "90000"), (SAFETY_MARGIN_ENV, "10000")])]
#[case(&[(EXECUTION_CEILING_ENV, "8000"), (SAFETY_MARGIN_ENV, "1000"), (RECORD_LOCK_TIMEOUT_ENV, "2000"), (REACTION_LOCK_TIMEOUT_ENV, "1000"), (REACTION_GUARD_TTL_ENV, "2000")])]
fn lock_leases_outlast_every_request(#[case] vars: &[(&str, &str)]) {
    let settings = expect_settings(CoreSettings::from_env(&mock_env(vars)));

    let lease = settings.lock_lease();

    assert_eq!(lease, settings.execution_ceiling);
    assert!(lease > settings.execution_ceiling - settings.safety_margin);
    assert!(lease > settings.record_lock_timeout);
}
