//! Config environment variable tests
//!
//! These tests verify that Config::from_env() correctly reads and applies
//! environment variable overrides. Config::from_env() also loads a .env file
//! via dotenvy if one exists, so each test sets every variable it asserts on.
//!
//! Tests use #[serial] to prevent race conditions with shared env vars.

use abtest_session::config::{Config, LogFormat};
use abtest_session::storage::{SameSite, StorageLocation};
use serial_test::serial;
use std::env;

/// Remove the given variables when dropped.
struct EnvGuard(&'static [&'static str]);

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for key in self.0 {
            env::remove_var(key);
        }
    }
}

#[test]
#[serial]
fn test_config_from_env_loads_successfully() {
    let result = Config::from_env();
    assert!(result.is_ok(), "Config::from_env() should succeed: {:?}", result.err());
}

#[test]
#[serial]
fn test_config_from_env_custom_service() {
    let _guard = EnvGuard(&["AB_BASE_URL", "AB_TIMEOUT_MS", "AB_IP_ADDRESS", "AB_USER_AGENT"]);
    env::set_var("AB_BASE_URL", "https://ab.example.com");
    env::set_var("AB_TIMEOUT_MS", "750");
    env::set_var("AB_IP_ADDRESS", "10.1.2.3");
    env::set_var("AB_USER_AGENT", "abtest-cli/1.0");

    let config = Config::from_env().unwrap();
    assert_eq!(config.service.base_url, "https://ab.example.com");
    assert_eq!(config.request.timeout_ms, 750);
    assert_eq!(config.service.ip_address.as_deref(), Some("10.1.2.3"));
    assert_eq!(config.service.user_agent.as_deref(), Some("abtest-cli/1.0"));
}

#[test]
#[serial]
fn test_config_from_env_sample_rate_is_clamped() {
    let _guard = EnvGuard(&["AB_TELEMETRY_SAMPLE_RATE"]);
    env::set_var("AB_TELEMETRY_SAMPLE_RATE", "7");

    let config = Config::from_env().unwrap();
    assert_eq!(config.request.telemetry_sample_rate, 1.0);
}

#[test]
#[serial]
fn test_config_from_env_identity_overrides() {
    let _guard = EnvGuard(&[
        "AB_PERSIST",
        "AB_CLIENT_ID",
        "AB_SESSION_ID",
        "AB_CLIENT_ID_STORAGE",
        "AB_SESSION_ID_STORAGE",
    ]);
    env::set_var("AB_PERSIST", "false");
    env::set_var("AB_CLIENT_ID", "mike");
    env::set_var("AB_SESSION_ID", "12");
    env::set_var("AB_CLIENT_ID_STORAGE", "local");
    env::set_var("AB_SESSION_ID_STORAGE", "Cookie");

    let config = Config::from_env().unwrap();
    assert!(!config.identity.persist);
    assert_eq!(config.identity.client_id.as_deref(), Some("mike"));
    assert_eq!(config.identity.session_id, Some(12));
    assert_eq!(config.identity.client_id_storage, StorageLocation::Local);
    assert_eq!(config.identity.session_id_storage, StorageLocation::Cookie);
}

#[test]
#[serial]
fn test_config_from_env_invalid_storage_location() {
    let _guard = EnvGuard(&["AB_CLIENT_ID_STORAGE"]);
    env::set_var("AB_CLIENT_ID_STORAGE", "sessionStorage");

    let err = Config::from_env().unwrap_err();
    assert!(err.to_string().contains("AB_CLIENT_ID_STORAGE"));
}

#[test]
#[serial]
fn test_config_from_env_cookie_attributes() {
    let _guard = EnvGuard(&[
        "AB_COOKIE_DOMAIN",
        "AB_COOKIE_SECURE",
        "AB_COOKIE_SAMESITE",
        "AB_COOKIE_DAYS_TO_LIVE",
    ]);
    env::set_var("AB_COOKIE_DOMAIN", "example.com");
    env::set_var("AB_COOKIE_SECURE", "1");
    env::set_var("AB_COOKIE_SAMESITE", "strict");
    env::set_var("AB_COOKIE_DAYS_TO_LIVE", "30");

    let config = Config::from_env().unwrap();
    assert_eq!(config.cookies.domain.as_deref(), Some("example.com"));
    assert!(config.cookies.secure);
    assert_eq!(config.cookies.same_site, Some(SameSite::Strict));
    assert_eq!(config.cookies.days_to_live, 30);
}

#[test]
#[serial]
fn test_config_from_env_invalid_samesite() {
    let _guard = EnvGuard(&["AB_COOKIE_SAMESITE"]);
    env::set_var("AB_COOKIE_SAMESITE", "sometimes");

    assert!(Config::from_env().is_err());
}

#[test]
#[serial]
fn test_config_from_env_experiment_prefixes() {
    let _guard = EnvGuard(&["AB_EXPERIMENT_PREFIX", "AB_FORCE_PREFIX"]);
    env::set_var("AB_EXPERIMENT_PREFIX", "exp_");
    env::set_var("AB_FORCE_PREFIX", "MyAB");

    let config = Config::from_env().unwrap();
    assert_eq!(config.experiments.cookie_prefix, "exp_");
    assert_eq!(config.experiments.force_prefix, "MyAB");
}

#[test]
#[serial]
fn test_config_from_env_custom_database() {
    let _guard = EnvGuard(&["DATABASE_PATH", "DATABASE_MAX_CONNECTIONS"]);
    env::set_var("DATABASE_PATH", "/custom/path.db");
    env::set_var("DATABASE_MAX_CONNECTIONS", "10");

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.path.to_str().unwrap(), "/custom/path.db");
    assert_eq!(config.database.max_connections, 10);
}

#[test]
#[serial]
fn test_config_from_env_json_log_format() {
    let _guard = EnvGuard(&["LOG_FORMAT", "LOG_LEVEL"]);
    env::set_var("LOG_FORMAT", "json");
    env::set_var("LOG_LEVEL", "debug");

    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.logging.level, "debug");
}

#[test]
#[serial]
fn test_config_from_env_unparseable_numbers_use_defaults() {
    let _guard = EnvGuard(&["AB_TIMEOUT_MS", "AB_COOKIE_DAYS_TO_LIVE"]);
    env::set_var("AB_TIMEOUT_MS", "soon");
    env::set_var("AB_COOKIE_DAYS_TO_LIVE", "forever");

    let config = Config::from_env().unwrap();
    assert_eq!(config.request.timeout_ms, 2000);
    assert_eq!(config.cookies.days_to_live, 365);
}
