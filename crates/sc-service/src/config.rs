//! Session Coordinator configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use crate::models::{RoleCapacityPolicy, RoleKind};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default WebSocket + internal HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default health/metrics bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default session expiry check interval in seconds.
pub const DEFAULT_EXPIRY_CHECK_INTERVAL_SECONDS: u64 = 60;

/// Default ward session expiry check interval in seconds.
pub const DEFAULT_WARD_EXPIRY_CHECK_INTERVAL_SECONDS: u64 = 60;

/// Default grace period past a ward session's scheduled end, in seconds.
pub const DEFAULT_WARD_EXPIRY_GRACE_SECONDS: u64 = 60;

/// Default look-back window for the eligibility queue, in hours.
pub const DEFAULT_ELIGIBILITY_WINDOW_HOURS: u64 = 6;

/// Default per-session capacity for the `User` role.
pub const DEFAULT_CAPACITY_USER: u32 = 3;

/// Default per-session capacity for the `Observer` role.
pub const DEFAULT_CAPACITY_OBSERVER: u32 = 1;

/// Default per-session capacity for the `Faculty` role.
pub const DEFAULT_CAPACITY_FACULTY: u32 = 1;

/// Default time allowed for connections to drain on shutdown, in seconds.
pub const DEFAULT_DRAIN_SECONDS: u64 = 5;

/// Session Coordinator configuration.
///
/// Database URL is held in a `SecretString` and redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: SecretString,

    /// WebSocket + internal HTTP bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Health and metrics bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Interval between session expiry checks.
    pub expiry_check_interval_seconds: u64,

    /// Interval between ward session expiry checks.
    pub ward_expiry_check_interval_seconds: u64,

    /// Grace period after a ward session's scheduled end before it is
    /// auto-completed.
    pub ward_expiry_grace_seconds: u64,

    /// Only identities that logged in within this many hours are eligible
    /// for capacity-limited slots.
    pub eligibility_window_hours: u64,

    /// Per-session capacity for `User`.
    pub capacity_user: u32,

    /// Per-session capacity for `Observer`.
    pub capacity_observer: u32,

    /// Per-session capacity for `Faculty`.
    pub capacity_faculty: u32,

    /// Seconds allowed for sockets to flush on shutdown.
    pub drain_seconds: u64,

    /// Emit JSON log lines instead of human-readable output.
    pub log_json: bool,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field(
                "expiry_check_interval_seconds",
                &self.expiry_check_interval_seconds,
            )
            .field(
                "ward_expiry_check_interval_seconds",
                &self.ward_expiry_check_interval_seconds,
            )
            .field("ward_expiry_grace_seconds", &self.ward_expiry_grace_seconds)
            .field("eligibility_window_hours", &self.eligibility_window_hours)
            .field("capacity_user", &self.capacity_user)
            .field("capacity_observer", &self.capacity_observer)
            .field("capacity_faculty", &self.capacity_faculty)
            .field("drain_seconds", &self.drain_seconds)
            .field("log_json", &self.log_json)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = vars
            .get("DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;
        let database_url = SecretString::from(database_url.as_str());

        let bind_address = vars
            .get("SC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("SC_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        // Intervals feed tokio::time::interval, which rejects a zero period.
        let expiry_check_interval_seconds = parse_positive(
            vars,
            "SC_EXPIRY_CHECK_INTERVAL_SECONDS",
            DEFAULT_EXPIRY_CHECK_INTERVAL_SECONDS,
        )?;

        let ward_expiry_check_interval_seconds = parse_positive(
            vars,
            "SC_WARD_EXPIRY_CHECK_INTERVAL_SECONDS",
            DEFAULT_WARD_EXPIRY_CHECK_INTERVAL_SECONDS,
        )?;

        let ward_expiry_grace_seconds = parse_var(
            vars,
            "SC_WARD_EXPIRY_GRACE_SECONDS",
            DEFAULT_WARD_EXPIRY_GRACE_SECONDS,
        )?;

        let eligibility_window_hours = parse_positive(
            vars,
            "SC_ELIGIBILITY_WINDOW_HOURS",
            DEFAULT_ELIGIBILITY_WINDOW_HOURS,
        )?;

        let capacity_user = parse_var(vars, "SC_CAPACITY_USER", DEFAULT_CAPACITY_USER)?;
        let capacity_observer =
            parse_var(vars, "SC_CAPACITY_OBSERVER", DEFAULT_CAPACITY_OBSERVER)?;
        let capacity_faculty = parse_var(vars, "SC_CAPACITY_FACULTY", DEFAULT_CAPACITY_FACULTY)?;

        let drain_seconds = parse_var(vars, "SC_DRAIN_SECONDS", DEFAULT_DRAIN_SECONDS)?;

        let log_json = parse_var(vars, "SC_LOG_JSON", false)?;

        Ok(Config {
            database_url,
            bind_address,
            health_bind_address,
            expiry_check_interval_seconds,
            ward_expiry_check_interval_seconds,
            ward_expiry_grace_seconds,
            eligibility_window_hours,
            capacity_user,
            capacity_observer,
            capacity_faculty,
            drain_seconds,
            log_json,
        })
    }

    /// Build the role capacity policy from the configured limits.
    #[must_use]
    pub fn capacity_policy(&self) -> RoleCapacityPolicy {
        RoleCapacityPolicy::unrestricted()
            .with_limit(RoleKind::User, self.capacity_user)
            .with_limit(RoleKind::Observer, self.capacity_observer)
            .with_limit(RoleKind::Faculty, self.capacity_faculty)
    }

    /// Eligibility look-back window.
    #[must_use]
    pub fn eligibility_window(&self) -> chrono::Duration {
        let hours = i64::try_from(self.eligibility_window_hours).unwrap_or(i64::MAX);
        chrono::Duration::try_hours(hours).unwrap_or(chrono::Duration::MAX)
    }

    /// Ward expiry grace period.
    #[must_use]
    pub fn ward_expiry_grace(&self) -> chrono::Duration {
        let seconds = i64::try_from(self.ward_expiry_grace_seconds).unwrap_or(i64::MAX);
        chrono::Duration::try_seconds(seconds).unwrap_or(chrono::Duration::MAX)
    }

    /// Shutdown drain period.
    #[must_use]
    pub fn drain_period(&self) -> Duration {
        Duration::from_secs(self.drain_seconds)
    }
}

fn parse_var<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match vars.get(key) {
        Some(value_str) => value_str.trim().parse().map_err(|e| {
            ConfigError::InvalidValue(format!("{key} could not be parsed from '{value_str}': {e}"))
        }),
        None => Ok(default),
    }
}

fn parse_positive(
    vars: &HashMap<String, String>,
    key: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let value = parse_var(vars, key, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidValue(format!(
            "{key} must be greater than 0"
        )));
    }
    Ok(value)
}
