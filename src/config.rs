//! Configuration management
//!
//! All recognized options come from environment variables with sensible
//! defaults, so the manager can be constructed with `ManagerConfig::from_env()`
//! in production and with explicit values in tests.
//!
//! ## Recognized environment variables
//!
//! | Variable                    | Default                           | Meaning                              |
//! |-----------------------------|-----------------------------------|--------------------------------------|
//! | `DATABASE_URL`              | `postgresql://localhost/postgres` | Relational datastore connection URL  |
//! | `REDIS_URL`                 | `redis://localhost:6379`          | Shared cache connection URL          |
//! | `SHUTDOWN_TIMEOUT`          | `30000` (ms)                      | Graceful-shutdown deadline           |
//! | `DB_HEALTH_CHECK_INTERVAL`  | `30000` (ms)                      | Liveness probe interval              |
//! | `DB_MAX_RECONNECT_ATTEMPTS` | `5`                               | Recovery attempts before fatal exit  |
//! | `DB_SLOW_QUERY_THRESHOLD`   | `1000` (ms)                       | Queries slower than this are logged  |
//! | `DB_POOL_MAX`               | `10`                              | Connection ceiling                   |
//! | `DB_POOL_MIN`               | `2`                               | Warm-up floor after build/rebuild    |

use crate::error::{Error, Result};
use crate::recovery::BackoffPolicy;
use std::time::Duration;

const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/postgres";
const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_HEALTH_CHECK_INTERVAL_MS: u64 = 30_000;
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_SLOW_QUERY_THRESHOLD_MS: u64 = 1_000;
const DEFAULT_POOL_MAX: usize = 10;
const DEFAULT_POOL_MIN: usize = 2;

/// Complete configuration for the resource manager
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Relational datastore connection URL
    pub database_url: String,

    /// Shared cache connection URL
    pub redis_url: String,

    /// Connection ceiling for the pool
    pub pool_max: usize,

    /// Connections acquired eagerly after each build/rebuild
    pub pool_min: usize,

    /// Queries slower than this are counted and logged at warning level
    pub slow_query_threshold: Duration,

    /// How often the health monitor issues its liveness probe
    pub health_check_interval: Duration,

    /// Rebuild attempts before recovery is treated as fatal
    pub max_reconnect_attempts: u32,

    /// Deadline for the concurrent cleanup phase of graceful shutdown
    pub shutdown_timeout: Duration,

    /// Backoff schedule between rebuild attempts
    pub backoff: BackoffPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            pool_max: DEFAULT_POOL_MAX,
            pool_min: DEFAULT_POOL_MIN,
            slow_query_threshold: Duration::from_millis(DEFAULT_SLOW_QUERY_THRESHOLD_MS),
            health_check_interval: Duration::from_millis(DEFAULT_HEALTH_CHECK_INTERVAL_MS),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl ManagerConfig {
    /// Create configuration from environment variables
    ///
    /// Unset or unparseable variables fall back to their defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: env_string("DATABASE_URL", DEFAULT_DATABASE_URL),
            redis_url: env_string("REDIS_URL", DEFAULT_REDIS_URL),
            pool_max: env_parse("DB_POOL_MAX", DEFAULT_POOL_MAX),
            pool_min: env_parse("DB_POOL_MIN", DEFAULT_POOL_MIN),
            slow_query_threshold: Duration::from_millis(env_parse(
                "DB_SLOW_QUERY_THRESHOLD",
                DEFAULT_SLOW_QUERY_THRESHOLD_MS,
            )),
            health_check_interval: Duration::from_millis(env_parse(
                "DB_HEALTH_CHECK_INTERVAL",
                DEFAULT_HEALTH_CHECK_INTERVAL_MS,
            )),
            max_reconnect_attempts: env_parse(
                "DB_MAX_RECONNECT_ATTEMPTS",
                DEFAULT_MAX_RECONNECT_ATTEMPTS,
            ),
            shutdown_timeout: Duration::from_millis(env_parse(
                "SHUTDOWN_TIMEOUT",
                DEFAULT_SHUTDOWN_TIMEOUT_MS,
            )),
            backoff: BackoffPolicy::default(),
        }
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.pool_max == 0 {
            return Err(Error::config("DB_POOL_MAX must be at least 1"));
        }
        if self.pool_min > self.pool_max {
            return Err(Error::config(format!(
                "DB_POOL_MIN ({}) exceeds DB_POOL_MAX ({})",
                self.pool_min, self.pool_max
            )));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(Error::config("DB_MAX_RECONNECT_ATTEMPTS must be at least 1"));
        }
        Ok(())
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.pool_max, 10);
        assert_eq!(config.pool_min, 2);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.health_check_interval, Duration::from_secs(30));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.slow_query_threshold, Duration::from_millis(1000));
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let config = ManagerConfig {
            pool_min: 20,
            pool_max: 10,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_ceiling() {
        let config = ManagerConfig {
            pool_max: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(ManagerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        // Variable is unset in the test environment
        assert_eq!(env_parse("POOLGUARD_DOES_NOT_EXIST", 42u64), 42);
    }
}
