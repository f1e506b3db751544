//! Error types for poolguard
//!
//! This module defines all error types that can occur in the resource manager.
//! We use the `thiserror` crate to make error definitions concise and ergonomic.
//!
//! ## Design Philosophy
//!
//! - Errors local to a single query are counted in the statistics layer and
//!   re-thrown to the immediate caller
//! - Probe failures stay inside the recovery controller and only surface to
//!   application callers as `PoolUnavailable` while a rebuild is in flight
//! - Only `RecoveryExhausted` (and a failed shutdown sequence) is fatal to
//!   the process
//! - A shutdown deadline elapsing is deliberately not an error value: the
//!   coordinator logs it, marks the outstanding cleanups orphaned, and
//!   folds it into the process exit code

use crate::pool::PoolState;
use thiserror::Error;

/// Result type alias for operations that can fail
///
/// Instead of writing `Result<T, Error>` everywhere, we can just write `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors that can occur in the resource manager
#[derive(Error, Debug)]
pub enum Error {
    /// Connection-level failure on the probe path
    ///
    /// Triggers recovery when seen by the health monitor; never surfaced to
    /// application callers as-is.
    #[error("transient connection failure: {0}")]
    TransientConnection(String),

    /// Single-call failure (constraint, syntax, acquisition, or connectivity
    /// within one statement or transaction)
    ///
    /// Propagated synchronously to the caller and counted in `error_count`.
    #[error("query failed: {0}")]
    Query(String),

    /// The pool is not accepting work in its current state
    ///
    /// Returned while `Recovering`, `ShuttingDown` or `Closed` so callers get
    /// a clear, retryable error instead of hanging.
    #[error("connection pool unavailable (state: {0})")]
    PoolUnavailable(PoolState),

    /// Recovery gave up after the configured number of rebuild attempts
    ///
    /// Fatal: continuing to serve traffic against an unreachable datastore is
    /// worse than restarting under process-supervisor control.
    #[error("recovery exhausted after {attempts} attempts")]
    RecoveryExhausted { attempts: u32 },

    /// Error from the shared cache connection
    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    /// Serialization/deserialization of a cached value failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration (environment variable or programmatic)
    #[error("configuration error: {0}")]
    Config(String),
}

// Helper implementations to make error creation more ergonomic

impl Error {
    /// Creates a Query error from any displayable error
    pub fn query<E: std::fmt::Display>(err: E) -> Self {
        Self::Query(err.to_string())
    }

    /// Creates a TransientConnection error from any displayable error
    pub fn transient<E: std::fmt::Display>(err: E) -> Self {
        Self::TransientConnection(err.to_string())
    }

    /// Creates a ConfigError from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::RecoveryExhausted { attempts: 5 };
        assert_eq!(err.to_string(), "recovery exhausted after 5 attempts");
    }

    #[test]
    fn test_error_helpers() {
        let err = Error::config("DB_POOL_MIN exceeds DB_POOL_MAX");
        assert!(matches!(err, Error::Config(_)));

        let err = Error::query("syntax error at or near SELECT");
        assert!(matches!(err, Error::Query(_)));
    }

    #[test]
    fn test_pool_unavailable_display() {
        let err = Error::PoolUnavailable(PoolState::Recovering);
        assert_eq!(
            err.to_string(),
            "connection pool unavailable (state: recovering)"
        );
    }
}
