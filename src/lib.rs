//! # poolguard
//!
//! Lifecycle and resilience manager for a service's external resources:
//! a PostgreSQL connection pool, a Redis cache, a distributed rate limiter,
//! and the recovery and shutdown machinery that keeps them honest.
//!
//! ```text
//!                    ┌─────────────────────┐
//!                    │   ResourceManager    │
//!                    └──────────┬──────────┘
//!        ┌──────────────┬──────┴───────┬───────────────┐
//!        ▼              ▼              ▼               ▼
//!  ┌───────────┐ ┌─────────────┐ ┌───────────┐ ┌──────────────┐
//!  │PoolManager│ │CacheAccessor│ │RateLimiter│ │  Shutdown    │
//!  │(postgres) │ │   (redis)   │ │  (redis)  │ │ Coordinator  │
//!  └─────┬─────┘ └─────────────┘ └───────────┘ └──────────────┘
//!        │ probed by
//!  ┌─────┴─────────┐   drives    ┌────────────────────┐
//!  │ HealthMonitor ├────────────▶│ RecoveryController │
//!  └───────────────┘             └────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use poolguard::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     poolguard::telemetry::init_tracing();
//!
//!     let manager = ResourceManager::start(ManagerConfig::from_env()).await?;
//!
//!     let rows = manager.query("SELECT id, name FROM users WHERE id = $1", &[&42i64]).await?;
//!     let decision = manager.check_rate_limit("10.0.0.7", RateLimitProfile::general_api()).await?;
//!
//!     // Runs until SIGTERM/SIGINT; the coordinator handles the rest
//!     std::future::pending::<()>().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod manager;
pub mod pool;
pub mod rate_limit;
pub mod recovery;
pub mod shutdown;
pub mod stats;
pub mod telemetry;

pub use cache::{CacheAccessor, CacheStore};
pub use config::ManagerConfig;
pub use error::{Error, Result};
pub use health::HealthMonitor;
pub use manager::ResourceManager;
pub use pool::{HealthSnapshot, PoolManager, PoolState};
pub use rate_limit::{RateLimitDecision, RateLimitProfile, RateLimiter};
pub use recovery::{BackoffPolicy, Recoverable, RecoveryController};
pub use shutdown::{ShutdownCoordinator, ShutdownTrigger};
pub use stats::{PoolStatistics, PoolStatsSnapshot};

/// Convenience re-exports for hosts that just want the manager
pub mod prelude {
    pub use crate::cache::CacheStore;
    pub use crate::config::ManagerConfig;
    pub use crate::error::{Error, Result};
    pub use crate::manager::ResourceManager;
    pub use crate::rate_limit::RateLimitProfile;
}
