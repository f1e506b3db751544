//! Top-level resource manager
//!
//! `ResourceManager::start` wires the whole lifecycle together:
//!
//! 1. Validate configuration and build the connection pool
//! 2. Connect the Redis cache and derive the rate limiter from it
//! 3. Install signal handling and register the shutdown sequence
//! 4. Spawn the periodic health monitor
//!
//! The returned handle is the single entry point the host application keeps:
//! queries, transactions, cache access, rate limiting, statistics, and
//! shutdown registration all hang off it.

use crate::cache::CacheAccessor;
use crate::config::ManagerConfig;
use crate::error::Result;
use crate::health::HealthMonitor;
use crate::pool::{HealthSnapshot, PoolManager};
use crate::rate_limit::{RateLimitDecision, RateLimitProfile, RateLimiter};
use crate::recovery::RecoveryController;
use crate::shutdown::{ShutdownCoordinator, ShutdownTrigger};
use crate::stats::PoolStatsSnapshot;
use deadpool_postgres::Transaction;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use tracing::info;

/// Owns every managed resource for the lifetime of the process
pub struct ResourceManager {
    pool: Arc<PoolManager>,
    cache: CacheAccessor,
    rate_limiter: RateLimiter,
    shutdown: Arc<ShutdownCoordinator>,
}

impl ResourceManager {
    /// Build and start every managed resource
    ///
    /// Fails on invalid configuration or an unreachable cache; the pool
    /// itself connects lazily and is watched by the health monitor instead.
    pub async fn start(config: ManagerConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let pool = PoolManager::connect(&config)?;
        let cache = CacheAccessor::connect(&config.redis_url).await?;
        let rate_limiter = RateLimiter::new(cache.connection());

        let recovery = Arc::new(RecoveryController::new(
            config.backoff.clone(),
            config.max_reconnect_attempts,
        ));
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&pool) as Arc<dyn crate::recovery::Recoverable>,
            Arc::clone(&recovery),
            config.health_check_interval,
        ));
        let monitor_handle = Arc::clone(&monitor).spawn();

        let shutdown = Arc::new(ShutdownCoordinator::new(config.shutdown_timeout));
        shutdown.install();

        // Stop admitting work the moment a shutdown session begins
        let begin_pool = Arc::clone(&pool);
        shutdown.register_on_begin(move || begin_pool.set_shutting_down());

        let abort = monitor_handle.abort_handle();
        shutdown.register_cleanup("health-monitor", move || {
            let abort = abort.clone();
            async move {
                abort.abort();
                Ok(())
            }
        });

        let status_pool = Arc::clone(&pool);
        shutdown.register_cleanup("pool-statistics", move || {
            let pool = Arc::clone(&status_pool);
            async move {
                pool.log_pool_status();
                Ok(())
            }
        });

        // Fixed-order closes: the pool first, the cache last
        let close_pool = Arc::clone(&pool);
        shutdown.register_terminal("connection-pool", move || {
            let pool = Arc::clone(&close_pool);
            async move {
                pool.close().await;
                Ok(())
            }
        });
        let close_cache = cache.clone();
        shutdown.register_terminal("cache-connection", move || {
            let cache = close_cache.clone();
            async move {
                cache.close();
                Ok(())
            }
        });

        info!("resource manager started");
        Ok(Arc::new(Self {
            pool,
            cache,
            rate_limiter,
            shutdown,
        }))
    }

    /// Execute a single statement through the managed pool
    pub async fn query(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>> {
        self.pool.query(statement, params).await
    }

    /// Run a callback inside a BEGIN/COMMIT block
    pub async fn transaction<T, F>(&self, callback: F) -> Result<T>
    where
        F: for<'t> FnOnce(&'t Transaction<'t>) -> BoxFuture<'t, Result<T>>,
    {
        self.pool.transaction(callback).await
    }

    /// Usage counters merged with live pool occupancy
    pub fn pool_stats(&self) -> PoolStatsSnapshot {
        self.pool.stats_snapshot()
    }

    /// Derived pool health view
    pub fn pool_health(&self) -> HealthSnapshot {
        self.pool.health_snapshot()
    }

    /// Emit a structured pool status line at info level
    pub fn log_pool_status(&self) {
        self.pool.log_pool_status();
    }

    /// Administrator-triggered reset of the usage counters
    pub fn reset_pool_stats(&self) {
        self.pool.statistics().reset();
    }

    /// Cache-aside accessor for the shared Redis cache
    pub fn cache(&self) -> &CacheAccessor {
        &self.cache
    }

    /// Check-and-record one request against a rate-limit profile
    pub async fn check_rate_limit(
        &self,
        key: &str,
        profile: RateLimitProfile,
    ) -> Result<RateLimitDecision> {
        self.rate_limiter.check(key, profile).await
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Register a named cleanup to run during graceful shutdown
    pub fn register_cleanup<F, Fut>(&self, name: &str, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.shutdown.register_cleanup(name, callback);
    }

    /// Remove a registered cleanup; returns whether it existed
    pub fn unregister_cleanup(&self, name: &str) -> bool {
        self.shutdown.unregister_cleanup(name)
    }

    /// True once a shutdown session has begun; callers should refuse new work
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_shutting_down()
    }

    /// Report a fatal error that should terminate the process gracefully
    pub fn notify_fatal(&self, reason: impl Into<String>) {
        self.shutdown.notify_fatal(reason);
    }

    /// Programmatically start the graceful shutdown sequence
    ///
    /// Runs the full sequence, including the final process exit.
    pub async fn trigger_shutdown(&self) {
        self.shutdown.graceful_shutdown(ShutdownTrigger::Manual).await;
    }

    pub fn shutdown_coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }
}
