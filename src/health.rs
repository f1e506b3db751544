//! Periodic health monitoring
//!
//! A single repeating timer issues a lightweight liveness probe through the
//! connection pool, independent of caller traffic. Probe failures hand
//! control to the [`RecoveryController`]; exhausted recovery terminates the
//! process with a non-zero status through the injectable exit hook.
//!
//! Overlapping probes are prevented by a re-entrancy guard: a probe (or the
//! recovery it triggered) still in flight suppresses the next tick.

use crate::recovery::{Recoverable, RecoveryController};
use crate::shutdown::{process_exit_hook, ExitHook};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

/// Periodic liveness prober for the connection pool
pub struct HealthMonitor {
    target: Arc<dyn Recoverable>,
    recovery: Arc<RecoveryController>,
    interval: Duration,
    probe_in_flight: AtomicBool,
    exit_hook: ExitHook,
}

impl HealthMonitor {
    pub fn new(
        target: Arc<dyn Recoverable>,
        recovery: Arc<RecoveryController>,
        interval: Duration,
    ) -> Self {
        Self {
            target,
            recovery,
            interval,
            probe_in_flight: AtomicBool::new(false),
            exit_hook: process_exit_hook(),
        }
    }

    /// Replace the process-exit hook (tests inject a recording hook)
    pub fn with_exit_hook(mut self, hook: ExitHook) -> Self {
        self.exit_hook = hook;
        self
    }

    /// Start the repeating probe timer
    ///
    /// The first probe fires one full interval after startup; missed ticks
    /// are delayed rather than bursted.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval() fires immediately; consume the first tick
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.run_probe_cycle().await;
            }
        })
    }

    /// One probe cycle: probe, and on failure drive recovery to completion
    pub async fn run_probe_cycle(&self) {
        if self.probe_in_flight.swap(true, Ordering::SeqCst) {
            debug!("probe still in flight; skipping tick");
            return;
        }

        if let Err(err) = self.target.probe().await {
            warn!(error = %err, "health probe failed; starting recovery");
            if let Err(fatal) = self.recovery.recover(self.target.as_ref()).await {
                error!(error = %fatal, "recovery attempts exhausted; terminating process");
                (self.exit_hook)(1);
            }
        }

        self.probe_in_flight.store(false, Ordering::SeqCst);
    }
}
