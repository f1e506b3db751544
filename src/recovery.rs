//! Automatic recovery from transient connectivity failures
//!
//! A bounded-retry, exponential-backoff state machine that tears down and
//! rebuilds the connection pool after probe failures:
//!
//! ```text
//! Healthy → (probe fails) → Recovering → (backoff, rebuild, probe)
//!     → Healthy | Recovering (attempt+1) → … → Fatal (attempts exhausted)
//! ```
//!
//! Concurrent failure reports collapse into a single recovery; exceeding the
//! attempt budget returns [`Error::RecoveryExhausted`], which the health
//! monitor treats as fatal for the process.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// The seam between the controller and the resource it rebuilds
///
/// [`crate::pool::PoolManager`] is the production implementation; tests
/// substitute scripted fakes.
#[async_trait]
pub trait Recoverable: Send + Sync {
    /// Suspend availability and release the broken handle
    async fn teardown(&self);

    /// Construct a fresh handle and swap it in
    async fn rebuild(&self) -> Result<()>;

    /// Minimal liveness check against the fresh handle
    async fn probe(&self) -> Result<()>;

    /// Restore full availability after a successful probe
    fn mark_healthy(&self);

    /// False once shutdown has begun; recovery aborts instead of racing it
    fn accepting_recovery(&self) -> bool;
}

/// Exponential backoff schedule with a hard cap
///
/// `delay(attempt) = min(base × multiplier^(attempt−1), cap)`, with optional
/// jitter to avoid thundering-herd reconnects.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: f64,
    pub cap: Duration,
    /// Random spread applied to the computed delay (0.0–1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            multiplier: 2.0,
            cap: Duration::from_secs(10),
            jitter_factor: 0.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the given 1-based attempt
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let base_ms = self.base.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped_ms = base_ms.min(self.cap.as_millis() as f64);

        let jitter = 1.0 + (rand::random::<f64>() * 2.0 - 1.0) * self.jitter_factor;
        Duration::from_millis((capped_ms * jitter) as u64)
    }
}

/// Outcome of a single rebuild attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Success,
    Failure,
}

/// One entry in the inspectable recovery history
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryAttempt {
    pub attempt_number: u32,
    pub delay_ms: u64,
    pub started_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
}

/// Bounded-retry recovery state machine
pub struct RecoveryController {
    policy: BackoffPolicy,
    max_attempts: u32,
    in_flight: AtomicBool,
    current_attempt: AtomicU32,
    history: Mutex<Vec<RecoveryAttempt>>,
}

impl RecoveryController {
    pub fn new(policy: BackoffPolicy, max_attempts: u32) -> Self {
        Self {
            policy,
            max_attempts,
            in_flight: AtomicBool::new(false),
            current_attempt: AtomicU32::new(0),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Tear down and rebuild the target until it probes healthy
    ///
    /// Mutually exclusive: a second failure report while a recovery is in
    /// flight returns immediately. Exhausting the attempt budget returns
    /// [`Error::RecoveryExhausted`].
    pub async fn recover(&self, target: &dyn Recoverable) -> Result<()> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("recovery already in flight; collapsing duplicate trigger");
            return Ok(());
        }
        let result = self.run(target).await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn run(&self, target: &dyn Recoverable) -> Result<()> {
        target.teardown().await;

        let mut attempt: u32 = 1;
        loop {
            if !target.accepting_recovery() {
                info!("recovery pre-empted by shutdown; leaving pool to the coordinator");
                self.current_attempt.store(0, Ordering::SeqCst);
                return Ok(());
            }
            self.current_attempt.store(attempt, Ordering::SeqCst);

            let delay = self.policy.delay(attempt);
            info!(
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "waiting before pool rebuild"
            );
            tokio::time::sleep(delay).await;

            let started_at = Utc::now();
            let outcome = match target.rebuild().await {
                Ok(()) => target.probe().await,
                Err(err) => Err(err),
            };

            self.history.lock().push(RecoveryAttempt {
                attempt_number: attempt,
                delay_ms: delay.as_millis() as u64,
                started_at,
                outcome: if outcome.is_ok() {
                    AttemptOutcome::Success
                } else {
                    AttemptOutcome::Failure
                },
            });

            match outcome {
                Ok(()) => {
                    target.mark_healthy();
                    self.current_attempt.store(0, Ordering::SeqCst);
                    info!(attempts = attempt, "connection pool recovered");
                    return Ok(());
                }
                Err(err) => {
                    warn!(attempt, error = %err, "pool rebuild attempt failed");
                    if attempt >= self.max_attempts {
                        return Err(Error::RecoveryExhausted { attempts: attempt });
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// True while a recovery is in flight
    pub fn is_recovering(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Current attempt number; zero when idle or after a successful recovery
    pub fn current_attempt(&self) -> u32 {
        self.current_attempt.load(Ordering::SeqCst)
    }

    /// Copy of the recorded attempt history
    pub fn attempt_history(&self) -> Vec<RecoveryAttempt> {
        self.history.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    /// Scripted recovery target: fails the first `failures` probes
    struct ScriptedTarget {
        failures: usize,
        probes: AtomicUsize,
        healthy: AtomicBool,
        accepting: AtomicBool,
    }

    impl ScriptedTarget {
        fn failing_first(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures,
                probes: AtomicUsize::new(0),
                healthy: AtomicBool::new(false),
                accepting: AtomicBool::new(true),
            })
        }
    }

    #[async_trait]
    impl Recoverable for ScriptedTarget {
        async fn teardown(&self) {}

        async fn rebuild(&self) -> Result<()> {
            Ok(())
        }

        async fn probe(&self) -> Result<()> {
            let n = self.probes.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(Error::TransientConnection("connection refused".to_string()))
            } else {
                Ok(())
            }
        }

        fn mark_healthy(&self) {
            self.healthy.store(true, Ordering::SeqCst);
        }

        fn accepting_recovery(&self) -> bool {
            self.accepting.load(Ordering::SeqCst)
        }
    }

    fn fast_policy() -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(1),
            multiplier: 2.0,
            cap: Duration::from_millis(4),
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(4), Duration::from_secs(8));
        // Capped: would be 16s
        assert_eq!(policy.delay(5), Duration::from_secs(10));
        assert_eq!(policy.delay(12), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_jitter_stays_in_band() {
        let policy = BackoffPolicy {
            jitter_factor: 0.2,
            ..BackoffPolicy::default()
        };
        for _ in 0..50 {
            let d = policy.delay(2).as_millis();
            assert!((1600..=2400).contains(&d), "delay {d}ms outside jitter band");
        }
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let target = ScriptedTarget::failing_first(2);
        let controller = RecoveryController::new(fast_policy(), 5);

        controller.recover(target.as_ref()).await.unwrap();

        let history = controller.attempt_history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].outcome, AttemptOutcome::Failure);
        assert_eq!(history[1].outcome, AttemptOutcome::Failure);
        assert_eq!(history[2].outcome, AttemptOutcome::Success);
        assert_eq!(history[2].attempt_number, 3);

        assert!(target.healthy.load(Ordering::SeqCst));
        assert_eq!(controller.current_attempt(), 0);
        assert!(!controller.is_recovering());
    }

    #[tokio::test]
    async fn test_exhaustion_is_fatal() {
        let target = ScriptedTarget::failing_first(usize::MAX);
        let controller = RecoveryController::new(fast_policy(), 5);

        let err = controller.recover(target.as_ref()).await.unwrap_err();
        assert!(matches!(err, Error::RecoveryExhausted { attempts: 5 }));

        let history = controller.attempt_history();
        assert_eq!(history.len(), 5);
        assert!(history
            .iter()
            .all(|a| a.outcome == AttemptOutcome::Failure));
        assert!(!target.healthy.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_concurrent_failures_collapse() {
        let target = ScriptedTarget::failing_first(1);
        let controller = Arc::new(RecoveryController::new(fast_policy(), 5));

        let a = {
            let controller = Arc::clone(&controller);
            let target = Arc::clone(&target);
            tokio::spawn(async move { controller.recover(target.as_ref()).await })
        };
        let b = {
            let controller = Arc::clone(&controller);
            let target = Arc::clone(&target);
            tokio::spawn(async move { controller.recover(target.as_ref()).await })
        };

        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        // Only one recovery actually ran
        assert!(controller.attempt_history().len() <= 2);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_recovery() {
        let target = ScriptedTarget::failing_first(usize::MAX);
        target.accepting.store(false, Ordering::SeqCst);
        let controller = RecoveryController::new(fast_policy(), 5);

        // Aborts without error and without recording attempts
        controller.recover(target.as_ref()).await.unwrap();
        assert!(controller.attempt_history().is_empty());
    }
}
