//! Graceful shutdown coordination
//!
//! Handles coordinated process teardown:
//! - Signal handling (SIGTERM, SIGINT) plus a fatal-error channel fed by a
//!   panic hook, all routed into a single `graceful_shutdown` entry point
//! - A named registry of asynchronous cleanup callbacks, run concurrently
//!   under one deadline
//! - Fixed-order terminal close steps (connection pool first, cache
//!   connection last) that run after the concurrent phase
//! - An injectable exit hook so the final `process::exit` is testable
//!
//! Cleanup callbacks that are still running when the deadline passes are
//! **not** cancelled; the coordinator stops waiting and closes the pool and
//! cache underneath them. That is an accepted, documented resource-leak
//! risk, not a guarantee of completion.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Replaceable process-exit seam
pub type ExitHook = Arc<dyn Fn(i32) + Send + Sync>;

/// The real thing: terminates the process
pub fn process_exit_hook() -> ExitHook {
    Arc::new(|code| std::process::exit(code))
}

/// Asynchronous cleanup callback signature
///
/// Callbacks are expected to be idempotent and side-effect-isolated.
pub type CleanupFn = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct CleanupRegistration {
    callback: CleanupFn,
    #[allow(dead_code)] // kept for diagnostics, read when dumping the registry
    registered_at: DateTime<Utc>,
}

/// What initiated the shutdown
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownTrigger {
    Sigterm,
    Sigint,
    /// Uncaught fatal error (panic hook or host-reported)
    Fatal(String),
    /// Programmatic trigger, e.g. from tests or an admin endpoint
    Manual,
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownTrigger::Sigterm => write!(f, "SIGTERM"),
            ShutdownTrigger::Sigint => write!(f, "SIGINT"),
            ShutdownTrigger::Fatal(reason) => write!(f, "fatal: {reason}"),
            ShutdownTrigger::Manual => write!(f, "manual"),
        }
    }
}

/// Final status of one registered cleanup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupStatus {
    Completed,
    Failed(String),
    /// Still running when the deadline passed; abandoned, not cancelled
    Orphaned,
}

#[derive(Debug, Clone)]
pub struct CleanupOutcome {
    pub name: String,
    pub status: CleanupStatus,
}

/// Record of a single shutdown sequence
///
/// Created exactly once; a second concurrent trigger observes the existing
/// session and is a no-op.
#[derive(Debug, Clone)]
pub struct ShutdownSession {
    pub trigger: ShutdownTrigger,
    pub started_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
    pub outcomes: Vec<CleanupOutcome>,
}

/// Owns the cleanup registry and drives the ordered, timeout-bounded
/// shutdown sequence
pub struct ShutdownCoordinator {
    cleanups: Mutex<HashMap<String, CleanupRegistration>>,
    terminal: Mutex<Vec<(String, CleanupFn)>>,
    on_begin: Mutex<Vec<Box<dyn Fn() + Send + Sync>>>,
    session: Mutex<Option<ShutdownSession>>,
    installed: AtomicBool,
    shutting_down: AtomicBool,
    timeout: Duration,
    exit_hook: ExitHook,
    fatal_tx: mpsc::UnboundedSender<String>,
    fatal_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        Self {
            cleanups: Mutex::new(HashMap::new()),
            terminal: Mutex::new(Vec::new()),
            on_begin: Mutex::new(Vec::new()),
            session: Mutex::new(None),
            installed: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            timeout,
            exit_hook: process_exit_hook(),
            fatal_tx,
            fatal_rx: Mutex::new(Some(fatal_rx)),
        }
    }

    /// Replace the process-exit hook (tests inject a recording hook)
    pub fn with_exit_hook(mut self, hook: ExitHook) -> Self {
        self.exit_hook = hook;
        self
    }

    /// Install signal handlers and the fatal-error panic hook
    ///
    /// Idempotent: calling twice installs nothing the second time. SIGTERM
    /// (container orchestrators), SIGINT (Ctrl+C) and reported fatal errors
    /// all funnel into the same `graceful_shutdown` routine.
    pub fn install(self: &Arc<Self>) {
        if self.installed.swap(true, Ordering::SeqCst) {
            debug!("shutdown handlers already installed");
            return;
        }

        // Route panics through the fatal channel so an uncaught crash still
        // gets an orderly teardown. The previous hook keeps printing the
        // backtrace.
        let fatal = self.fatal_tx.clone();
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |panic_info| {
            let _ = fatal.send(panic_info.to_string());
            previous(panic_info);
        }));

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let trigger = coordinator.wait_for_trigger().await;
            coordinator.graceful_shutdown(trigger).await;
        });

        info!("shutdown signal handlers installed");
    }

    /// Report a fatal error that should terminate the process gracefully
    pub fn notify_fatal(&self, reason: impl Into<String>) {
        let _ = self.fatal_tx.send(reason.into());
    }

    async fn wait_for_trigger(&self) -> ShutdownTrigger {
        let mut fatal_rx = { self.fatal_rx.lock().take() };
        let fatal = async {
            match fatal_rx.as_mut() {
                Some(rx) => rx
                    .recv()
                    .await
                    .unwrap_or_else(|| "fatal channel closed".to_string()),
                None => std::future::pending::<String>().await,
            }
        };

        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("received Ctrl+C, initiating graceful shutdown");
                ShutdownTrigger::Sigint
            }
            _ = terminate => {
                info!("received SIGTERM, initiating graceful shutdown");
                ShutdownTrigger::Sigterm
            }
            reason = fatal => {
                error!(%reason, "fatal error reported, initiating graceful shutdown");
                ShutdownTrigger::Fatal(reason)
            }
        }
    }

    /// Register a named cleanup callback
    ///
    /// Re-registration under an existing name replaces the prior entry with
    /// a warning; duplicates are never silently preserved.
    pub fn register_cleanup<F, Fut>(&self, name: &str, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let callback: CleanupFn = Box::new(move || Box::pin(callback()));
        let replaced = self
            .cleanups
            .lock()
            .insert(
                name.to_string(),
                CleanupRegistration {
                    callback,
                    registered_at: Utc::now(),
                },
            )
            .is_some();
        if replaced {
            warn!(cleanup = name, "replacing previously registered cleanup");
        } else {
            debug!(cleanup = name, "cleanup registered");
        }
    }

    /// Remove a cleanup; returns whether it existed
    pub fn unregister_cleanup(&self, name: &str) -> bool {
        let removed = self.cleanups.lock().remove(name).is_some();
        if removed {
            debug!(cleanup = name, "cleanup unregistered");
        }
        removed
    }

    /// Append a fixed-order close step run *after* the concurrent phase
    ///
    /// Steps execute sequentially in registration order: the connection pool
    /// must outlive cleanups that may still query it, and the cache closes
    /// last.
    pub fn register_terminal<F, Fut>(&self, name: &str, step: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let step: CleanupFn = Box::new(move || Box::pin(step()));
        self.terminal.lock().push((name.to_string(), step));
    }

    /// Synchronous hook run immediately after a session is created, before
    /// any cleanup starts (e.g. flipping the pool to `ShuttingDown`)
    pub fn register_on_begin<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_begin.lock().push(Box::new(hook));
    }

    /// Caller-observable shutdown status, so the request layer can refuse
    /// new work instead of silently accepting and orphaning it
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Copy of the current shutdown session, if one has started
    pub fn session(&self) -> Option<ShutdownSession> {
        self.session.lock().clone()
    }

    /// Run the full shutdown sequence exactly once
    ///
    /// 1. Create the session (a second trigger logs and returns)
    /// 2. Run on-begin hooks, then every registered cleanup concurrently
    /// 3. Race the cleanups against the deadline; on timeout, proceed and
    ///    abandon whatever is still outstanding
    /// 4. Run the terminal close steps in fixed order
    /// 5. Invoke the exit hook: 0 on full success, 1 if anything failed
    pub async fn graceful_shutdown(&self, trigger: ShutdownTrigger) {
        {
            let mut session = self.session.lock();
            if let Some(existing) = session.as_ref() {
                info!(
                    first = %existing.trigger,
                    duplicate = %trigger,
                    "shutdown already in progress; ignoring trigger"
                );
                return;
            }
            let started_at = Utc::now();
            *session = Some(ShutdownSession {
                trigger: trigger.clone(),
                started_at,
                deadline_at: started_at
                    + chrono::Duration::milliseconds(self.timeout.as_millis() as i64),
                outcomes: Vec::new(),
            });
        }
        self.shutting_down.store(true, Ordering::SeqCst);
        info!(
            trigger = %trigger,
            timeout_ms = self.timeout.as_millis() as u64,
            "graceful shutdown started"
        );

        for hook in self.on_begin.lock().drain(..) {
            hook();
        }

        let entries: Vec<(String, CleanupRegistration)> =
            self.cleanups.lock().drain().collect();
        let names: Vec<String> = entries.iter().map(|(name, _)| name.clone()).collect();

        let completed: Arc<Mutex<Vec<CleanupOutcome>>> = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::with_capacity(entries.len());
        for (name, registration) in entries {
            let completed = Arc::clone(&completed);
            let fut = (registration.callback)();
            handles.push(tokio::spawn(async move {
                let status = match fut.await {
                    Ok(()) => {
                        debug!(cleanup = %name, "cleanup completed");
                        CleanupStatus::Completed
                    }
                    Err(err) => {
                        warn!(cleanup = %name, error = %err, "cleanup failed");
                        CleanupStatus::Failed(err.to_string())
                    }
                };
                completed.lock().push(CleanupOutcome { name, status });
            }));
        }

        let wait_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        let timed_out = tokio::time::timeout(self.timeout, wait_all).await.is_err();
        if timed_out {
            warn!(
                timeout_ms = self.timeout.as_millis() as u64,
                "shutdown timeout elapsed; abandoning outstanding cleanups"
            );
        }

        let mut outcomes = completed.lock().clone();
        for name in names {
            if !outcomes.iter().any(|o| o.name == name) {
                outcomes.push(CleanupOutcome {
                    name,
                    status: CleanupStatus::Orphaned,
                });
            }
        }
        let mut failed = timed_out
            || outcomes.iter().any(|o| {
                matches!(o.status, CleanupStatus::Failed(_) | CleanupStatus::Orphaned)
            });

        // Fixed-order closes: pool before cache, always, even after failures
        let steps: Vec<(String, CleanupFn)> = {
            let mut terminal = self.terminal.lock();
            terminal.drain(..).collect()
        };
        for (name, step) in steps {
            match step().await {
                Ok(()) => info!(step = %name, "closed"),
                Err(err) => {
                    error!(step = %name, error = %err, "close failed");
                    failed = true;
                }
            }
        }

        if let Some(session) = self.session.lock().as_mut() {
            session.outcomes = outcomes;
        }

        let code = if failed { 1 } else { 0 };
        info!(exit_code = code, "graceful shutdown complete");
        (self.exit_hook)(code);
    }
}
