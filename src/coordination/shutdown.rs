//! Graceful Shutdown Handler
//!
//! Stops the engine from starting new ticks, lets the running tick finish
//! within a drain timeout, then reports completion.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Normal graceful shutdown (SIGTERM, SIGINT)
    Graceful,
    /// Urgent shutdown, skip draining
    Urgent,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Urgent => write!(f, "urgent"),
        }
    }
}

/// Configuration for graceful shutdown
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time the in-flight tick gets to finish (default: 60s)
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 60,
        }
    }
}

/// Shutdown phase tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    /// No new ticks are scheduled
    StoppingTicks,
    /// Waiting on the in-flight tick
    DrainingTick,
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::StoppingTicks => write!(f, "stopping_ticks"),
            ShutdownPhase::DrainingTick => write!(f, "draining_tick"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Shutdown errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
    /// The in-flight tick did not finish in time
    Timeout,
}

impl std::fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownError::Timeout => write!(f, "shutdown timed out"),
        }
    }
}

impl std::error::Error for ShutdownError {}

/// Graceful shutdown coordinator
pub struct GracefulShutdown {
    config: ShutdownConfig,
    shutdown_requested: AtomicBool,
    signal_tx: watch::Sender<Option<ShutdownSignal>>,
    phase_tx: watch::Sender<ShutdownPhase>,
}

impl GracefulShutdown {
    pub fn new(config: ShutdownConfig) -> Self {
        let (signal_tx, _) = watch::channel(None);
        let (phase_tx, _) = watch::channel(ShutdownPhase::Running);
        Self {
            config,
            shutdown_requested: AtomicBool::new(false),
            signal_tx,
            phase_tx,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ShutdownConfig::default())
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn current_phase(&self) -> ShutdownPhase {
        *self.phase_tx.borrow()
    }

    /// Request shutdown with specified signal type
    pub fn request_shutdown(&self, signal: ShutdownSignal) {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already requested, ignoring duplicate signal: {}", signal);
            return;
        }

        info!("Shutdown requested: {}", signal);
        self.signal_tx.send_replace(Some(signal));
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        self.phase_tx.send_replace(phase);
        info!("Shutdown phase: {}", phase);
    }

    /// Drive the shutdown sequence. `drain` resolves once the in-flight tick
    /// (if any) has finished.
    pub async fn execute<F>(&self, drain: F) -> Result<(), ShutdownError>
    where
        F: Future<Output = ()>,
    {
        let start = std::time::Instant::now();

        self.set_phase(ShutdownPhase::StoppingTicks);

        let urgent = *self.signal_tx.borrow() == Some(ShutdownSignal::Urgent);
        if !urgent {
            self.set_phase(ShutdownPhase::DrainingTick);
            let timeout = Duration::from_secs(self.config.drain_timeout_secs);
            if tokio::time::timeout(timeout, drain).await.is_err() {
                error!(
                    "In-flight tick did not finish within {}s",
                    self.config.drain_timeout_secs
                );
                self.set_phase(ShutdownPhase::Complete);
                return Err(ShutdownError::Timeout);
            }
        }

        self.set_phase(ShutdownPhase::Complete);
        info!("Graceful shutdown completed in {:?}", start.elapsed());
        Ok(())
    }

    /// Token for checking shutdown status in async tasks
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            signal_rx: self.signal_tx.subscribe(),
        }
    }
}

/// Cloneable view of the shutdown request
#[derive(Clone)]
pub struct ShutdownToken {
    signal_rx: watch::Receiver<Option<ShutdownSignal>>,
}

impl ShutdownToken {
    pub fn is_shutdown_requested(&self) -> bool {
        self.signal_rx.borrow().is_some()
    }

    /// Resolve once shutdown has been requested, including before the call
    pub async fn wait_for_shutdown(&mut self) -> ShutdownSignal {
        loop {
            if let Some(signal) = *self.signal_rx.borrow_and_update() {
                return signal;
            }
            if self.signal_rx.changed().await.is_err() {
                // Coordinator dropped
                return ShutdownSignal::Urgent;
            }
        }
    }
}

/// Helper to install OS signal handlers
pub async fn install_signal_handlers(shutdown: Arc<GracefulShutdown>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        for (kind, name, level) in [
            (SignalKind::terminate(), "SIGTERM", ShutdownSignal::Graceful),
            (SignalKind::interrupt(), "SIGINT", ShutdownSignal::Graceful),
            (SignalKind::quit(), "SIGQUIT", ShutdownSignal::Urgent),
        ] {
            let shutdown = shutdown.clone();
            match signal(kind) {
                Ok(mut stream) => {
                    tokio::spawn(async move {
                        stream.recv().await;
                        info!("Received {}", name);
                        shutdown.request_shutdown(level);
                    });
                }
                Err(e) => error!("Failed to install {} handler: {}", name, e),
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C");
                    shutdown.request_shutdown(ShutdownSignal::Graceful);
                }
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_phase_display() {
        assert_eq!(ShutdownPhase::Running.to_string(), "running");
        assert_eq!(ShutdownPhase::DrainingTick.to_string(), "draining_tick");
        assert_eq!(ShutdownSignal::Urgent.to_string(), "urgent");
    }

    #[tokio::test]
    async fn test_token_sees_request_made_before_wait() {
        let shutdown = GracefulShutdown::with_defaults();
        let mut token = shutdown.token();
        assert!(!token.is_shutdown_requested());

        shutdown.request_shutdown(ShutdownSignal::Graceful);
        // Duplicate request is ignored
        shutdown.request_shutdown(ShutdownSignal::Urgent);

        assert!(token.is_shutdown_requested());
        assert_eq!(token.wait_for_shutdown().await, ShutdownSignal::Graceful);
    }

    #[tokio::test]
    async fn test_execute_waits_for_drain() {
        let shutdown = GracefulShutdown::with_defaults();
        shutdown.request_shutdown(ShutdownSignal::Graceful);
        shutdown
            .execute(tokio::time::sleep(Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(shutdown.current_phase(), ShutdownPhase::Complete);
    }

    #[tokio::test]
    async fn test_execute_times_out() {
        let shutdown = GracefulShutdown::new(ShutdownConfig {
            drain_timeout_secs: 0,
        });
        shutdown.request_shutdown(ShutdownSignal::Graceful);
        let result = shutdown
            .execute(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert_eq!(result, Err(ShutdownError::Timeout));
    }
}
