//! Coordination Layer for long-running operation
//!
//! - Bounded retry with backoff and per-call timeouts
//! - Graceful shutdown handling

pub mod retry;
pub mod shutdown;

pub use retry::{with_timeout, RetryPolicy};
pub use shutdown::{
    install_signal_handlers, GracefulShutdown, ShutdownConfig, ShutdownError, ShutdownPhase,
    ShutdownSignal, ShutdownToken,
};
