//! Operator notifications
//!
//! The core never waits on a notifier: events are handed to a spawned task
//! with a timeout, and delivery failures only reach the log.

use crate::domain::{ConfigId, StrategyCategory};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Notification severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl NotificationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationLevel::Info => "info",
            NotificationLevel::Warning => "warning",
            NotificationLevel::Error => "error",
            NotificationLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Something an operator may want to hear about
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationEvent {
    ConfigurationActivated {
        id: ConfigId,
        name: String,
        category: StrategyCategory,
        previous: Option<ConfigId>,
    },
    ConfigurationDeactivated {
        id: ConfigId,
        name: String,
    },
    RiskAdjusted {
        id: ConfigId,
        position_size_multiplier: f64,
        reason: String,
    },
    TickFailed {
        reason: String,
    },
    TickSkipped {
        reason: String,
    },
}

impl NotificationEvent {
    pub fn level(&self) -> NotificationLevel {
        match self {
            NotificationEvent::ConfigurationActivated { .. }
            | NotificationEvent::ConfigurationDeactivated { .. } => NotificationLevel::Info,
            NotificationEvent::RiskAdjusted { .. } | NotificationEvent::TickSkipped { .. } => {
                NotificationLevel::Warning
            }
            NotificationEvent::TickFailed { .. } => NotificationLevel::Error,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            NotificationEvent::ConfigurationActivated { .. } => "Configuration activated",
            NotificationEvent::ConfigurationDeactivated { .. } => "Configuration deactivated",
            NotificationEvent::RiskAdjusted { .. } => "Risk adjusted",
            NotificationEvent::TickFailed { .. } => "Engine tick failed",
            NotificationEvent::TickSkipped { .. } => "Engine tick skipped",
        }
    }

    /// One-line human readable summary
    pub fn message(&self) -> String {
        match self {
            NotificationEvent::ConfigurationActivated {
                id,
                name,
                category,
                previous,
            } => match previous {
                Some(prev) => format!("{name} (#{id}, {category}) replaced #{prev}"),
                None => format!("{name} (#{id}, {category}) is now active"),
            },
            NotificationEvent::ConfigurationDeactivated { id, name } => {
                format!("{name} (#{id}) deactivated, no configuration is active")
            }
            NotificationEvent::RiskAdjusted {
                id,
                position_size_multiplier,
                reason,
            } => format!("#{id} position size x{position_size_multiplier:.2}: {reason}"),
            NotificationEvent::TickFailed { reason } | NotificationEvent::TickSkipped { reason } => {
                reason.clone()
            }
        }
    }
}

/// Rendered notification handed to delivery backends
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
    pub event: NotificationEvent,
    pub timestamp: DateTime<Utc>,
}

impl From<NotificationEvent> for Notification {
    fn from(event: NotificationEvent) -> Self {
        Self {
            level: event.level(),
            title: event.title().to_string(),
            message: event.message(),
            event,
            timestamp: Utc::now(),
        }
    }
}

/// Delivery backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, n: &Notification) -> Result<()> {
        match n.level {
            NotificationLevel::Info => info!(title = %n.title, "{}", n.message),
            NotificationLevel::Warning => warn!(title = %n.title, "{}", n.message),
            NotificationLevel::Error | NotificationLevel::Critical => {
                error!(title = %n.title, level = %n.level, "{}", n.message)
            }
        }
        Ok(())
    }
}

/// Fire-and-forget front for a notifier
#[derive(Clone)]
pub struct NotifierHandle {
    inner: Option<Arc<dyn Notifier>>,
    timeout: Duration,
}

impl std::fmt::Debug for NotifierHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifierHandle")
            .field("enabled", &self.inner.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for NotifierHandle {
    fn default() -> Self {
        Self::disabled()
    }
}

impl NotifierHandle {
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Self {
            inner: Some(notifier),
            timeout,
        }
    }

    pub fn disabled() -> Self {
        Self {
            inner: None,
            timeout: Duration::from_secs(5),
        }
    }

    /// Deliver in the background. Never blocks and never fails the caller.
    pub fn fire(&self, event: NotificationEvent) {
        let Some(notifier) = self.inner.clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no runtime, notification dropped");
            return;
        };

        let timeout = self.timeout;
        let notification = Notification::from(event);
        runtime.spawn(async move {
            match tokio::time::timeout(timeout, notifier.notify(&notification)).await {
                Ok(Ok(())) => debug!(title = %notification.title, "notification delivered"),
                Ok(Err(e)) => warn!(title = %notification.title, error = %e, "notification failed"),
                Err(_) => warn!(
                    title = %notification.title,
                    timeout_ms = timeout.as_millis() as u64,
                    "notification timed out"
                ),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StrategosError;
    use tokio::sync::mpsc;

    #[test]
    fn test_event_levels_and_messages() {
        let activated = NotificationEvent::ConfigurationActivated {
            id: ConfigId(2),
            name: "Trend".into(),
            category: StrategyCategory::Momentum,
            previous: Some(ConfigId(1)),
        };
        assert_eq!(activated.level(), NotificationLevel::Info);
        assert_eq!(activated.message(), "Trend (#2, momentum) replaced #1");

        let failed = NotificationEvent::TickFailed {
            reason: "store down".into(),
        };
        assert_eq!(failed.level(), NotificationLevel::Error);
    }

    #[tokio::test]
    async fn test_fire_delivers_in_background() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut mock = MockNotifier::new();
        mock.expect_notify().times(1).returning(move |n| {
            let _ = tx.send(n.title.clone());
            Ok(())
        });

        let handle = NotifierHandle::new(Arc::new(mock), Duration::from_secs(1));
        handle.fire(NotificationEvent::TickSkipped {
            reason: "previous tick still running".into(),
        });

        let title = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(title, "Engine tick skipped");
    }

    #[tokio::test]
    async fn test_fire_swallows_failures() {
        let mut mock = MockNotifier::new();
        mock.expect_notify()
            .returning(|_| Err(StrategosError::Internal("webhook down".into())));

        let handle = NotifierHandle::new(Arc::new(mock), Duration::from_millis(50));
        handle.fire(NotificationEvent::TickFailed {
            reason: "boom".into(),
        });
        NotifierHandle::disabled().fire(NotificationEvent::TickFailed {
            reason: "ignored".into(),
        });
        tokio::task::yield_now().await;
    }
}
