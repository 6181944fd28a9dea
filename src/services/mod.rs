pub mod market_metrics;
pub mod notifier;

pub use market_metrics::{MetricsProvider, StaticMetricsProvider};
pub use notifier::{
    Notification, NotificationEvent, NotificationLevel, Notifier, NotifierHandle, TracingNotifier,
};
