pub mod memory;
pub mod metrics_http;
pub mod postgres;
pub mod webhook;

pub use memory::{InMemoryConfigRepository, InMemoryDecisionSink};
pub use metrics_http::HttpMetricsProvider;
pub use postgres::PostgresStore;
pub use webhook::{WebhookFormat, WebhookNotifier};
