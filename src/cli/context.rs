//! Wiring from `AppConfig` to the store, decision log and engine

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::adapters::{
    HttpMetricsProvider, InMemoryConfigRepository, InMemoryDecisionSink, PostgresStore,
    WebhookNotifier,
};
use crate::config::AppConfig;
use crate::crypto::CipherBox;
use crate::engine::SwitchingEngine;
use crate::error::{Result, StrategosError};
use crate::persistence::{DecisionLog, DecisionSink};
use crate::services::{MetricsProvider, Notifier, NotifierHandle, TracingNotifier};
use crate::store::{ConfigRepository, ConfigStore};

/// Everything a command needs, built once per process
pub struct AppContext {
    pub config: AppConfig,
    pub store: Arc<ConfigStore>,
    pub decisions: DecisionLog,
    pub notifier: NotifierHandle,
    /// Present when a database URL is configured
    pub postgres: Option<PostgresStore>,
}

impl AppContext {
    pub async fn connect(config: AppConfig) -> Result<Self> {
        let postgres = match &config.database.url {
            Some(url) => Some(
                PostgresStore::new(
                    url,
                    config.database.max_connections,
                    Duration::from_secs(config.database.acquire_timeout_secs),
                )
                .await?,
            ),
            None => {
                warn!("database.url not set, using the in-memory store (nothing is persisted)");
                None
            }
        };

        let (repo, sink): (Arc<dyn ConfigRepository>, Arc<dyn DecisionSink>) = match &postgres {
            Some(pg) => (Arc::new(pg.clone()), Arc::new(pg.clone())),
            None => (
                Arc::new(InMemoryConfigRepository::new()),
                Arc::new(InMemoryDecisionSink::new()),
            ),
        };

        let notifier = build_notifier(&config)?;
        let cipher = Arc::new(CipherBox::new(config.encryption.key.as_deref()));
        let store = ConfigStore::new(repo, cipher)
            .with_notifier(notifier.clone())
            .with_max_swap_attempts(config.switching.max_swap_attempts);
        let decisions = DecisionLog::new(
            sink,
            Duration::from_millis(config.decision_log.write_timeout_ms),
        );

        Ok(Self {
            config,
            store: Arc::new(store),
            decisions,
            notifier,
            postgres,
        })
    }

    pub fn require_postgres(&self) -> Result<&PostgresStore> {
        self.postgres.as_ref().ok_or_else(|| {
            StrategosError::Configuration(
                "database.url is required (set STRATEGOS_DATABASE__URL)".to_string(),
            )
        })
    }

    pub fn metrics_provider(&self) -> Result<Arc<dyn MetricsProvider>> {
        let Some(base_url) = &self.config.metrics.base_url else {
            return Err(StrategosError::Configuration(
                "metrics.base_url is required to evaluate (set STRATEGOS_METRICS__BASE_URL)"
                    .to_string(),
            ));
        };
        let provider =
            HttpMetricsProvider::new(base_url, Duration::from_secs(self.config.metrics.timeout_secs))?;
        Ok(Arc::new(provider))
    }

    pub fn engine(&self) -> Result<SwitchingEngine> {
        Ok(SwitchingEngine::new(
            self.store.clone(),
            self.metrics_provider()?,
            self.decisions.clone(),
            self.config.rule_table(),
            self.config.engine_config(),
        )
        .with_notifier(self.notifier.clone()))
    }
}

fn build_notifier(config: &AppConfig) -> Result<NotifierHandle> {
    let n = &config.notifier;
    if !n.enabled {
        return Ok(NotifierHandle::disabled());
    }
    let timeout = Duration::from_secs(n.timeout_secs);
    let backend: Arc<dyn Notifier> = match &n.webhook_url {
        Some(url) => {
            info!(format = ?n.format, "webhook notifications enabled");
            Arc::new(WebhookNotifier::new(url.clone(), n.format, timeout)?)
        }
        None => Arc::new(TracingNotifier),
    };
    Ok(NotifierHandle::new(backend, timeout))
}
