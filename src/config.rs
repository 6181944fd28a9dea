use crate::adapters::WebhookFormat;
use crate::coordination::RetryPolicy;
use crate::engine::{EngineConfig, RuleOverride, RuleTable, Thresholds};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub encryption: EncryptionConfig,
    pub switching: SwitchingConfig,
    pub retry: RetryConfig,
    pub metrics: MetricsConfig,
    pub notifier: NotifierConfig,
    pub decision_log: DecisionLogConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; without one the in-memory store is used
    pub url: Option<String>,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Seconds to wait for a pooled connection
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
            acquire_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Base64 32-byte key (STRATEGOS_ENCRYPTION__KEY)
    pub key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SwitchingConfig {
    /// Seconds between ticks
    pub check_interval_secs: u64,
    /// Hours between forced full reevaluations
    pub full_reevaluation_hours: u64,
    /// Metrics window, e.g. "24h"
    pub evaluation_window: String,
    /// Assets watched when the active configuration lists none
    pub default_assets: Vec<String>,
    /// Deadline for evaluating and deciding within one tick
    pub tick_timeout_secs: u64,
    /// Minimum seconds a strategy stays active before the engine switches again
    pub min_strategy_duration_secs: u64,
    pub thresholds: Thresholds,
    /// Overrides of the session x volatility table
    pub rules: Vec<RuleOverride>,
    /// Compare-and-swap attempts when activating
    pub max_swap_attempts: u32,
}

impl Default for SwitchingConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 300,
            full_reevaluation_hours: 8,
            evaluation_window: "24h".to_string(),
            default_assets: vec!["BTC".to_string(), "ETH".to_string()],
            tick_timeout_secs: 60,
            min_strategy_duration_secs: 0,
            thresholds: Thresholds::default(),
            rules: Vec::new(),
            max_swap_attempts: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Deadline for each store or provider call
    pub call_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 200,
            max_backoff_ms: 2000,
            call_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Base URL of the metrics service; without one a static provider is used
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub enabled: bool,
    /// Webhook endpoint; notifications go to the log when unset
    pub webhook_url: Option<String>,
    pub format: WebhookFormat,
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            webhook_url: None,
            format: WebhookFormat::Json,
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecisionLogConfig {
    /// Deadline for one append before the entry is dropped
    pub write_timeout_ms: u64,
}

impl Default for DecisionLogConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable JSON formatted logs
    pub json: bool,
    /// Directory for the daily rolling log file
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();
        let env = std::env::var("STRATEGOS_ENV").unwrap_or_else(|_| "development".to_string());

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            .set_default("switching.check_interval_secs", 300)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(File::from(config_dir.join(format!("{env}.toml"))).required(false))
            // Override with environment variables (STRATEGOS_DATABASE__URL, etc.)
            .add_source(
                Environment::with_prefix("STRATEGOS")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("switching.default_assets")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_backoff: Duration::from_millis(self.retry.base_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            call_timeout: Duration::from_millis(self.retry.call_timeout_ms),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        let s = &self.switching;
        EngineConfig {
            check_interval: Duration::from_secs(s.check_interval_secs),
            full_reevaluation_interval: Duration::from_secs(s.full_reevaluation_hours * 3600),
            evaluation_window: s.evaluation_window.clone(),
            default_assets: s.default_assets.clone(),
            tick_timeout: Duration::from_secs(s.tick_timeout_secs),
            min_strategy_duration: Duration::from_secs(s.min_strategy_duration_secs),
            thresholds: s.thresholds.clone(),
            retry: self.retry_policy(),
        }
    }

    pub fn rule_table(&self) -> RuleTable {
        RuleTable::new(self.switching.rules.clone())
    }

    /// Validate configuration values, reporting every problem at once
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.database.max_connections == 0 {
            errors.push("database.max_connections must be positive".to_string());
        }

        let s = &self.switching;
        if s.check_interval_secs == 0 {
            errors.push("switching.check_interval_secs must be positive".to_string());
        }
        if s.full_reevaluation_hours == 0 {
            errors.push("switching.full_reevaluation_hours must be positive".to_string());
        }
        if s.tick_timeout_secs == 0 {
            errors.push("switching.tick_timeout_secs must be positive".to_string());
        }
        if s.evaluation_window.trim().is_empty() {
            errors.push("switching.evaluation_window must not be empty".to_string());
        }
        if s.max_swap_attempts == 0 {
            errors.push("switching.max_swap_attempts must be positive".to_string());
        }

        let t = &s.thresholds;
        if !(0.0..=1.0).contains(&t.min_win_rate) {
            errors.push("switching.thresholds.min_win_rate must be between 0 and 1".to_string());
        }
        if !(0.0..=1.0).contains(&t.max_drawdown) {
            errors.push("switching.thresholds.max_drawdown must be between 0 and 1".to_string());
        }
        if t.risk_size_multiplier <= 0.0 || t.risk_size_multiplier > 1.0 {
            errors.push(
                "switching.thresholds.risk_size_multiplier must be in (0, 1]".to_string(),
            );
        }

        if self.retry.max_attempts == 0 {
            errors.push("retry.max_attempts must be at least 1".to_string());
        }
        if self.retry.base_backoff_ms > self.retry.max_backoff_ms {
            errors.push("retry.base_backoff_ms must not exceed retry.max_backoff_ms".to_string());
        }
        if self.retry.call_timeout_ms == 0 {
            errors.push("retry.call_timeout_ms must be positive".to_string());
        }

        if let Some(url) = &self.metrics.base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push(format!("metrics.base_url is not an http(s) URL: {url}"));
            }
        }
        if let Some(url) = &self.notifier.webhook_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push(format!("notifier.webhook_url is not an http(s) URL: {url}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        let engine = config.engine_config();
        assert_eq!(engine.check_interval, Duration::from_secs(300));
        assert_eq!(engine.full_reevaluation_interval, Duration::from_secs(8 * 3600));
        assert_eq!(engine.retry.max_attempts, 3);
        assert_eq!(engine.min_strategy_duration, Duration::ZERO);
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let mut config = AppConfig::default();
        config.switching.check_interval_secs = 0;
        config.retry.max_attempts = 0;
        config.switching.thresholds.min_win_rate = 1.5;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_rule_overrides_deserialize() {
        let config: SwitchingConfig = serde_json::from_value(serde_json::json!({
            "rules": [{"volatility": "high", "category": "scalping"}],
        }))
        .unwrap();
        assert_eq!(config.rules.len(), 1);
        assert!(config.rules[0].session.is_none());
        assert_eq!(config.check_interval_secs, 300);
    }
}
