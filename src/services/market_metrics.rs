//! Per-asset performance metrics consumed by the switching engine

use crate::domain::{MetricsSnapshot, SessionWindow, VolatilityRegime};
use crate::error::{Result, StrategosError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Source of metrics snapshots
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Latest snapshot for `asset` over `window` (e.g. "24h")
    async fn snapshot(&self, asset: &str, window: &str) -> Result<MetricsSnapshot>;
}

/// In-memory provider for tests and dry runs
#[derive(Debug, Default)]
pub struct StaticMetricsProvider {
    snapshots: RwLock<HashMap<String, MetricsSnapshot>>,
}

impl StaticMetricsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, snapshot: MetricsSnapshot) {
        self.snapshots
            .write()
            .await
            .insert(snapshot.asset.to_ascii_uppercase(), snapshot);
    }

    pub async fn remove(&self, asset: &str) {
        self.snapshots
            .write()
            .await
            .remove(&asset.to_ascii_uppercase());
    }

    /// Convenience snapshot stamped with the current session
    pub fn reading(
        asset: &str,
        win_rate: f64,
        drawdown: f64,
        volatility_regime: VolatilityRegime,
    ) -> MetricsSnapshot {
        let now = Utc::now();
        MetricsSnapshot {
            asset: asset.to_ascii_uppercase(),
            window: "24h".to_string(),
            win_rate,
            drawdown,
            volatility_regime,
            session_window: SessionWindow::at(now),
            captured_at: now,
        }
    }
}

#[async_trait]
impl MetricsProvider for StaticMetricsProvider {
    async fn snapshot(&self, asset: &str, window: &str) -> Result<MetricsSnapshot> {
        let guard = self.snapshots.read().await;
        let mut snapshot = guard
            .get(&asset.to_ascii_uppercase())
            .cloned()
            .ok_or_else(|| {
                StrategosError::ProviderUnavailable(format!("no metrics for {asset}"))
            })?;
        snapshot.window = window.to_string();
        Ok(snapshot)
    }
}
