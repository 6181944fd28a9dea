//! HTTP JSON metrics provider
//!
//! `GET {base_url}/metrics/{asset}?window={window}` returning one snapshot.

use crate::domain::{MetricsSnapshot, SessionWindow, VolatilityRegime};
use crate::error::{Result, StrategosError};
use crate::services::MetricsProvider;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct MetricsResponse {
    #[serde(alias = "winRate")]
    win_rate: f64,
    #[serde(alias = "maxDrawdown", alias = "max_drawdown")]
    drawdown: f64,
    #[serde(alias = "volatilityRegime")]
    volatility_regime: VolatilityRegime,
    #[serde(default, alias = "sessionWindow")]
    session_window: Option<SessionWindow>,
    #[serde(default, alias = "capturedAt")]
    captured_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct HttpMetricsProvider {
    http: Client,
    base_url: String,
}

impl HttpMetricsProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("strategos/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, asset: &str) -> String {
        format!("{}/metrics/{}", self.base_url, asset)
    }
}

#[async_trait]
impl MetricsProvider for HttpMetricsProvider {
    async fn snapshot(&self, asset: &str, window: &str) -> Result<MetricsSnapshot> {
        let resp = self
            .http
            .get(self.url(asset))
            .query(&[("window", window)])
            .send()
            .await
            .map_err(|e| StrategosError::ProviderUnavailable(format!("{asset}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(
                if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    StrategosError::ProviderUnavailable(format!("{asset}: HTTP {status}: {body}"))
                } else {
                    StrategosError::Internal(format!(
                        "metrics request for {asset} rejected: HTTP {status}: {body}"
                    ))
                },
            );
        }

        let parsed: MetricsResponse = resp.json().await.map_err(|e| {
            StrategosError::ProviderUnavailable(format!("{asset}: malformed metrics payload: {e}"))
        })?;

        let captured_at = parsed.captured_at.unwrap_or_else(Utc::now);
        let snapshot = MetricsSnapshot {
            asset: asset.to_string(),
            window: window.to_string(),
            win_rate: parsed.win_rate,
            drawdown: parsed.drawdown,
            volatility_regime: parsed.volatility_regime,
            session_window: parsed
                .session_window
                .unwrap_or_else(|| SessionWindow::at(captured_at)),
            captured_at,
        };
        snapshot
            .validate()
            .map_err(|e| StrategosError::ProviderUnavailable(format!("{asset}: {e}")))?;

        debug!(
            asset,
            win_rate = snapshot.win_rate,
            drawdown = snapshot.drawdown,
            regime = %snapshot.volatility_regime,
            "metrics fetched"
        );
        Ok(snapshot)
    }
}
