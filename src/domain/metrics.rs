use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse volatility classification supplied by the metrics provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityRegime {
    Low,
    Medium,
    High,
}

impl fmt::Display for VolatilityRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolatilityRegime::Low => write!(f, "low"),
            VolatilityRegime::Medium => write!(f, "medium"),
            VolatilityRegime::High => write!(f, "high"),
        }
    }
}

/// Trading session by UTC hour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionWindow {
    Asian,
    OverlapAsianEuropean,
    European,
    OverlapEuropeanAmerican,
    American,
}

impl SessionWindow {
    pub const ALL: [SessionWindow; 5] = [
        SessionWindow::Asian,
        SessionWindow::OverlapAsianEuropean,
        SessionWindow::European,
        SessionWindow::OverlapEuropeanAmerican,
        SessionWindow::American,
    ];

    /// Map a UTC hour (0-23) onto a session
    pub fn from_utc_hour(hour: u32) -> SessionWindow {
        match hour {
            0..=7 => SessionWindow::Asian,
            8..=11 => SessionWindow::OverlapAsianEuropean,
            12..=15 => SessionWindow::European,
            16..=19 => SessionWindow::OverlapEuropeanAmerican,
            _ => SessionWindow::American,
        }
    }

    pub fn at(time: DateTime<Utc>) -> SessionWindow {
        Self::from_utc_hour(time.hour())
    }

    pub fn is_overlap(&self) -> bool {
        matches!(
            self,
            SessionWindow::OverlapAsianEuropean | SessionWindow::OverlapEuropeanAmerican
        )
    }

    /// Overlap sessions on weekdays
    pub fn is_peak(time: DateTime<Utc>) -> bool {
        time.weekday().number_from_monday() <= 5 && Self::at(time).is_overlap()
    }
}

impl fmt::Display for SessionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionWindow::Asian => "asian",
            SessionWindow::OverlapAsianEuropean => "overlap_asian_european",
            SessionWindow::European => "european",
            SessionWindow::OverlapEuropeanAmerican => "overlap_european_american",
            SessionWindow::American => "american",
        };
        write!(f, "{}", s)
    }
}

/// Point-in-time performance reading for one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub asset: String,
    /// Evaluation window the rates were computed over (e.g. "24h")
    pub window: String,
    /// Fraction of winning trades (0.0-1.0)
    pub win_rate: f64,
    /// Peak-to-trough drawdown (0.0-1.0)
    pub drawdown: f64,
    pub volatility_regime: VolatilityRegime,
    pub session_window: SessionWindow,
    pub captured_at: DateTime<Utc>,
}

impl MetricsSnapshot {
    /// Reject readings outside their documented ranges
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.win_rate) {
            return Err(format!("win_rate {} outside [0, 1]", self.win_rate));
        }
        if !(0.0..=1.0).contains(&self.drawdown) {
            return Err(format!("drawdown {} outside [0, 1]", self.drawdown));
        }
        Ok(())
    }
}
