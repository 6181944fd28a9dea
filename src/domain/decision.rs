use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::configuration::{ConfigId, StrategyCategory};
use super::metrics::MetricsSnapshot;

/// Condition that forced a decision, in precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchTrigger {
    PoorWinRate,
    Drawdown,
    VolatilityChange,
    SessionChange,
    ScheduledReevaluation,
}

impl SwitchTrigger {
    /// 1 = strongest
    pub fn precedence(&self) -> u8 {
        match self {
            SwitchTrigger::PoorWinRate => 1,
            SwitchTrigger::Drawdown => 2,
            SwitchTrigger::VolatilityChange => 3,
            SwitchTrigger::SessionChange => 4,
            SwitchTrigger::ScheduledReevaluation => 5,
        }
    }

    /// Triggers that demand leaving the current category
    pub fn forces_switch(&self) -> bool {
        matches!(self, SwitchTrigger::PoorWinRate | SwitchTrigger::Drawdown)
    }

    /// Default confidence attached to decisions this trigger produces
    pub fn confidence(&self) -> f64 {
        match self {
            SwitchTrigger::PoorWinRate => 0.8,
            SwitchTrigger::Drawdown => 0.85,
            SwitchTrigger::VolatilityChange => 0.7,
            SwitchTrigger::SessionChange => 0.65,
            SwitchTrigger::ScheduledReevaluation => 0.6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchTrigger::PoorWinRate => "poor_win_rate",
            SwitchTrigger::Drawdown => "drawdown",
            SwitchTrigger::VolatilityChange => "volatility_change",
            SwitchTrigger::SessionChange => "session_change",
            SwitchTrigger::ScheduledReevaluation => "scheduled_reevaluation",
        }
    }
}

impl fmt::Display for SwitchTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Risk tightening emitted alongside a drawdown trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAdjustment {
    /// Multiplier applied to the configured position size
    pub position_size_multiplier: f64,
    /// Effective position size after the multiplier, when the tree carries one
    pub position_size_pct: Option<f64>,
    pub reason: String,
}

/// What a single evaluation decided
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionOutcome {
    Keep,
    Switch {
        target: ConfigId,
        category: StrategyCategory,
    },
    AdjustRisk(RiskAdjustment),
}

impl DecisionOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            DecisionOutcome::Keep => "keep",
            DecisionOutcome::Switch { .. } => "switch",
            DecisionOutcome::AdjustRisk(_) => "adjust_risk",
        }
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(self, DecisionOutcome::Keep)
    }
}

impl fmt::Display for DecisionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionOutcome::Keep => write!(f, "keep"),
            DecisionOutcome::Switch { target, category } => {
                write!(f, "switch({} -> {})", category, target)
            }
            DecisionOutcome::AdjustRisk(adj) => {
                write!(f, "adjust_risk(x{:.2})", adj.position_size_multiplier)
            }
        }
    }
}

/// Outcome of evaluating one asset in one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchDecision {
    pub asset: String,
    pub outcome: DecisionOutcome,
    pub trigger: Option<SwitchTrigger>,
    pub reason: String,
    pub confidence: f64,
    /// Combined risk adjustment (drawdown trigger), also present on `switch`
    pub risk_adjustment: Option<RiskAdjustment>,
    pub snapshot: MetricsSnapshot,
}

impl SwitchDecision {
    pub fn keep(snapshot: MetricsSnapshot, trigger: Option<SwitchTrigger>, reason: impl Into<String>) -> Self {
        Self {
            asset: snapshot.asset.clone(),
            outcome: DecisionOutcome::Keep,
            trigger,
            reason: reason.into(),
            confidence: trigger.map(|t| t.confidence()).unwrap_or(0.5),
            risk_adjustment: None,
            snapshot,
        }
    }
}

/// Immutable audit record of one evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    /// Assigned by the sink
    pub id: Option<i64>,
    pub tick_id: Uuid,
    pub asset: String,
    pub outcome: DecisionOutcome,
    pub trigger: Option<SwitchTrigger>,
    pub reason: String,
    pub confidence: f64,
    pub risk_adjustment: Option<RiskAdjustment>,
    pub snapshot: serde_json::Value,
    /// Active configuration when the tick started
    pub from_configuration: Option<ConfigId>,
    /// Whether this decision's mutation was carried out
    pub applied: bool,
    pub created_at: DateTime<Utc>,
}

impl DecisionLogEntry {
    pub fn from_decision(
        tick_id: Uuid,
        decision: &SwitchDecision,
        from_configuration: Option<ConfigId>,
        applied: bool,
    ) -> Self {
        Self {
            id: None,
            tick_id,
            asset: decision.asset.clone(),
            outcome: decision.outcome.clone(),
            trigger: decision.trigger,
            reason: decision.reason.clone(),
            confidence: decision.confidence,
            risk_adjustment: decision.risk_adjustment.clone(),
            snapshot: serde_json::to_value(&decision.snapshot).unwrap_or(serde_json::Value::Null),
            from_configuration,
            applied,
            created_at: Utc::now(),
        }
    }
}
