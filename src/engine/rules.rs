//! Rule table and trigger evaluation
//!
//! Everything here is pure: given a snapshot, what the engine remembers about
//! the asset, and the current candidates, produce one [`SwitchDecision`].

use crate::domain::{
    ConfigId, Configuration, DecisionOutcome, MetricsSnapshot, ParamSection, RiskAdjustment,
    SessionWindow, StrategyCategory, SwitchDecision, SwitchTrigger, VolatilityRegime,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key written into `risk_management` when the engine scales position size
pub const RISK_MULTIPLIER_KEY: &str = "position_size_multiplier";

pub const NO_CANDIDATE: &str = "no candidate available";

/// Trigger thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Below this win rate the current category is abandoned (default: 0.35)
    pub min_win_rate: f64,
    /// Above this drawdown risk is reduced (default: 0.20)
    pub max_drawdown: f64,
    /// Position size multiplier emitted on drawdown (default: 0.5)
    pub risk_size_multiplier: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_win_rate: 0.35,
            max_drawdown: 0.20,
            risk_size_multiplier: 0.5,
        }
    }
}

/// One override of the default rule table. A missing session matches all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOverride {
    #[serde(default)]
    pub session: Option<SessionWindow>,
    pub volatility: VolatilityRegime,
    pub category: StrategyCategory,
}

/// Session x volatility -> preferred category
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleTable {
    overrides: Vec<RuleOverride>,
}

impl RuleTable {
    pub fn new(overrides: Vec<RuleOverride>) -> Self {
        Self { overrides }
    }

    /// Session-specific overrides beat session-wide ones, which beat the defaults
    pub fn preferred(&self, session: SessionWindow, regime: VolatilityRegime) -> StrategyCategory {
        let exact = self
            .overrides
            .iter()
            .find(|o| o.session == Some(session) && o.volatility == regime);
        let wide = || {
            self.overrides
                .iter()
                .find(|o| o.session.is_none() && o.volatility == regime)
        };
        exact
            .or_else(wide)
            .map(|o| o.category)
            .unwrap_or_else(|| default_rule(session, regime))
    }
}

fn default_rule(session: SessionWindow, regime: VolatilityRegime) -> StrategyCategory {
    match regime {
        VolatilityRegime::High if session.is_overlap() => StrategyCategory::Scalping,
        VolatilityRegime::High => StrategyCategory::Breakout,
        VolatilityRegime::Medium => StrategyCategory::Momentum,
        VolatilityRegime::Low => StrategyCategory::MeanReversion,
    }
}

/// What the engine remembers about an asset from the previous tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetMemory {
    pub regime: VolatilityRegime,
    pub session: SessionWindow,
}

impl AssetMemory {
    pub fn of(snapshot: &MetricsSnapshot) -> Self {
        Self {
            regime: snapshot.volatility_regime,
            session: snapshot.session_window,
        }
    }
}

/// The parts of the active configuration the rules look at
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveView {
    pub id: ConfigId,
    pub category: StrategyCategory,
    pub position_size_pct: Option<f64>,
    /// Multiplier already applied by an earlier adjustment (1.0 when none)
    pub risk_multiplier: f64,
    /// `risk_management` is complete enough to accept a multiplier
    pub risk_adjustable: bool,
}

impl ActiveView {
    pub fn of(config: &Configuration) -> Self {
        Self {
            id: config.id,
            category: config.category,
            position_size_pct: config.risk_management.get_f64("position_size_pct"),
            risk_multiplier: config
                .risk_management
                .get_f64(RISK_MULTIPLIER_KEY)
                .unwrap_or(1.0),
            risk_adjustable: !config.risk_management.is_empty()
                && ParamSection::RiskManagement
                    .validate(&config.risk_management)
                    .is_empty(),
        }
    }
}

/// Best switch target per category
pub type CandidateIndex = BTreeMap<StrategyCategory, ConfigId>;

/// Inputs for evaluating one asset
#[derive(Debug, Clone, Copy)]
pub struct Evaluation<'a> {
    pub snapshot: &'a MetricsSnapshot,
    pub active: Option<&'a ActiveView>,
    pub previous: Option<AssetMemory>,
    pub full_reevaluation_due: bool,
    pub candidates: &'a CandidateIndex,
}

/// Produce the decision for one asset
pub fn evaluate(input: Evaluation<'_>, rules: &RuleTable, t: &Thresholds) -> SwitchDecision {
    let snap = input.snapshot;
    let preferred = rules.preferred(snap.session_window, snap.volatility_regime);

    let Some(active) = input.active else {
        // Nothing active yet: adopt the preferred category if anything serves it
        return match input.candidates.get(&preferred) {
            Some(&target) => switch(
                snap,
                None,
                target,
                preferred,
                format!("no active configuration, adopting preferred category {preferred}"),
                None,
            ),
            None => SwitchDecision::keep(snap.clone(), None, NO_CANDIDATE),
        };
    };

    let poor = snap.win_rate < t.min_win_rate;
    let drawdown = snap.drawdown > t.max_drawdown;
    let adjustment = drawdown.then(|| RiskAdjustment {
        position_size_multiplier: t.risk_size_multiplier,
        position_size_pct: active
            .position_size_pct
            .map(|pct| pct * t.risk_size_multiplier),
        reason: format!(
            "drawdown {:.2} above {:.2}",
            snap.drawdown, t.max_drawdown
        ),
    });

    if poor {
        let away = |c: StrategyCategory| c != active.category;
        // During a drawdown prefer a lower-risk target, away from current otherwise
        let target = match adjustment {
            Some(_) => pick_target(input.candidates, preferred, |c| {
                away(c) && c.risk_rank() < active.category.risk_rank()
            })
            .or_else(|| pick_target(input.candidates, preferred, away)),
            None => pick_target(input.candidates, preferred, away),
        };
        let reason = format!(
            "win rate {:.2} below {:.2} for {}",
            snap.win_rate, t.min_win_rate, active.category
        );
        return match target {
            Some((category, id)) => switch(
                snap,
                Some(SwitchTrigger::PoorWinRate),
                id,
                category,
                reason,
                adjustment,
            ),
            None => match adjustment {
                Some(adj) => adjust_risk(snap, active, adj, t),
                None => SwitchDecision::keep(
                    snap.clone(),
                    Some(SwitchTrigger::PoorWinRate),
                    NO_CANDIDATE,
                ),
            },
        };
    }

    if let Some(adj) = adjustment {
        let current_rank = active.category.risk_rank();
        let target = pick_target(input.candidates, preferred, |c| {
            c.risk_rank() < current_rank
        });
        return match target {
            Some((category, id)) => {
                let reason = format!("{}, moving to lower-risk {}", adj.reason, category);
                switch(
                    snap,
                    Some(SwitchTrigger::Drawdown),
                    id,
                    category,
                    reason,
                    Some(adj),
                )
            }
            None => adjust_risk(snap, active, adj, t),
        };
    }

    let recompute = match input.previous {
        Some(prev) if prev.regime != snap.volatility_regime => {
            Some(SwitchTrigger::VolatilityChange)
        }
        Some(prev) if prev.session != snap.session_window => Some(SwitchTrigger::SessionChange),
        _ if input.full_reevaluation_due => Some(SwitchTrigger::ScheduledReevaluation),
        _ => None,
    };

    let Some(trigger) = recompute else {
        return SwitchDecision::keep(snap.clone(), None, "no trigger fired");
    };

    if preferred == active.category {
        return SwitchDecision::keep(
            snap.clone(),
            Some(trigger),
            format!("{} still preferred", preferred),
        );
    }

    match input.candidates.get(&preferred) {
        Some(&target) => switch(
            snap,
            Some(trigger),
            target,
            preferred,
            format!(
                "{} regime in {} session prefers {} over {}",
                snap.volatility_regime, snap.session_window, preferred, active.category
            ),
            None,
        ),
        None => SwitchDecision::keep(snap.clone(), Some(trigger), NO_CANDIDATE),
    }
}

/// Preferred category when allowed and served, else the lowest-risk allowed one
fn pick_target(
    candidates: &CandidateIndex,
    preferred: StrategyCategory,
    allowed: impl Fn(StrategyCategory) -> bool,
) -> Option<(StrategyCategory, ConfigId)> {
    if allowed(preferred) {
        if let Some(&id) = candidates.get(&preferred) {
            return Some((preferred, id));
        }
    }
    StrategyCategory::BY_RISK
        .into_iter()
        .filter(|c| allowed(*c))
        .find_map(|c| candidates.get(&c).map(|&id| (c, id)))
}

fn switch(
    snap: &MetricsSnapshot,
    trigger: Option<SwitchTrigger>,
    target: ConfigId,
    category: StrategyCategory,
    reason: String,
    risk_adjustment: Option<RiskAdjustment>,
) -> SwitchDecision {
    SwitchDecision {
        asset: snap.asset.clone(),
        outcome: DecisionOutcome::Switch { target, category },
        trigger,
        reason,
        confidence: trigger.map(|t| t.confidence()).unwrap_or(0.5),
        risk_adjustment,
        snapshot: snap.clone(),
    }
}

fn adjust_risk(
    snap: &MetricsSnapshot,
    active: &ActiveView,
    adj: RiskAdjustment,
    t: &Thresholds,
) -> SwitchDecision {
    if !active.risk_adjustable {
        return SwitchDecision::keep(
            snap.clone(),
            Some(SwitchTrigger::Drawdown),
            format!(
                "{}, no lower-risk candidate and risk_management has no position size to scale",
                adj.reason
            ),
        );
    }
    // Not compounded across ticks: the multiplier is absolute
    if active.risk_multiplier <= t.risk_size_multiplier + f64::EPSILON {
        return SwitchDecision::keep(
            snap.clone(),
            Some(SwitchTrigger::Drawdown),
            format!("{}, risk already reduced and no lower-risk candidate", adj.reason),
        );
    }
    SwitchDecision {
        asset: snap.asset.clone(),
        outcome: DecisionOutcome::AdjustRisk(adj.clone()),
        trigger: Some(SwitchTrigger::Drawdown),
        reason: format!("{}, no lower-risk candidate", adj.reason),
        confidence: SwitchTrigger::Drawdown.confidence(),
        risk_adjustment: Some(adj),
        snapshot: snap.clone(),
    }
}

/// Indices of mutating decisions, best first: strongest trigger, then higher
/// confidence, then earlier asset
pub fn rank_mutations(decisions: &[SwitchDecision]) -> Vec<usize> {
    let rank = |d: &SwitchDecision| d.trigger.map(|t| t.precedence()).unwrap_or(u8::MAX);
    let mut ranked: Vec<usize> = decisions
        .iter()
        .enumerate()
        .filter(|(_, d)| d.outcome.is_mutation())
        .map(|(i, _)| i)
        .collect();
    ranked.sort_by(|&ia, &ib| {
        let (a, b) = (&decisions[ia], &decisions[ib]);
        rank(a)
            .cmp(&rank(b))
            .then(b.confidence.total_cmp(&a.confidence))
            .then(ia.cmp(&ib))
    });
    ranked
}

/// Index of the decision to try first this tick
pub fn select_mutation(decisions: &[SwitchDecision]) -> Option<usize> {
    rank_mutations(decisions).first().copied()
}
