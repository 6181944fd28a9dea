//! Strategy switching: pure rule evaluation and the engine that drives it

pub mod rules;
pub mod switching;

pub use rules::{
    evaluate, rank_mutations, select_mutation, ActiveView, AssetMemory, CandidateIndex, Evaluation,
    RuleOverride, RuleTable, Thresholds, NO_CANDIDATE, RISK_MULTIPLIER_KEY,
};
pub use switching::{
    EngineConfig, EngineState, EngineStats, SwitchingEngine, TickMode, TickOutcome, TickReport,
};
