//! Persistence Layer for the decision audit trail

pub mod decision_log;

pub use decision_log::{DecisionLog, DecisionSink};
