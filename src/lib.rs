pub mod adapters;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod crypto;
pub mod domain;
pub mod engine;
pub mod error;
pub mod persistence;
pub mod services;
pub mod store;
pub mod validation;

pub use adapters::{InMemoryConfigRepository, InMemoryDecisionSink, PostgresStore};
pub use config::AppConfig;
pub use coordination::{GracefulShutdown, RetryPolicy, ShutdownSignal, ShutdownToken};
pub use crypto::CipherBox;
pub use domain::{
    ConfigId, Configuration, ConfigurationDraft, ConfigurationPatch, DecisionLogEntry,
    DecisionOutcome, MetricsSnapshot, StrategyCategory, SwitchDecision, SwitchTrigger,
};
pub use engine::{EngineConfig, SwitchingEngine, TickMode, TickOutcome, TickReport};
pub use error::{Result, StrategosError};
pub use persistence::{DecisionLog, DecisionSink};
pub use services::{MetricsProvider, NotifierHandle};
pub use store::{ConfigRepository, ConfigStore};
