//! Strategos CLI
//!
//! Commands:
//! - `strategos run` - Run the switching engine
//! - `strategos config` - Manage strategy configurations
//! - `strategos decisions` - Inspect and prune the decision log
//! - `strategos evaluate` - One dry evaluation against live metrics

pub mod config;
pub mod context;
pub mod decisions;
pub mod engine;
pub mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use config::ConfigCommands;
pub use context::AppContext;
pub use decisions::DecisionCommands;

/// Active strategy store and switching engine
#[derive(Parser, Debug)]
#[command(name = "strategos")]
#[command(author, version, about = "Active trading-strategy store with an automated switching engine")]
pub struct Cli {
    /// Directory holding default.toml and {STRATEGOS_ENV}.toml
    #[arg(long, global = true, env = "STRATEGOS_CONFIG_DIR", default_value = "config")]
    pub config_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the switching engine until interrupted
    Run,

    /// Apply database migrations
    Migrate,

    /// Print a fresh base64 encryption key
    Keygen,

    /// Manage strategy configurations
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Inspect the decision log
    #[command(subcommand)]
    Decisions(DecisionCommands),

    /// Evaluate once without applying or logging anything
    Evaluate {
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    /// Commands that run long enough to want file logging
    pub fn is_long_running(&self) -> bool {
        matches!(self, Commands::Run)
    }
}

impl Cli {
    pub async fn run(self, ctx: &AppContext) -> Result<()> {
        match self.command {
            Commands::Run => engine::run_engine(ctx).await,
            Commands::Migrate => {
                ctx.require_postgres()?.migrate().await?;
                println!("migrations applied");
                Ok(())
            }
            Commands::Keygen => {
                println!("{}", crate::crypto::CipherBox::generate_key());
                Ok(())
            }
            Commands::Config(cmd) => cmd.run(ctx).await,
            Commands::Decisions(cmd) => cmd.run(ctx).await,
            Commands::Evaluate { json } => engine::evaluate_once(ctx, json).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_config_list() {
        let cli = Cli::try_parse_from(["strategos", "config", "list", "--limit", "10"]).unwrap();
        match cli.command {
            Commands::Config(ConfigCommands::List { limit, all, .. }) => {
                assert_eq!(limit, 10);
                assert!(!all);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_parses_create_assets() {
        let cli = Cli::try_parse_from([
            "strategos", "config", "create", "--name", "BTC Scalper", "--assets", "BTC,ETH",
            "--activate",
        ])
        .unwrap();
        match cli.command {
            Commands::Config(ConfigCommands::Create {
                name,
                assets,
                activate,
                ..
            }) => {
                assert_eq!(name.as_deref(), Some("BTC Scalper"));
                assert_eq!(assets, vec!["BTC".to_string(), "ETH".to_string()]);
                assert!(activate);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_only_run_is_long_running() {
        assert!(Commands::Run.is_long_running());
        assert!(!Commands::Keygen.is_long_running());
    }
}
