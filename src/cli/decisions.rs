//! Decision log commands
//!
//! strategos decisions recent - Most recent decisions, newest first
//! strategos decisions purge  - Delete entries older than a retention window

use anyhow::{bail, Result};
use chrono::{Duration, Utc};
use clap::Subcommand;

use super::context::AppContext;
use super::output::{print_items, DecisionRow, OutputMode};

#[derive(Subcommand, Debug)]
pub enum DecisionCommands {
    /// Show the most recent decisions
    Recent {
        #[arg(short, long, default_value_t = 50)]
        limit: u32,
        #[arg(long)]
        json: bool,
    },

    /// Delete decisions older than the given number of days
    Purge {
        #[arg(long)]
        older_than_days: i64,
    },
}

impl DecisionCommands {
    pub async fn run(self, ctx: &AppContext) -> Result<()> {
        match self {
            Self::Recent { limit, json } => {
                let entries = ctx.decisions.recent(limit).await?;
                let rows: Vec<DecisionRow> = entries.iter().map(DecisionRow::from).collect();
                print_items(&rows, &entries, OutputMode::from_json_flag(json))
            }
            Self::Purge { older_than_days } => {
                if older_than_days < 1 {
                    bail!("--older-than-days must be at least 1");
                }
                let cutoff = Utc::now() - Duration::days(older_than_days);
                let removed = ctx.decisions.purge_before(cutoff).await?;
                println!("removed {removed} decisions older than {}", cutoff.format("%Y-%m-%d %H:%M"));
                Ok(())
            }
        }
    }
}
