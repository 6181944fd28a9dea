//! Engine commands: the long-running switcher and a one-off dry evaluation

use anyhow::{anyhow, Result};
use std::sync::Arc;
use tracing::{error, info};

use super::context::AppContext;
use super::output::{print_items, DecisionRow, OutputMode};
use crate::coordination::{install_signal_handlers, GracefulShutdown, ShutdownConfig};
use crate::engine::{TickMode, TickOutcome};

/// Run the switching engine until SIGINT/SIGTERM
pub async fn run_engine(ctx: &AppContext) -> Result<()> {
    let engine = Arc::new(ctx.engine()?);
    engine.preflight().await?;

    let shutdown = Arc::new(GracefulShutdown::new(ShutdownConfig {
        drain_timeout_secs: ctx.config.switching.tick_timeout_secs,
    }));
    install_signal_handlers(shutdown.clone()).await;

    let mut token = shutdown.token();
    let mut task = tokio::spawn(engine.clone().run(shutdown.token()));

    tokio::select! {
        finished = &mut task => {
            // Engine stopped on its own
            return match finished {
                Ok(result) => result.map_err(Into::into),
                Err(e) => Err(anyhow!("engine task failed: {e}")),
            };
        }
        signal = token.wait_for_shutdown() => {
            info!(%signal, "stopping switching engine");
        }
    }

    shutdown
        .execute(async {
            match (&mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "engine stopped with error"),
                Err(e) => error!(error = %e, "engine task failed"),
            }
        })
        .await?;

    let stats = engine.stats();
    info!(
        ticks = stats.ticks_completed,
        failed = stats.ticks_failed,
        skipped_overlap = stats.ticks_skipped_overlap,
        decisions_lost = stats.decisions_lost,
        "switching engine exited"
    );
    Ok(())
}

/// Evaluate once against live metrics without applying or logging anything
pub async fn evaluate_once(ctx: &AppContext, json: bool) -> Result<()> {
    let engine = ctx.engine()?;
    engine.preflight().await?;

    match engine.tick_with(TickMode::DryRun).await? {
        TickOutcome::Completed(report) => {
            let rows: Vec<DecisionRow> = report.entries.iter().map(DecisionRow::from).collect();
            print_items(&rows, &report.entries, OutputMode::from_json_flag(json))?;
            if !json {
                if !report.skipped_assets.is_empty() {
                    println!("no metrics for: {}", report.skipped_assets.join(", "));
                }
                if report.full_reevaluation {
                    println!("(first evaluation counts as a full reevaluation)");
                }
            }
            Ok(())
        }
        TickOutcome::SkippedOverlap => Err(anyhow!("another evaluation is already running")),
    }
}
