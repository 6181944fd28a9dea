mod main_runtime;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use strategos::cli::{AppContext, Cli, Commands};
use strategos::config::AppConfig;

use main_runtime::{init_logging, init_logging_simple};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Key generation needs no configuration at all
    if matches!(cli.command, Commands::Keygen) {
        println!("{}", strategos::CipherBox::generate_key());
        return Ok(());
    }

    let config = AppConfig::load_from(&cli.config_dir)
        .with_context(|| format!("failed to load configuration from {}", cli.config_dir.display()))?;

    if cli.command.is_long_running() {
        init_logging(&config.logging);
    } else {
        init_logging_simple(&config.logging);
    }

    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("config: {e}");
        }
        return Err(anyhow!("{} configuration problem(s)", errors.len()));
    }

    let ctx = AppContext::connect(config).await?;
    cli.run(&ctx).await
}
