//! Strategy configuration commands
//!
//! strategos config list        - List configurations, newest first
//! strategos config show <id>   - Show one configuration
//! strategos config create      - Create from a JSON draft and/or flags
//! strategos config update <id> - Apply a JSON patch
//! strategos config activate    - Make a configuration the active one
//! strategos config active      - Show the active configuration

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use std::path::{Path, PathBuf};

use super::context::AppContext;
use super::output::{print_item, print_items, ConfigRow, OutputMode};
use crate::domain::{ConfigId, ConfigurationDraft, ConfigurationPatch};
use crate::store::{PageCursor, PageRequest, DEFAULT_PAGE_SIZE};

/// Configuration-related commands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// List configurations, newest first
    List {
        /// Page size
        #[arg(short, long, default_value_t = DEFAULT_PAGE_SIZE)]
        limit: u32,
        /// Continue after this configuration id
        #[arg(long)]
        after: Option<i64>,
        /// Walk every page
        #[arg(long, conflicts_with_all = ["limit", "after"])]
        all: bool,
        /// Decrypt sensitive fields
        #[arg(long)]
        decrypt: bool,
        #[arg(long)]
        json: bool,
    },

    /// Show one configuration as JSON
    Show {
        id: i64,
        #[arg(long)]
        decrypt: bool,
    },

    /// Create a configuration
    Create {
        /// JSON draft file ("-" for stdin)
        #[arg(short, long)]
        file: Option<PathBuf>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        timeframe: Option<String>,
        /// Comma-separated asset symbols
        #[arg(long, value_delimiter = ',')]
        assets: Vec<String>,
        /// Activate atomically with creation
        #[arg(long)]
        activate: bool,
    },

    /// Apply a JSON patch; omitted fields are left unchanged
    Update {
        id: i64,
        /// JSON patch file ("-" for stdin)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Make a configuration the single active one
    Activate { id: i64 },

    /// Deactivate a configuration if it is the active one
    Deactivate { id: i64 },

    /// Flip a configuration's active state
    Toggle { id: i64 },

    /// Show the active configuration
    Active {
        #[arg(long)]
        decrypt: bool,
    },
}

impl ConfigCommands {
    pub async fn run(self, ctx: &AppContext) -> Result<()> {
        match self {
            Self::List {
                limit,
                after,
                all,
                decrypt,
                json,
            } => list(ctx, limit, after, all, decrypt, OutputMode::from_json_flag(json)).await,
            Self::Show { id, decrypt } => {
                let config = ctx
                    .store
                    .get_by_id(ConfigId(id), decrypt)
                    .await?
                    .with_context(|| format!("configuration {id} not found"))?;
                print_item(&config)
            }
            Self::Create {
                file,
                name,
                category,
                timeframe,
                assets,
                activate,
            } => {
                let mut draft: ConfigurationDraft = match &file {
                    Some(path) => read_json(path)?,
                    None => ConfigurationDraft::default(),
                };
                if let Some(name) = name {
                    draft.name = name;
                }
                if category.is_some() {
                    draft.category = category;
                }
                if timeframe.is_some() {
                    draft.timeframe = timeframe;
                }
                if !assets.is_empty() {
                    draft.assets_to_monitor = assets;
                }
                draft.activate |= activate;

                let id = ctx.store.create(draft).await?;
                println!("created configuration {id}");
                Ok(())
            }
            Self::Update { id, file } => {
                let patch: ConfigurationPatch = read_json(&file)?;
                if patch.is_empty() {
                    bail!("patch in {} changes nothing", file.display());
                }
                let updated = ctx.store.update(ConfigId(id), patch).await?;
                print_item(&updated)
            }
            Self::Activate { id } => {
                if ctx.store.activate(ConfigId(id)).await? {
                    println!("configuration {id} is now active");
                    Ok(())
                } else {
                    bail!("configuration {id} could not be activated, another activation won the race")
                }
            }
            Self::Deactivate { id } => {
                let was_active = ctx.store.active_id().await? == Some(ConfigId(id));
                ctx.store.deactivate(ConfigId(id)).await?;
                if was_active {
                    println!("configuration {id} deactivated");
                } else {
                    println!("configuration {id} was not active");
                }
                Ok(())
            }
            Self::Toggle { id } => {
                if !ctx.store.toggle(ConfigId(id)).await? {
                    bail!("toggle of configuration {id} did not take effect");
                }
                let now_active = ctx.store.active_id().await? == Some(ConfigId(id));
                println!(
                    "configuration {id} is now {}",
                    if now_active { "active" } else { "inactive" }
                );
                Ok(())
            }
            Self::Active { decrypt } => match ctx.store.get_active(decrypt).await? {
                Some(config) => print_item(&config),
                None => {
                    println!("no active configuration");
                    Ok(())
                }
            },
        }
    }
}

async fn list(
    ctx: &AppContext,
    limit: u32,
    after: Option<i64>,
    all: bool,
    decrypt: bool,
    mode: OutputMode,
) -> Result<()> {
    if all {
        let items = ctx.store.list_all(decrypt).await?;
        let rows: Vec<ConfigRow> = items.iter().map(ConfigRow::from).collect();
        return print_items(&rows, &items, mode);
    }

    let request = match after {
        Some(id) => {
            let anchor = ctx
                .store
                .get_by_id(ConfigId(id), false)
                .await?
                .with_context(|| format!("cursor configuration {id} not found"))?;
            PageRequest::after(
                limit,
                PageCursor {
                    created_at: anchor.created_at,
                    id: anchor.id,
                },
            )
        }
        None => PageRequest::first(limit),
    };

    let page = ctx.store.list_page(decrypt, request).await?;
    let rows: Vec<ConfigRow> = page.items.iter().map(ConfigRow::from).collect();
    print_items(&rows, &page.items, mode)?;
    if let (Some(next), OutputMode::Table) = (page.next, mode) {
        println!("more: --after {}", next.id);
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).context("failed to read stdin")?
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?
    };
    serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", path.display()))
}
