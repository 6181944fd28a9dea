//! Output formatting for CLI commands.
//!
//! Supports two modes: human-readable tables (default) and JSON (--json).

use serde::Serialize;
use tabled::{Table, Tabled};

use crate::domain::{Configuration, DecisionLogEntry};

/// Output mode for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Table,
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Table
        }
    }
}

/// Print rows as a table, or the underlying items as JSON.
pub fn print_items<R: Tabled, T: Serialize>(
    rows: &[R],
    items: &[T],
    mode: OutputMode,
) -> anyhow::Result<()> {
    match mode {
        OutputMode::Table => {
            if rows.is_empty() {
                println!("(no results)");
            } else {
                println!("{}", Table::new(rows));
            }
        }
        OutputMode::Json => {
            println!("{}", serde_json::to_string_pretty(items)?);
        }
    }
    Ok(())
}

/// Print a single item; always pretty JSON.
pub fn print_item<T: Serialize>(item: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(item)?);
    Ok(())
}

#[derive(Debug, Tabled)]
pub struct ConfigRow {
    #[tabled(rename = "ID")]
    pub id: i64,
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "Category")]
    pub category: String,
    #[tabled(rename = "Active")]
    pub active: String,
    #[tabled(rename = "TF")]
    pub timeframe: String,
    #[tabled(rename = "Assets")]
    pub assets: String,
    #[tabled(rename = "Secrets")]
    pub secrets: usize,
    #[tabled(rename = "Updated")]
    pub updated: String,
}

impl From<&Configuration> for ConfigRow {
    fn from(c: &Configuration) -> Self {
        Self {
            id: c.id.0,
            name: c.name.clone(),
            category: c.category.to_string(),
            active: if c.active { "*".into() } else { String::new() },
            timeframe: c.timeframe.to_string(),
            assets: c
                .assets_to_monitor
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(","),
            secrets: c.sensitive_fields.len(),
            updated: c.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

#[derive(Debug, Tabled)]
pub struct DecisionRow {
    #[tabled(rename = "ID")]
    pub id: String,
    #[tabled(rename = "Time")]
    pub at: String,
    #[tabled(rename = "Asset")]
    pub asset: String,
    #[tabled(rename = "Outcome")]
    pub outcome: String,
    #[tabled(rename = "Trigger")]
    pub trigger: String,
    #[tabled(rename = "Conf")]
    pub confidence: String,
    #[tabled(rename = "Applied")]
    pub applied: String,
    #[tabled(rename = "Reason")]
    pub reason: String,
}

impl From<&DecisionLogEntry> for DecisionRow {
    fn from(e: &DecisionLogEntry) -> Self {
        Self {
            id: e.id.map(|id| id.to_string()).unwrap_or_else(|| "-".into()),
            at: e.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            asset: e.asset.clone(),
            outcome: e.outcome.to_string(),
            trigger: e.trigger.map(|t| t.to_string()).unwrap_or_else(|| "-".into()),
            confidence: format!("{:.2}", e.confidence),
            applied: if e.applied { "yes".into() } else { String::new() },
            reason: e.reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConfigId, DecisionOutcome};
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_decision_row_placeholders() {
        let entry = DecisionLogEntry {
            id: None,
            tick_id: Uuid::new_v4(),
            asset: "BTC".into(),
            outcome: DecisionOutcome::Keep,
            trigger: None,
            reason: "no trigger fired".into(),
            confidence: 0.5,
            risk_adjustment: None,
            snapshot: serde_json::Value::Null,
            from_configuration: Some(ConfigId(3)),
            applied: false,
            created_at: Utc::now(),
        };
        let row = DecisionRow::from(&entry);
        assert_eq!(row.id, "-");
        assert_eq!(row.trigger, "-");
        assert_eq!(row.outcome, "keep");
        assert_eq!(row.confidence, "0.50");
    }
}
