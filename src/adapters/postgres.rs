use crate::domain::{
    ConfigId, ConfigurationRecord, DecisionLogEntry, DecisionOutcome, EncryptedBlob, ParamTree,
    RiskAdjustment, SealedConfiguration, SensitiveCategory, StrategyCategory, SwitchTrigger,
    Timeframe,
};
use crate::error::{Result, StrategosError};
use crate::persistence::DecisionSink;
use crate::store::{ActiveSwap, ConfigRepository, Page, PageCursor, PageRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const CONFIG_COLUMNS: &str = "id, name, description, category, active, assets_to_monitor, \
     timeframe, indicators, entry_rules, exit_rules, risk_management, sensitive_fields, \
     created_at, updated_at";

const DECISION_COLUMNS: &str = "id, tick_id, asset, outcome, trigger_kind, reason, confidence, \
     risk_adjustment, snapshot, from_configuration, applied, created_at";

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a PostgreSQL store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Lock the pointer row for the rest of the transaction
    async fn lock_pointer(tx: &mut Transaction<'_, Postgres>) -> Result<Option<ConfigId>> {
        let row = sqlx::query(
            "SELECT configuration_id FROM active_configuration WHERE singleton FOR UPDATE",
        )
        .fetch_one(&mut **tx)
        .await?;
        Ok(row.get::<Option<i64>, _>("configuration_id").map(ConfigId))
    }

    /// Flip row flags and the pointer inside an open transaction
    async fn move_pointer(
        tx: &mut Transaction<'_, Postgres>,
        target: Option<ConfigId>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE strategy_configurations SET active = FALSE, updated_at = NOW() WHERE active",
        )
        .execute(&mut **tx)
        .await?;

        if let Some(id) = target {
            sqlx::query(
                "UPDATE strategy_configurations SET active = TRUE, updated_at = NOW() WHERE id = $1",
            )
            .bind(id.0)
            .execute(&mut **tx)
            .await?;
        }

        sqlx::query(
            "UPDATE active_configuration SET configuration_id = $1, updated_at = NOW() WHERE singleton",
        )
        .bind(target.map(|id| id.0))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

// ==================== Row mapping ====================

fn corrupt(column: &str, detail: impl std::fmt::Display) -> StrategosError {
    StrategosError::Serialization(format!("stored {column} is invalid: {detail}"))
}

fn record_from_row(row: &PgRow) -> Result<ConfigurationRecord> {
    let category: String = row.try_get("category")?;
    let timeframe: String = row.try_get("timeframe")?;
    let sensitive: serde_json::Value = row.try_get("sensitive_fields")?;
    let sensitive_fields: BTreeMap<SensitiveCategory, EncryptedBlob> =
        serde_json::from_value(sensitive).map_err(|e| corrupt("sensitive_fields", e))?;
    let tree = |column: &str| -> Result<ParamTree> {
        Ok(ParamTree::from_value(row.try_get::<serde_json::Value, _>(column)?))
    };

    Ok(ConfigurationRecord {
        id: ConfigId(row.try_get("id")?),
        active: row.try_get("active")?,
        content: SealedConfiguration {
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            category: category
                .parse::<StrategyCategory>()
                .map_err(|e| corrupt("category", e))?,
            assets_to_monitor: row
                .try_get::<Vec<String>, _>("assets_to_monitor")?
                .into_iter()
                .collect(),
            timeframe: timeframe
                .parse::<Timeframe>()
                .map_err(|e| corrupt("timeframe", e))?,
            indicators: tree("indicators")?,
            entry_rules: tree("entry_rules")?,
            exit_rules: tree("exit_rules")?,
            risk_management: tree("risk_management")?,
            sensitive_fields,
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn decision_from_row(row: &PgRow) -> Result<DecisionLogEntry> {
    let outcome: DecisionOutcome = serde_json::from_value(row.try_get("outcome")?)
        .map_err(|e| corrupt("outcome", e))?;
    let trigger = row
        .try_get::<Option<String>, _>("trigger_kind")?
        .map(|t| serde_json::from_value::<SwitchTrigger>(serde_json::Value::String(t)))
        .transpose()
        .map_err(|e| corrupt("trigger_kind", e))?;
    let risk_adjustment = row
        .try_get::<Option<serde_json::Value>, _>("risk_adjustment")?
        .map(serde_json::from_value::<RiskAdjustment>)
        .transpose()
        .map_err(|e| corrupt("risk_adjustment", e))?;

    Ok(DecisionLogEntry {
        id: Some(row.try_get("id")?),
        tick_id: row.try_get::<Uuid, _>("tick_id")?,
        asset: row.try_get("asset")?,
        outcome,
        trigger,
        reason: row.try_get("reason")?,
        confidence: row.try_get("confidence")?,
        risk_adjustment,
        snapshot: row.try_get("snapshot")?,
        from_configuration: row
            .try_get::<Option<i64>, _>("from_configuration")?
            .map(ConfigId),
        applied: row.try_get("applied")?,
        created_at: row.try_get("created_at")?,
    })
}

// ==================== Configurations ====================

#[async_trait]
impl ConfigRepository for PostgresStore {
    #[instrument(skip(self, content), fields(name = %content.name))]
    async fn insert(
        &self,
        content: SealedConfiguration,
        activate: bool,
    ) -> Result<ConfigurationRecord> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO strategy_configurations (
                name, description, category, assets_to_monitor, timeframe,
                indicators, entry_rules, exit_rules, risk_management, sensitive_fields
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {CONFIG_COLUMNS}
            "#
        ))
        .bind(&content.name)
        .bind(&content.description)
        .bind(content.category.as_str())
        .bind(content.assets_to_monitor.iter().cloned().collect::<Vec<String>>())
        .bind(content.timeframe.as_str())
        .bind(content.indicators.to_value())
        .bind(content.entry_rules.to_value())
        .bind(content.exit_rules.to_value())
        .bind(content.risk_management.to_value())
        .bind(serde_json::to_value(&content.sensitive_fields)?)
        .fetch_one(&mut *tx)
        .await?;
        let mut record = record_from_row(&row)?;

        if activate {
            Self::lock_pointer(&mut tx).await?;
            Self::move_pointer(&mut tx, Some(record.id)).await?;
            let row = sqlx::query(&format!(
                "SELECT {CONFIG_COLUMNS} FROM strategy_configurations WHERE id = $1"
            ))
            .bind(record.id.0)
            .fetch_one(&mut *tx)
            .await?;
            record = record_from_row(&row)?;
        }

        tx.commit().await?;
        debug!(id = %record.id, active = record.active, "configuration inserted");
        Ok(record)
    }

    async fn fetch(&self, id: ConfigId) -> Result<Option<ConfigurationRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {CONFIG_COLUMNS} FROM strategy_configurations WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn fetch_page(&self, request: PageRequest) -> Result<Page<ConfigurationRecord>> {
        let request = request.clamped();
        let limit = request.limit as usize;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {CONFIG_COLUMNS}
            FROM strategy_configurations
            WHERE $1::timestamptz IS NULL OR (created_at, id) < ($1, $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#
        ))
        .bind(request.after.map(|c| c.created_at))
        .bind(request.after.map(|c| c.id.0))
        .bind(limit as i64 + 1)
        .fetch_all(&self.pool)
        .await?;

        let has_more = rows.len() > limit;
        let items = rows
            .iter()
            .take(limit)
            .map(record_from_row)
            .collect::<Result<Vec<_>>>()?;
        let next = if has_more {
            items.last().map(PageCursor::of)
        } else {
            None
        };
        Ok(Page { items, next })
    }

    async fn fetch_by_category(
        &self,
        category: StrategyCategory,
    ) -> Result<Vec<ConfigurationRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {CONFIG_COLUMNS}
            FROM strategy_configurations
            WHERE category = $1
            ORDER BY updated_at DESC, id ASC
            "#
        ))
        .bind(category.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    #[instrument(skip(self, content))]
    async fn replace_content(
        &self,
        id: ConfigId,
        content: SealedConfiguration,
    ) -> Result<ConfigurationRecord> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE strategy_configurations SET
                name = $2,
                description = $3,
                category = $4,
                assets_to_monitor = $5,
                timeframe = $6,
                indicators = $7,
                entry_rules = $8,
                exit_rules = $9,
                risk_management = $10,
                sensitive_fields = $11,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {CONFIG_COLUMNS}
            "#
        ))
        .bind(id.0)
        .bind(&content.name)
        .bind(&content.description)
        .bind(content.category.as_str())
        .bind(content.assets_to_monitor.iter().cloned().collect::<Vec<String>>())
        .bind(content.timeframe.as_str())
        .bind(content.indicators.to_value())
        .bind(content.entry_rules.to_value())
        .bind(content.exit_rules.to_value())
        .bind(content.risk_management.to_value())
        .bind(serde_json::to_value(&content.sensitive_fields)?)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => record_from_row(&row),
            None => Err(StrategosError::NotFound(format!("configuration {id}"))),
        }
    }

    async fn any_sensitive(&self) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM strategy_configurations WHERE sensitive_fields <> '{}'::jsonb
            ) AS found
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("found"))
    }

    async fn active_id(&self) -> Result<Option<ConfigId>> {
        let row = sqlx::query("SELECT configuration_id FROM active_configuration WHERE singleton")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .and_then(|r| r.get::<Option<i64>, _>("configuration_id"))
            .map(ConfigId))
    }

    #[instrument(skip(self))]
    async fn swap_active(
        &self,
        expected: Option<ConfigId>,
        target: Option<ConfigId>,
    ) -> Result<ActiveSwap> {
        let mut tx = self.pool.begin().await?;

        let current = Self::lock_pointer(&mut tx).await?;
        if current != expected {
            tx.rollback().await?;
            return Ok(ActiveSwap::Conflict { current });
        }

        if let Some(id) = target {
            let exists = sqlx::query("SELECT 1 FROM strategy_configurations WHERE id = $1")
                .bind(id.0)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            if !exists {
                tx.rollback().await?;
                return Err(StrategosError::NotFound(format!("configuration {id}")));
            }
        }

        if expected != target {
            Self::move_pointer(&mut tx, target).await?;
        }
        tx.commit().await?;
        Ok(ActiveSwap::Swapped)
    }
}

// ==================== Decisions ====================

#[async_trait]
impl DecisionSink for PostgresStore {
    async fn append(&self, entry: &DecisionLogEntry) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO switch_decisions (
                tick_id, asset, outcome_kind, outcome, trigger_kind, reason, confidence,
                risk_adjustment, snapshot, from_configuration, applied, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING id
            "#,
        )
        .bind(entry.tick_id)
        .bind(&entry.asset)
        .bind(entry.outcome.kind())
        .bind(serde_json::to_value(&entry.outcome)?)
        .bind(entry.trigger.map(|t| t.as_str()))
        .bind(&entry.reason)
        .bind(entry.confidence)
        .bind(
            entry
                .risk_adjustment
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
        )
        .bind(&entry.snapshot)
        .bind(entry.from_configuration.map(|id| id.0))
        .bind(entry.applied)
        .bind(entry.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("id"))
    }

    async fn recent(&self, limit: u32) -> Result<Vec<DecisionLogEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {DECISION_COLUMNS} FROM switch_decisions ORDER BY created_at DESC, id DESC LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decision_from_row).collect()
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM switch_decisions WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        info!(removed = result.rows_affected(), %cutoff, "Purged decision log");
        Ok(result.rows_affected())
    }
}
