//! In-memory backends for tests and dry runs
//!
//! All state sits behind one mutex, so every repository call is atomic with
//! respect to every other, matching the transactional Postgres adapter.

use crate::domain::{
    ConfigId, ConfigurationRecord, DecisionLogEntry, SealedConfiguration, StrategyCategory,
};
use crate::error::{Result, StrategosError};
use crate::persistence::DecisionSink;
use crate::store::{ActiveSwap, ConfigRepository, Page, PageCursor, PageRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct RepoState {
    next_id: i64,
    records: BTreeMap<ConfigId, ConfigurationRecord>,
    active: Option<ConfigId>,
    last_stamp: Option<DateTime<Utc>>,
}

impl RepoState {
    /// Strictly increasing timestamps, so ordering never depends on clock resolution
    fn stamp(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_stamp {
            if now <= last {
                now = last + chrono::Duration::microseconds(1);
            }
        }
        self.last_stamp = Some(now);
        now
    }

    fn set_active(&mut self, target: Option<ConfigId>) {
        let now = self.stamp();
        if let Some(old) = self.active.take() {
            if let Some(record) = self.records.get_mut(&old) {
                record.active = false;
                record.updated_at = now;
            }
        }
        if let Some(new) = target {
            if let Some(record) = self.records.get_mut(&new) {
                record.active = true;
                record.updated_at = now;
            }
        }
        self.active = target;
    }
}

/// Configuration repository held in process memory
#[derive(Debug, Default)]
pub struct InMemoryConfigRepository {
    state: Mutex<RepoState>,
}

impl InMemoryConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigRepository for InMemoryConfigRepository {
    async fn insert(
        &self,
        content: SealedConfiguration,
        activate: bool,
    ) -> Result<ConfigurationRecord> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = ConfigId(state.next_id);
        let now = state.stamp();

        state.records.insert(
            id,
            ConfigurationRecord {
                id,
                active: false,
                content,
                created_at: now,
                updated_at: now,
            },
        );
        if activate {
            state.set_active(Some(id));
        }

        state
            .records
            .get(&id)
            .cloned()
            .ok_or_else(|| StrategosError::Internal(format!("inserted configuration {id} vanished")))
    }

    async fn fetch(&self, id: ConfigId) -> Result<Option<ConfigurationRecord>> {
        Ok(self.state.lock().await.records.get(&id).cloned())
    }

    async fn fetch_page(&self, request: PageRequest) -> Result<Page<ConfigurationRecord>> {
        let state = self.state.lock().await;
        let limit = request.clamped().limit as usize;

        let mut ordered: Vec<&ConfigurationRecord> = state
            .records
            .values()
            .filter(|r| request.after.map_or(true, |cursor| cursor.precedes(r)))
            .collect();
        ordered.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        let has_more = ordered.len() > limit;
        let items: Vec<ConfigurationRecord> =
            ordered.into_iter().take(limit).cloned().collect();
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
        let state = self.state.lock().await;
        let mut matching: Vec<ConfigurationRecord> = state
            .records
            .values()
            .filter(|r| r.content.category == category)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        Ok(matching)
    }

    async fn replace_content(
        &self,
        id: ConfigId,
        content: SealedConfiguration,
    ) -> Result<ConfigurationRecord> {
        let mut state = self.state.lock().await;
        let now = state.stamp();
        let record = state
            .records
            .get_mut(&id)
            .ok_or_else(|| StrategosError::NotFound(format!("configuration {id}")))?;
        record.content = content;
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn any_sensitive(&self) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .await
            .records
            .values()
            .any(ConfigurationRecord::has_sensitive_fields))
    }

    async fn active_id(&self) -> Result<Option<ConfigId>> {
        Ok(self.state.lock().await.active)
    }

    async fn swap_active(
        &self,
        expected: Option<ConfigId>,
        target: Option<ConfigId>,
    ) -> Result<ActiveSwap> {
        let mut state = self.state.lock().await;
        if state.active != expected {
            return Ok(ActiveSwap::Conflict {
                current: state.active,
            });
        }
        if let Some(id) = target {
            if !state.records.contains_key(&id) {
                return Err(StrategosError::NotFound(format!("configuration {id}")));
            }
        }
        if expected != target {
            state.set_active(target);
        }
        Ok(ActiveSwap::Swapped)
    }
}

/// Decision sink held in process memory
#[derive(Debug, Default)]
pub struct InMemoryDecisionSink {
    entries: Mutex<Vec<DecisionLogEntry>>,
}

impl InMemoryDecisionSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry in append order
    pub async fn entries(&self) -> Vec<DecisionLogEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl DecisionSink for InMemoryDecisionSink {
    async fn append(&self, entry: &DecisionLogEntry) -> Result<i64> {
        let mut entries = self.entries.lock().await;
        let id = entries.len() as i64 + 1;
        let mut stored = entry.clone();
        stored.id = Some(id);
        entries.push(stored);
        Ok(id)
    }

    async fn recent(&self, limit: u32) -> Result<Vec<DecisionLogEntry>> {
        let mut entries = self.entries.lock().await.clone();
        entries.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        entries.truncate(limit as usize);
        Ok(entries)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.created_at >= cutoff);
        Ok((before - entries.len()) as u64)
    }
}
