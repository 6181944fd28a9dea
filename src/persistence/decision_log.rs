//! Append-only audit trail of switching decisions
//!
//! Entries are immutable once written. Retention is a time-based purge run by
//! an operator; the engine itself only appends.

use crate::domain::DecisionLogEntry;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Storage backend for decision log entries
#[async_trait]
pub trait DecisionSink: Send + Sync {
    /// Persist one entry, returning its assigned id
    async fn append(&self, entry: &DecisionLogEntry) -> Result<i64>;

    /// Most recent entries first
    async fn recent(&self, limit: u32) -> Result<Vec<DecisionLogEntry>>;

    /// Delete entries created before `cutoff`, returning how many were removed
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Front for a [`DecisionSink`] whose appends never fail the caller
#[derive(Clone)]
pub struct DecisionLog {
    sink: Arc<dyn DecisionSink>,
    timeout: Duration,
    failures: Arc<AtomicU64>,
}

impl DecisionLog {
    pub fn new(sink: Arc<dyn DecisionSink>, timeout: Duration) -> Self {
        Self {
            sink,
            timeout,
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record an entry. Sink failures are logged and counted, never returned.
    pub async fn append(&self, entry: &DecisionLogEntry) -> Option<i64> {
        match tokio::time::timeout(self.timeout, self.sink.append(entry)).await {
            Ok(Ok(id)) => {
                debug!(
                    id,
                    tick = %entry.tick_id,
                    asset = %entry.asset,
                    outcome = entry.outcome.kind(),
                    applied = entry.applied,
                    "decision recorded"
                );
                Some(id)
            }
            Ok(Err(e)) => {
                self.record_failure(entry, &e.to_string());
                None
            }
            Err(_) => {
                self.record_failure(entry, "decision sink timed out");
                None
            }
        }
    }

    fn record_failure(&self, entry: &DecisionLogEntry, reason: &str) {
        let total = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        error!(
            tick = %entry.tick_id,
            asset = %entry.asset,
            outcome = entry.outcome.kind(),
            failures = total,
            error = reason,
            "failed to record decision"
        );
    }

    /// Appends lost since startup
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub async fn recent(&self, limit: u32) -> Result<Vec<DecisionLogEntry>> {
        self.sink.recent(limit.clamp(1, 1000)).await
    }

    pub async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let removed = self.sink.purge_before(cutoff).await?;
        debug!(removed, %cutoff, "decision log purged");
        Ok(removed)
    }
}
