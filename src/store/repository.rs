//! Backend contract for configuration persistence
//!
//! The single-active invariant is owned by the backend: the active pointer is
//! one row (or one field) and every change to it goes through
//! [`ConfigRepository::swap_active`], a compare-and-swap that also flips the
//! per-row `active` flags in the same transaction.

use crate::domain::{ConfigId, ConfigurationRecord, SealedConfiguration, StrategyCategory};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_PAGE_SIZE: u32 = 500;
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Position after the last item of a page, in `(created_at desc, id desc)` order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    pub created_at: DateTime<Utc>,
    pub id: ConfigId,
}

impl PageCursor {
    pub fn of(record: &ConfigurationRecord) -> Self {
        Self {
            created_at: record.created_at,
            id: record.id,
        }
    }

    /// Whether `record` sorts strictly after this cursor
    pub fn precedes(&self, record: &ConfigurationRecord) -> bool {
        (record.created_at, record.id) < (self.created_at, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: u32,
    pub after: Option<PageCursor>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            after: None,
        }
    }
}

impl PageRequest {
    pub fn first(limit: u32) -> Self {
        Self { limit, after: None }.clamped()
    }

    pub fn after(limit: u32, cursor: PageCursor) -> Self {
        Self {
            limit,
            after: Some(cursor),
        }
        .clamped()
    }

    /// Limit forced into `[1, MAX_PAGE_SIZE]`
    pub fn clamped(self) -> Self {
        Self {
            limit: self.limit.clamp(1, MAX_PAGE_SIZE),
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the following page; `None` on the last page
    pub next: Option<PageCursor>,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            next: self.next,
        }
    }
}

/// Result of a compare-and-swap on the active pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveSwap {
    Swapped,
    /// The pointer no longer held the expected value
    Conflict { current: Option<ConfigId> },
}

/// Backing store for configurations
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    /// Insert new content. With `activate`, the insert and the pointer move
    /// happen in one transaction.
    async fn insert(&self, content: SealedConfiguration, activate: bool)
        -> Result<ConfigurationRecord>;

    async fn fetch(&self, id: ConfigId) -> Result<Option<ConfigurationRecord>>;

    /// Keyset page ordered by `created_at` desc, ties by id desc
    async fn fetch_page(&self, request: PageRequest) -> Result<Page<ConfigurationRecord>>;

    /// Configurations of a category, most recently updated first, ties by id asc
    async fn fetch_by_category(&self, category: StrategyCategory)
        -> Result<Vec<ConfigurationRecord>>;

    /// Replace the content of an existing row, leaving `active` untouched.
    /// Fails with `NotFound` for an unknown id.
    async fn replace_content(
        &self,
        id: ConfigId,
        content: SealedConfiguration,
    ) -> Result<ConfigurationRecord>;

    /// Whether any stored configuration carries sealed secrets
    async fn any_sensitive(&self) -> Result<bool>;

    async fn active_id(&self) -> Result<Option<ConfigId>>;

    /// Move the active pointer from `expected` to `target` if it still holds
    /// `expected`. Fails with `NotFound` when `target` does not exist.
    async fn swap_active(
        &self,
        expected: Option<ConfigId>,
        target: Option<ConfigId>,
    ) -> Result<ActiveSwap>;
}
