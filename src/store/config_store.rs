//! Configuration CRUD with sealed secrets and the single-active invariant
//!
//! Secrets are encrypted before they reach the repository and decrypted per
//! field on read, so one bad blob never hides the rest of a record.
//! Activation is a compare-and-swap loop against the repository's active
//! pointer; no in-process lock is involved.

use crate::crypto::CipherBox;
use crate::domain::{
    ConfigId, Configuration, ConfigurationDraft, ConfigurationPatch, ConfigurationRecord,
    EncryptedBlob, SensitiveCategory, SensitiveField, StrategyCategory,
};
use crate::error::{Result, StrategosError};
use crate::services::{NotificationEvent, NotifierHandle};
use crate::validation::{is_empty_secret, validate_draft, validate_patch};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::repository::{ActiveSwap, ConfigRepository, Page, PageRequest, DEFAULT_PAGE_SIZE};

const DEFAULT_SWAP_ATTEMPTS: u32 = 8;

pub struct ConfigStore {
    repo: Arc<dyn ConfigRepository>,
    cipher: Arc<CipherBox>,
    notifier: NotifierHandle,
    max_swap_attempts: u32,
}

impl ConfigStore {
    pub fn new(repo: Arc<dyn ConfigRepository>, cipher: Arc<CipherBox>) -> Self {
        Self {
            repo,
            cipher,
            notifier: NotifierHandle::disabled(),
            max_swap_attempts: DEFAULT_SWAP_ATTEMPTS,
        }
    }

    pub fn with_notifier(mut self, notifier: NotifierHandle) -> Self {
        self.notifier = notifier;
        self
    }

    /// Bound on compare-and-swap rounds lost to concurrent writers
    pub fn with_max_swap_attempts(mut self, attempts: u32) -> Self {
        self.max_swap_attempts = attempts.max(1);
        self
    }

    pub fn cipher(&self) -> &CipherBox {
        &self.cipher
    }

    /// Validate, seal and persist a draft
    pub async fn create(&self, draft: ConfigurationDraft) -> Result<ConfigId> {
        let content = validate_draft(&draft)?;
        let sealed = self.seal_secrets(BTreeMap::new(), &draft.sensitive_fields)?;
        let content = content.seal(sealed);

        let previous = if draft.activate {
            self.repo.active_id().await?
        } else {
            None
        };

        let record = self.repo.insert(content, draft.activate).await?;
        info!(
            id = %record.id,
            name = %record.content.name,
            category = %record.content.category,
            active = record.active,
            secrets = record.content.sensitive_fields.len(),
            "configuration created"
        );

        if record.active {
            self.notify_activated(&record, previous);
        }
        Ok(record.id)
    }

    pub async fn get_by_id(&self, id: ConfigId, decrypt: bool) -> Result<Option<Configuration>> {
        Ok(self
            .repo
            .fetch(id)
            .await?
            .map(|record| self.open(record, decrypt)))
    }

    /// One keyset page, newest first
    pub async fn list_page(
        &self,
        decrypt: bool,
        request: PageRequest,
    ) -> Result<Page<Configuration>> {
        let page = self.repo.fetch_page(request.clamped()).await?;
        Ok(page.map(|record| self.open(record, decrypt)))
    }

    /// Every configuration, walking pages of the default size
    pub async fn list_all(&self, decrypt: bool) -> Result<Vec<Configuration>> {
        let mut out = Vec::new();
        let mut request = PageRequest::first(DEFAULT_PAGE_SIZE);
        loop {
            let page = self.list_page(decrypt, request).await?;
            out.extend(page.items);
            match page.next {
                Some(cursor) => request = PageRequest::after(DEFAULT_PAGE_SIZE, cursor),
                None => return Ok(out),
            }
        }
    }

    pub async fn active_id(&self) -> Result<Option<ConfigId>> {
        self.repo.active_id().await
    }

    pub async fn get_active(&self, decrypt: bool) -> Result<Option<Configuration>> {
        let Some(id) = self.repo.active_id().await? else {
            return Ok(None);
        };
        let found = self.get_by_id(id, decrypt).await?;
        if found.is_none() {
            warn!(id = %id, "active pointer references a missing configuration");
        }
        Ok(found)
    }

    /// Make `id` the only active configuration.
    ///
    /// Idempotent for the current active id. A caller that loses a race
    /// re-reads the pointer and swaps again, so it lands after the winner.
    pub async fn activate(&self, id: ConfigId) -> Result<bool> {
        let target = self
            .repo
            .fetch(id)
            .await?
            .ok_or_else(|| StrategosError::NotFound(format!("configuration {id}")))?;

        for attempt in 1..=self.max_swap_attempts {
            let current = self.repo.active_id().await?;
            if current == Some(id) {
                debug!(id = %id, "already active");
                return Ok(true);
            }

            match self.repo.swap_active(current, Some(id)).await {
                Ok(ActiveSwap::Swapped) => {
                    info!(id = %id, previous = ?current, "configuration activated");
                    self.notify_activated(&target, current);
                    return Ok(true);
                }
                Ok(ActiveSwap::Conflict { current: now }) => {
                    debug!(id = %id, attempt, expected = ?current, found = ?now, "activation lost a race, retrying");
                }
                Err(e) => {
                    self.restore_active(current).await;
                    return Err(e);
                }
            }
        }

        Err(StrategosError::StoreUnavailable(format!(
            "activation of {id} kept losing to concurrent writers after {} attempts",
            self.max_swap_attempts
        )))
    }

    /// Clear the active pointer if it holds `id`; `true` without change otherwise
    pub async fn deactivate(&self, id: ConfigId) -> Result<bool> {
        let target = self
            .repo
            .fetch(id)
            .await?
            .ok_or_else(|| StrategosError::NotFound(format!("configuration {id}")))?;

        for attempt in 1..=self.max_swap_attempts {
            if self.repo.active_id().await? != Some(id) {
                debug!(id = %id, "not active, nothing to deactivate");
                return Ok(true);
            }

            match self.repo.swap_active(Some(id), None).await? {
                ActiveSwap::Swapped => {
                    info!(id = %id, "configuration deactivated");
                    self.notifier.fire(NotificationEvent::ConfigurationDeactivated {
                        id,
                        name: target.content.name.clone(),
                    });
                    return Ok(true);
                }
                ActiveSwap::Conflict { current } => {
                    debug!(id = %id, attempt, found = ?current, "deactivation raced, re-reading");
                }
            }
        }

        Err(StrategosError::StoreUnavailable(format!(
            "deactivation of {id} kept losing to concurrent writers"
        )))
    }

    /// Activate when inactive, deactivate when active
    pub async fn toggle(&self, id: ConfigId) -> Result<bool> {
        if self.repo.active_id().await? == Some(id) {
            self.deactivate(id).await
        } else {
            self.activate(id).await
        }
    }

    /// Partial update; never changes which configuration is active
    pub async fn update(&self, id: ConfigId, patch: ConfigurationPatch) -> Result<Configuration> {
        let record = self
            .repo
            .fetch(id)
            .await?
            .ok_or_else(|| StrategosError::NotFound(format!("configuration {id}")))?;

        if patch.is_empty() {
            return Ok(self.open(record, false));
        }

        let content = validate_patch(&record.content, &patch)?;
        let sealed = match &patch.sensitive_fields {
            Some(changes) => self.seal_secrets(record.content.sensitive_fields.clone(), changes)?,
            None => record.content.sensitive_fields.clone(),
        };

        let updated = self.repo.replace_content(id, content.seal(sealed)).await?;
        info!(id = %id, name = %updated.content.name, "configuration updated");
        Ok(self.open(updated, false))
    }

    /// Whether any stored configuration carries sealed secrets
    pub async fn has_sensitive_fields(&self) -> Result<bool> {
        self.repo.any_sensitive().await
    }

    /// Switch targets for a category, best first
    pub async fn candidates(&self, category: StrategyCategory) -> Result<Vec<Configuration>> {
        Ok(self
            .repo
            .fetch_by_category(category)
            .await?
            .into_iter()
            .map(|record| self.open(record, false))
            .collect())
    }

    /// Put the previous pointer back if a failed swap left it empty
    async fn restore_active(&self, previous: Option<ConfigId>) {
        let Some(previous) = previous else {
            return;
        };
        match self.repo.active_id().await {
            Ok(None) => match self.repo.swap_active(None, Some(previous)).await {
                Ok(ActiveSwap::Swapped) => {
                    warn!(id = %previous, "restored previous active configuration after failed swap")
                }
                Ok(ActiveSwap::Conflict { current }) => {
                    debug!(found = ?current, "pointer moved by another writer, nothing to restore")
                }
                Err(e) => error!(
                    id = %previous,
                    error = %e,
                    "failed to restore previous active configuration"
                ),
            },
            Ok(Some(_)) => {}
            Err(e) => error!(error = %e, "cannot read active pointer after failed swap"),
        }
    }

    /// Encrypt `changes` over `base`; empty values remove the slot
    fn seal_secrets(
        &self,
        mut base: BTreeMap<SensitiveCategory, EncryptedBlob>,
        changes: &BTreeMap<SensitiveCategory, serde_json::Value>,
    ) -> Result<BTreeMap<SensitiveCategory, EncryptedBlob>> {
        for (category, value) in changes {
            if is_empty_secret(value) {
                base.remove(category);
            } else {
                base.insert(*category, self.cipher.encrypt_object(value)?);
            }
        }
        Ok(base)
    }

    /// Caller-facing view, decrypting each secret independently
    fn open(&self, record: ConfigurationRecord, decrypt: bool) -> Configuration {
        let id = record.id;
        let fields = record
            .content
            .sensitive_fields
            .iter()
            .map(|(category, blob)| {
                let field = if !decrypt {
                    SensitiveField::Sealed(blob.clone())
                } else {
                    match self.cipher.decrypt_object(blob) {
                        Ok(value) => SensitiveField::Plain(value),
                        Err(e) => {
                            warn!(id = %id, field = %category, error = %e, "sensitive field unreadable");
                            SensitiveField::DecryptionFailed {
                                reason: e.to_string(),
                            }
                        }
                    }
                };
                (*category, field)
            })
            .collect();
        record.into_configuration(fields)
    }

    fn notify_activated(&self, record: &ConfigurationRecord, previous: Option<ConfigId>) {
        self.notifier.fire(NotificationEvent::ConfigurationActivated {
            id: record.id,
            name: record.content.name.clone(),
            category: record.content.category,
            previous: previous.filter(|p| *p != record.id),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryConfigRepository;
    use serde_json::json;

    fn store() -> ConfigStore {
        ConfigStore::new(
            Arc::new(InMemoryConfigRepository::new()),
            Arc::new(CipherBox::new(Some(&CipherBox::generate_key()))),
        )
    }

    #[tokio::test]
    async fn test_create_and_activate_scenario() {
        let store = store();
        let a = store
            .create(ConfigurationDraft::new("Scalper A").activated())
            .await
            .unwrap();
        assert_eq!(store.get_active(false).await.unwrap().unwrap().id, a);

        let b = store
            .create(ConfigurationDraft::new("Momentum B"))
            .await
            .unwrap();
        assert_eq!(store.active_id().await.unwrap(), Some(a));

        assert!(store.activate(b).await.unwrap());
        assert_eq!(store.get_active(false).await.unwrap().unwrap().id, b);
        assert!(!store.get_by_id(a, false).await.unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn test_activate_is_idempotent() {
        let store = store();
        let a = store
            .create(ConfigurationDraft::new("Breakout").activated())
            .await
            .unwrap();
        let before = store.get_by_id(a, false).await.unwrap().unwrap();
        assert!(store.activate(a).await.unwrap());
        let after = store.get_by_id(a, false).await.unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_deactivate_and_toggle() {
        let store = store();
        let a = store.create(ConfigurationDraft::new("Scalper")).await.unwrap();

        // Inactive id: no-op success
        assert!(store.deactivate(a).await.unwrap());
        assert!(store.toggle(a).await.unwrap());
        assert_eq!(store.active_id().await.unwrap(), Some(a));
        assert!(store.toggle(a).await.unwrap());
        assert_eq!(store.active_id().await.unwrap(), None);

        assert!(matches!(
            store.activate(ConfigId(999)).await,
            Err(StrategosError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_secrets_round_trip_and_field_scoped_failure() {
        let repo = Arc::new(InMemoryConfigRepository::new());
        let key = CipherBox::generate_key();
        let writer = ConfigStore::new(repo.clone(), Arc::new(CipherBox::new(Some(&key))));

        let id = writer
            .create(
                ConfigurationDraft::new("Scalper")
                    .with_secret(SensitiveCategory::ApiKeys, json!({"binance": "k-123"}))
                    .with_secret(SensitiveCategory::Credentials, json!(null)),
            )
            .await
            .unwrap();

        let plain = writer.get_by_id(id, true).await.unwrap().unwrap();
        assert_eq!(plain.sensitive_fields.len(), 1);
        assert_eq!(
            plain.sensitive_fields[&SensitiveCategory::ApiKeys].plain(),
            Some(&json!({"binance": "k-123"}))
        );

        let sealed = writer.get_by_id(id, false).await.unwrap().unwrap();
        assert!(matches!(
            sealed.sensitive_fields[&SensitiveCategory::ApiKeys],
            SensitiveField::Sealed(_)
        ));

        // A different key reads the record but flags the field
        let reader = ConfigStore::new(repo, Arc::new(CipherBox::new(Some(&CipherBox::generate_key()))));
        let read = reader.get_by_id(id, true).await.unwrap().unwrap();
        assert_eq!(read.name, "Scalper");
        assert!(read.sensitive_fields[&SensitiveCategory::ApiKeys].is_failed());
    }

    #[tokio::test]
    async fn test_secrets_require_cipher() {
        let store = ConfigStore::new(
            Arc::new(InMemoryConfigRepository::new()),
            Arc::new(CipherBox::unavailable()),
        );
        let err = store
            .create(
                ConfigurationDraft::new("Scalper")
                    .with_secret(SensitiveCategory::SecretKeys, json!({"k": "v"})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StrategosError::Configuration(_)));
        assert!(store.list_all(false).await.unwrap().is_empty());

        // No secrets: fine without a key
        store.create(ConfigurationDraft::new("Scalper")).await.unwrap();
        assert!(!store.has_sensitive_fields().await.unwrap());
    }

    #[tokio::test]
    async fn test_update_keeps_active_flag() {
        let store = store();
        let id = store
            .create(
                ConfigurationDraft::new("Range keeper")
                    .activated()
                    .with_secret(SensitiveCategory::ApiKeys, json!({"k": "v"})),
            )
            .await
            .unwrap();

        let updated = store
            .update(
                id,
                ConfigurationPatch {
                    name: Some("Range keeper v2".into()),
                    sensitive_fields: Some(BTreeMap::from([(
                        SensitiveCategory::ApiKeys,
                        json!(null),
                    )])),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.active);
        assert_eq!(updated.name, "Range keeper v2");
        assert!(updated.sensitive_fields.is_empty());
        assert!(updated.updated_at >= updated.created_at);

        let invalid = store
            .update(
                id,
                ConfigurationPatch {
                    timeframe: Some("3h".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(invalid, Err(StrategosError::Validation(_))));
    }

    #[tokio::test]
    async fn test_list_all_walks_pages() {
        let store = store();
        for i in 0..(DEFAULT_PAGE_SIZE + 5) {
            store
                .create(ConfigurationDraft::new(format!("Scalper {i}")))
                .await
                .unwrap();
        }
        let all = store.list_all(false).await.unwrap();
        assert_eq!(all.len(), (DEFAULT_PAGE_SIZE + 5) as usize);
        assert!(all
            .windows(2)
            .all(|w| (w[0].created_at, w[0].id) > (w[1].created_at, w[1].id)));
    }

    #[tokio::test]
    async fn test_candidates_prefer_recent_update() {
        let store = store();
        let older = store.create(ConfigurationDraft::new("Trend one")).await.unwrap();
        let newer = store.create(ConfigurationDraft::new("Trend two")).await.unwrap();
        store.create(ConfigurationDraft::new("Scalper")).await.unwrap();

        store
            .update(
                older,
                ConfigurationPatch {
                    description: Some("touched".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let ids: Vec<_> = store
            .candidates(StrategyCategory::Momentum)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![older, newer]);
    }
}
