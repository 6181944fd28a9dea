use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

use strategos::adapters::InMemoryConfigRepository;
use strategos::domain::{
    ConfigId, ConfigurationDraft, ConfigurationPatch, ConfigurationRecord, ParamTree,
    SealedConfiguration, SensitiveCategory, SensitiveField, StrategyCategory,
};
use strategos::store::{ActiveSwap, ConfigRepository, ConfigStore, Page, PageRequest};
use strategos::{CipherBox, StrategosError};

fn store_with(cipher: CipherBox) -> ConfigStore {
    ConfigStore::new(Arc::new(InMemoryConfigRepository::new()), Arc::new(cipher))
}

fn keyed_store() -> ConfigStore {
    store_with(CipherBox::new(Some(&CipherBox::generate_key())))
}

/// At most one configuration is active, and it is the one the pointer names.
async fn assert_single_active(store: &ConfigStore) {
    let all = store.list_all(false).await.unwrap();
    let flagged: Vec<ConfigId> = all.iter().filter(|c| c.active).map(|c| c.id).collect();
    assert!(flagged.len() <= 1, "more than one active: {flagged:?}");
    assert_eq!(flagged.first().copied(), store.active_id().await.unwrap());
}

#[tokio::test]
async fn create_then_activate_moves_the_single_active_flag() {
    let store = keyed_store();

    let a = store
        .create(ConfigurationDraft::new("Alpha Trend").activated())
        .await
        .unwrap();
    assert_eq!(store.get_active(false).await.unwrap().unwrap().id, a);

    let b = store.create(ConfigurationDraft::new("Beta Range")).await.unwrap();
    assert_eq!(store.active_id().await.unwrap(), Some(a));

    assert!(store.activate(b).await.unwrap());
    assert_eq!(store.get_active(false).await.unwrap().unwrap().id, b);
    assert!(!store.get_by_id(a, false).await.unwrap().unwrap().active);
    assert_single_active(&store).await;
}

#[tokio::test]
async fn invariant_holds_across_activate_deactivate_toggle_sequences() {
    let store = keyed_store();
    let mut ids = Vec::new();
    for name in ["Scalp A", "Trend B", "Range C", "Breakout D"] {
        ids.push(store.create(ConfigurationDraft::new(name)).await.unwrap());
    }

    // Deterministic but irregular walk over the four ids
    for step in 0..40usize {
        let id = ids[(step * 7 + step / 3) % ids.len()];
        match step % 3 {
            0 => {
                store.activate(id).await.unwrap();
            }
            1 => {
                store.deactivate(id).await.unwrap();
            }
            _ => {
                store.toggle(id).await.unwrap();
            }
        }
        assert_single_active(&store).await;
    }
}

#[tokio::test]
async fn activate_is_idempotent() {
    let store = keyed_store();
    let a = store.create(ConfigurationDraft::new("Trend")).await.unwrap();

    assert!(store.activate(a).await.unwrap());
    let first = store.get_by_id(a, false).await.unwrap().unwrap();
    assert!(store.activate(a).await.unwrap());
    let second = store.get_by_id(a, false).await.unwrap().unwrap();

    assert!(second.active);
    assert_eq!(first.updated_at, second.updated_at);
}

#[tokio::test]
async fn activate_unknown_id_is_not_found() {
    let store = keyed_store();
    let err = assert_err!(store.activate(ConfigId(404)).await);
    assert!(matches!(err, StrategosError::NotFound(_)), "got {err}");
    assert_eq!(store.active_id().await.unwrap(), None);
}

#[tokio::test]
async fn concurrent_activations_leave_exactly_one_active() {
    for _ in 0..20 {
        let store = Arc::new(keyed_store());
        let a = store.create(ConfigurationDraft::new("Scalp A")).await.unwrap();
        let b = store.create(ConfigurationDraft::new("Range B")).await.unwrap();

        let (ra, rb) = tokio::join!(
            tokio::spawn({
                let store = store.clone();
                async move { store.activate(a).await }
            }),
            tokio::spawn({
                let store = store.clone();
                async move { store.activate(b).await }
            }),
        );
        assert!(ra.unwrap().unwrap());
        assert!(rb.unwrap().unwrap());

        let active = store.active_id().await.unwrap();
        assert!(active == Some(a) || active == Some(b));
        assert_single_active(&store).await;
    }
}

/// Repository whose next activating swap clears the pointer and then fails,
/// like a backend that dies halfway through a two-step move.
struct HalfFailingRepo {
    inner: InMemoryConfigRepository,
    fail_next: AtomicBool,
}

#[async_trait]
impl ConfigRepository for HalfFailingRepo {
    async fn insert(
        &self,
        content: SealedConfiguration,
        activate: bool,
    ) -> strategos::Result<ConfigurationRecord> {
        self.inner.insert(content, activate).await
    }

    async fn fetch(&self, id: ConfigId) -> strategos::Result<Option<ConfigurationRecord>> {
        self.inner.fetch(id).await
    }

    async fn fetch_page(
        &self,
        request: PageRequest,
    ) -> strategos::Result<Page<ConfigurationRecord>> {
        self.inner.fetch_page(request).await
    }

    async fn fetch_by_category(
        &self,
        category: StrategyCategory,
    ) -> strategos::Result<Vec<ConfigurationRecord>> {
        self.inner.fetch_by_category(category).await
    }

    async fn replace_content(
        &self,
        id: ConfigId,
        content: SealedConfiguration,
    ) -> strategos::Result<ConfigurationRecord> {
        self.inner.replace_content(id, content).await
    }

    async fn any_sensitive(&self) -> strategos::Result<bool> {
        self.inner.any_sensitive().await
    }

    async fn active_id(&self) -> strategos::Result<Option<ConfigId>> {
        self.inner.active_id().await
    }

    async fn swap_active(
        &self,
        expected: Option<ConfigId>,
        target: Option<ConfigId>,
    ) -> strategos::Result<ActiveSwap> {
        if target.is_some() && expected.is_some() && self.fail_next.swap(false, Ordering::SeqCst) {
            self.inner.swap_active(expected, None).await?;
            return Err(StrategosError::StoreUnavailable("connection reset".into()));
        }
        self.inner.swap_active(expected, target).await
    }
}

#[tokio::test]
async fn failed_activation_restores_previous_active() {
    let repo = Arc::new(HalfFailingRepo {
        inner: InMemoryConfigRepository::new(),
        fail_next: AtomicBool::new(false),
    });
    let store = ConfigStore::new(repo.clone(), Arc::new(CipherBox::unavailable()));

    let a = store
        .create(ConfigurationDraft::new("Trend A").activated())
        .await
        .unwrap();
    let b = store.create(ConfigurationDraft::new("Range B")).await.unwrap();

    repo.fail_next.store(true, Ordering::SeqCst);
    let err = store.activate(b).await.expect_err("swap failure must surface");
    assert!(matches!(err, StrategosError::StoreUnavailable(_)), "got {err}");

    assert_eq!(store.active_id().await.unwrap(), Some(a));
    assert_single_active(&store).await;
}

#[tokio::test]
async fn unavailable_cipher_refuses_secrets_but_accepts_plain_drafts() {
    let store = store_with(CipherBox::unavailable());
    assert!(!store.cipher().is_available());

    let err = store
        .create(
            ConfigurationDraft::new("Scalper")
                .with_secret(SensitiveCategory::ApiKeys, json!({"key": "k", "secret": "s"})),
        )
        .await
        .expect_err("secrets without a key must be refused");
    assert!(matches!(err, StrategosError::Configuration(_)), "got {err}");
    assert!(store.list_all(false).await.unwrap().is_empty());

    let id = assert_ok!(store.create(ConfigurationDraft::new("Scalper")).await);
    assert!(store.get_by_id(id, false).await.unwrap().is_some());
}

#[tokio::test]
async fn secrets_round_trip_and_fail_per_field_under_a_wrong_key() {
    let repo = Arc::new(InMemoryConfigRepository::new());
    let writer = ConfigStore::new(
        repo.clone(),
        Arc::new(CipherBox::new(Some(&CipherBox::generate_key()))),
    );
    let id = writer
        .create(
            ConfigurationDraft::new("Momentum")
                .with_secret(SensitiveCategory::ApiKeys, json!({"key": "abc"}))
                .with_secret(SensitiveCategory::PrivateParams, json!({"edge": 0.42})),
        )
        .await
        .unwrap();

    let opened = writer.get_by_id(id, true).await.unwrap().unwrap();
    assert_eq!(
        opened.sensitive_fields[&SensitiveCategory::ApiKeys].plain(),
        Some(&json!({"key": "abc"}))
    );

    let sealed = writer.get_by_id(id, false).await.unwrap().unwrap();
    assert!(matches!(
        sealed.sensitive_fields[&SensitiveCategory::ApiKeys],
        SensitiveField::Sealed(_)
    ));

    // Same rows, different key: every field fails on its own, the record still reads
    let reader = ConfigStore::new(
        repo,
        Arc::new(CipherBox::new(Some(&CipherBox::generate_key()))),
    );
    let read = reader.get_by_id(id, true).await.unwrap().unwrap();
    assert_eq!(read.name, "Momentum");
    assert!(read.sensitive_fields.values().all(SensitiveField::is_failed));
}

#[tokio::test]
async fn invalid_draft_is_rejected_without_a_write() {
    let store = keyed_store();
    let mut draft = ConfigurationDraft::new("  ").with_timeframe("7m");
    draft.risk_management = ParamTree::from_value(json!({"position_size_pct": 500.0}));

    let err = store.create(draft).await.expect_err("invalid draft");
    assert!(matches!(err, StrategosError::Validation(_)), "got {err}");
    assert!(store.list_all(false).await.unwrap().is_empty());
}

#[tokio::test]
async fn update_never_changes_which_configuration_is_active() {
    let store = keyed_store();
    let a = store
        .create(ConfigurationDraft::new("Trend A").activated())
        .await
        .unwrap();
    let b = store.create(ConfigurationDraft::new("Range B")).await.unwrap();

    let patch = ConfigurationPatch {
        description: Some("tuned".into()),
        risk_management: Some(ParamTree::from_value(
            json!({"position_size_pct": 2.0, "stop_loss_pct": 1.0}),
        )),
        ..Default::default()
    };
    let updated = store.update(b, patch).await.unwrap();
    assert_eq!(updated.description.as_deref(), Some("tuned"));
    assert!(!updated.active);
    assert_eq!(store.active_id().await.unwrap(), Some(a));
}

#[tokio::test]
async fn pages_are_newest_first_and_do_not_overlap() {
    let store = keyed_store();
    let mut created = Vec::new();
    for i in 0..7 {
        created.push(
            store
                .create(ConfigurationDraft::new(format!("Trend {i}")))
                .await
                .unwrap(),
        );
    }

    let first = store.list_page(false, PageRequest::first(3)).await.unwrap();
    let ids: Vec<ConfigId> = first.items.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![created[6], created[5], created[4]]);

    let cursor = first.next.expect("more pages");
    let second = store
        .list_page(false, PageRequest::after(3, cursor))
        .await
        .unwrap();
    let ids: Vec<ConfigId> = second.items.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![created[3], created[2], created[1]]);

    let last = store
        .list_page(false, PageRequest::after(3, second.next.expect("one more")))
        .await
        .unwrap();
    assert_eq!(last.items.len(), 1);
    assert!(last.next.is_none());
}

#[tokio::test]
async fn candidates_prefer_the_most_recently_updated() {
    let store = keyed_store();
    let older = store.create(ConfigurationDraft::new("Range Old")).await.unwrap();
    let newer = store.create(ConfigurationDraft::new("Range New")).await.unwrap();
    store.create(ConfigurationDraft::new("Trend")).await.unwrap();

    let found = store.candidates(StrategyCategory::MeanReversion).await.unwrap();
    assert_eq!(found.iter().map(|c| c.id).collect::<Vec<_>>(), vec![newer, older]);

    store
        .update(older, ConfigurationPatch {
            description: Some("refreshed".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    let found = store.candidates(StrategyCategory::MeanReversion).await.unwrap();
    assert_eq!(found[0].id, older);
}
