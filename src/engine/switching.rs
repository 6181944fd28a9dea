//! Switching engine
//!
//! One background task ticks on a fixed interval. Each tick reads the active
//! configuration, fetches metrics for every monitored asset concurrently,
//! evaluates the rules per asset, applies at most one mutation and records
//! one decision per asset. A tick still running when the next one is due is
//! skipped, never queued.

use crate::coordination::{with_timeout, RetryPolicy, ShutdownToken};
use crate::domain::{
    Configuration, ConfigurationPatch, DecisionLogEntry, DecisionOutcome, MetricsSnapshot,
    StrategyCategory, SwitchDecision,
};
use crate::error::{Result, StrategosError};
use crate::persistence::DecisionLog;
use crate::services::{MetricsProvider, NotificationEvent, NotifierHandle};
use crate::store::ConfigStore;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::rules::{
    evaluate, rank_mutations, ActiveView, AssetMemory, CandidateIndex, Evaluation, RuleTable,
    Thresholds, RISK_MULTIPLIER_KEY,
};

/// Engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Time between ticks (default: 5 min)
    pub check_interval: Duration,
    /// Time between forced full reevaluations (default: 8 h)
    pub full_reevaluation_interval: Duration,
    /// Window passed to the metrics provider (default: "24h")
    pub evaluation_window: String,
    /// Assets watched when the active configuration names none
    pub default_assets: Vec<String>,
    /// Deadline for evaluating and deciding (default: 60 s). A mutation
    /// already chosen is always carried out and logged.
    pub tick_timeout: Duration,
    /// Hold after an engine switch before another switch (default: none)
    pub min_strategy_duration: Duration,
    pub thresholds: Thresholds,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(300),
            full_reevaluation_interval: Duration::from_secs(8 * 3600),
            evaluation_window: "24h".to_string(),
            default_assets: vec!["BTC".to_string(), "ETH".to_string()],
            tick_timeout: Duration::from_secs(60),
            min_strategy_duration: Duration::ZERO,
            thresholds: Thresholds::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Observable engine phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Evaluating,
    Deciding,
    Applying,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Evaluating => write!(f, "evaluating"),
            EngineState::Deciding => write!(f, "deciding"),
            EngineState::Applying => write!(f, "applying"),
        }
    }
}

/// Whether a tick may change anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickMode {
    Live,
    /// Evaluate only: nothing is applied, logged or remembered
    DryRun,
}

/// Result of one completed tick
#[derive(Debug, Clone)]
pub struct TickReport {
    pub tick_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub full_reevaluation: bool,
    /// One entry per evaluated asset, in monitored order
    pub entries: Vec<DecisionLogEntry>,
    /// Assets whose metrics could not be read this tick
    pub skipped_assets: Vec<String>,
}

impl TickReport {
    /// The entry whose mutation was carried out, if any
    pub fn applied(&self) -> Option<&DecisionLogEntry> {
        self.entries.iter().find(|e| e.applied)
    }
}

#[derive(Debug, Clone)]
pub enum TickOutcome {
    Completed(TickReport),
    /// Another tick was still in flight
    SkippedOverlap,
}

/// Counters exposed for status output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub ticks_completed: u64,
    pub ticks_failed: u64,
    pub ticks_skipped_overlap: u64,
    pub decisions_lost: u64,
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    skipped_overlap: AtomicU64,
}

#[derive(Debug, Default)]
struct EngineMemory {
    assets: HashMap<String, AssetMemory>,
    last_full_reevaluation: Option<DateTime<Utc>>,
    last_switch: Option<DateTime<Utc>>,
}

/// Everything decided within the tick deadline
struct Decided {
    tick_id: Uuid,
    started_at: DateTime<Utc>,
    full_due: bool,
    active: Option<Configuration>,
    snapshots: Vec<MetricsSnapshot>,
    skipped_assets: Vec<String>,
    decisions: Vec<SwitchDecision>,
}

/// Clears the in-flight flag however the tick ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SwitchingEngine {
    store: Arc<ConfigStore>,
    metrics: Arc<dyn MetricsProvider>,
    decisions: DecisionLog,
    notifier: NotifierHandle,
    rules: RuleTable,
    config: EngineConfig,
    state_tx: watch::Sender<EngineState>,
    memory: Mutex<EngineMemory>,
    in_flight: AtomicBool,
    counters: Counters,
}

impl SwitchingEngine {
    pub fn new(
        store: Arc<ConfigStore>,
        metrics: Arc<dyn MetricsProvider>,
        decisions: DecisionLog,
        rules: RuleTable,
        config: EngineConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(EngineState::Idle);
        Self {
            store,
            metrics,
            decisions,
            notifier: NotifierHandle::disabled(),
            rules,
            config,
            state_tx,
            memory: Mutex::new(EngineMemory::default()),
            in_flight: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: NotifierHandle) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.state_tx.subscribe()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            ticks_completed: self.counters.completed.load(Ordering::Relaxed),
            ticks_failed: self.counters.failed.load(Ordering::Relaxed),
            ticks_skipped_overlap: self.counters.skipped_overlap.load(Ordering::Relaxed),
            decisions_lost: self.decisions.failure_count(),
        }
    }

    fn set_state(&self, state: EngineState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "engine state");
        }
    }

    /// Refuse to run when stored secrets exist but cannot be decrypted
    pub async fn preflight(&self) -> Result<()> {
        if self.store.cipher().is_available() {
            return Ok(());
        }
        let has_secrets = self
            .config
            .retry
            .run("has_sensitive_fields", || self.store.has_sensitive_fields())
            .await?;
        if has_secrets {
            return Err(StrategosError::Configuration(
                "stored configurations carry sensitive fields but no valid encryption key is configured"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Drive ticks until shutdown. The in-flight tick is allowed to finish.
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownToken) -> Result<()> {
        self.preflight().await?;

        info!(
            interval_secs = self.config.check_interval.as_secs(),
            full_reevaluation_secs = self.config.full_reevaluation_interval.as_secs(),
            window = %self.config.evaluation_window,
            "Switching engine starting"
        );

        let mut ticker = tokio::time::interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if in_flight.as_ref().is_some_and(|h| !h.is_finished()) {
                        self.record_overlap();
                        continue;
                    }
                    let engine = self.clone();
                    in_flight = Some(tokio::spawn(async move {
                        engine.run_tick().await;
                    }));
                }
                signal = shutdown.wait_for_shutdown() => {
                    info!(%signal, "Switching engine stopping, no new ticks");
                    break;
                }
            }
        }

        if let Some(handle) = in_flight {
            if let Err(e) = handle.await {
                error!(error = %e, "tick task panicked during shutdown");
            }
        }
        self.set_state(EngineState::Idle);
        info!("Switching engine stopped");
        Ok(())
    }

    /// One scheduled tick: failures are logged, never propagated
    async fn run_tick(&self) {
        match self.tick().await {
            Ok(TickOutcome::Completed(report)) => {
                info!(
                    tick = %report.tick_id,
                    assets = report.entries.len(),
                    skipped = report.skipped_assets.len(),
                    applied = ?report.applied().map(|e| e.outcome.to_string()),
                    "tick completed"
                );
            }
            Ok(TickOutcome::SkippedOverlap) => {}
            Err(e) => {
                error!(error = %e, "tick failed, active configuration unchanged");
                self.notifier.fire(NotificationEvent::TickFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn record_overlap(&self) {
        let total = self.counters.skipped_overlap.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            event = "skipped-overlap",
            total,
            state = %self.state(),
            "previous tick still running, skipping this one"
        );
        self.notifier.fire(NotificationEvent::TickSkipped {
            reason: format!("previous tick still running ({total} skipped so far)"),
        });
    }

    /// Run a live tick now
    pub async fn tick(&self) -> Result<TickOutcome> {
        self.tick_with(TickMode::Live).await
    }

    /// Run a tick in the given mode. Evaluating and deciding are bounded by
    /// the tick timeout; applying and logging always run to completion.
    pub async fn tick_with(&self, mode: TickMode) -> Result<TickOutcome> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.record_overlap();
            return Ok(TickOutcome::SkippedOverlap);
        }
        let _guard = InFlight(&self.in_flight);

        let tick_id = Uuid::new_v4();
        let result = async {
            let decided =
                with_timeout(self.config.tick_timeout, "tick", self.decide(tick_id)).await?;
            Ok::<_, StrategosError>(self.apply_and_record(decided, mode).await)
        }
        .instrument(info_span!("tick", %tick_id))
        .await;
        self.set_state(EngineState::Idle);

        match result {
            Ok(report) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                Ok(TickOutcome::Completed(report))
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    async fn decide(&self, tick_id: Uuid) -> Result<Decided> {
        let started_at = Utc::now();
        let retry = &self.config.retry;

        // ---- evaluating ----
        self.set_state(EngineState::Evaluating);

        let active = retry
            .run("get_active", || self.store.get_active(false))
            .await?;
        let active_view = active.as_ref().map(ActiveView::of);
        let assets = self.monitored_assets(active.as_ref());

        let (full_due, previous) = {
            let memory = self.memory.lock().await;
            let due = memory.last_full_reevaluation.map_or(true, |last| {
                (started_at - last)
                    .to_std()
                    .map_or(false, |elapsed| elapsed >= self.config.full_reevaluation_interval)
            });
            (due, memory.assets.clone())
        };

        let (snapshots, skipped_assets) = self.fetch_metrics(&assets).await;
        if snapshots.is_empty() && !assets.is_empty() {
            return Err(StrategosError::ProviderUnavailable(format!(
                "no metrics for any of {} monitored assets",
                assets.len()
            )));
        }

        let candidates = self.candidate_index().await?;

        // ---- deciding ----
        self.set_state(EngineState::Deciding);

        let decisions: Vec<SwitchDecision> = snapshots
            .iter()
            .map(|snapshot| {
                evaluate(
                    Evaluation {
                        snapshot,
                        active: active_view.as_ref(),
                        previous: previous.get(&snapshot.asset).copied(),
                        full_reevaluation_due: full_due,
                        candidates: &candidates,
                    },
                    &self.rules,
                    &self.config.thresholds,
                )
            })
            .collect();

        for d in &decisions {
            debug!(
                asset = %d.asset,
                outcome = %d.outcome,
                trigger = d.trigger.map(|t| t.as_str()),
                confidence = d.confidence,
                reason = %d.reason,
                "decision"
            );
        }

        Ok(Decided {
            tick_id,
            started_at,
            full_due,
            active,
            snapshots,
            skipped_assets,
            decisions,
        })
    }

    async fn apply_and_record(&self, decided: Decided, mode: TickMode) -> TickReport {
        let Decided {
            tick_id,
            started_at,
            full_due,
            active,
            snapshots,
            skipped_assets,
            decisions,
        } = decided;

        // ---- applying ----
        // Best-ranked mutation first; on failure or hold, fall through to the next
        let mut applied = None;
        let mut held = Vec::new();
        if mode == TickMode::Live {
            for index in rank_mutations(&decisions) {
                let decision = &decisions[index];
                if let Some(remaining) = self.switch_hold(decision, active.is_some()).await {
                    info!(
                        asset = %decision.asset,
                        outcome = %decision.outcome,
                        remaining_secs = remaining.as_secs(),
                        "switch held, current strategy has not run long enough"
                    );
                    held.push((index, remaining));
                    continue;
                }
                self.set_state(EngineState::Applying);
                match self.apply(decision, active.as_ref()).await {
                    Ok(()) => {
                        applied = Some(index);
                        break;
                    }
                    Err(e) => error!(
                        asset = %decision.asset,
                        outcome = %decision.outcome,
                        error = %e,
                        "failed to apply decision"
                    ),
                }
            }
        }

        let from = active.as_ref().map(|c| c.id);
        let mut entries: Vec<DecisionLogEntry> = decisions
            .iter()
            .enumerate()
            .map(|(i, d)| DecisionLogEntry::from_decision(tick_id, d, from, applied == Some(i)))
            .collect();
        for (index, remaining) in held {
            entries[index].reason.push_str(&format!(
                " (held: {}s left of the minimum strategy duration)",
                remaining.as_secs()
            ));
        }

        if mode == TickMode::Live {
            for entry in &entries {
                self.decisions.append(entry).await;
            }

            let mut memory = self.memory.lock().await;
            for snapshot in &snapshots {
                memory
                    .assets
                    .insert(snapshot.asset.clone(), AssetMemory::of(snapshot));
            }
            if full_due {
                memory.last_full_reevaluation = Some(started_at);
            }
            if let Some(i) = applied {
                if matches!(decisions[i].outcome, DecisionOutcome::Switch { .. }) {
                    memory.last_switch = Some(Utc::now());
                }
            }
        }

        TickReport {
            tick_id,
            started_at,
            full_reevaluation: full_due,
            entries,
            skipped_assets,
        }
    }

    /// Time left before another switch is allowed, if the decision is a held switch
    async fn switch_hold(&self, decision: &SwitchDecision, has_active: bool) -> Option<Duration> {
        let hold = self.config.min_strategy_duration;
        if hold.is_zero() || !has_active {
            return None;
        }
        if !matches!(decision.outcome, DecisionOutcome::Switch { .. }) {
            return None;
        }
        let last = self.memory.lock().await.last_switch?;
        let elapsed = (Utc::now() - last).to_std().unwrap_or(Duration::ZERO);
        hold.checked_sub(elapsed).filter(|left| !left.is_zero())
    }

    fn monitored_assets(&self, active: Option<&Configuration>) -> Vec<String> {
        match active {
            Some(config) if !config.assets_to_monitor.is_empty() => {
                config.assets_to_monitor.iter().cloned().collect()
            }
            _ => {
                let mut assets: Vec<String> = Vec::new();
                for asset in &self.config.default_assets {
                    let asset = asset.trim().to_ascii_uppercase();
                    if !asset.is_empty() && !assets.contains(&asset) {
                        assets.push(asset);
                    }
                }
                assets
            }
        }
    }

    /// Fetch every asset concurrently; failures are isolated per asset
    async fn fetch_metrics(&self, assets: &[String]) -> (Vec<MetricsSnapshot>, Vec<String>) {
        let window = self.config.evaluation_window.as_str();
        let fetches = assets.iter().map(|asset| async move {
            let result = self
                .config
                .retry
                .run("metrics_snapshot", move || async move {
                    let snapshot = self.metrics.snapshot(asset, window).await?;
                    snapshot
                        .validate()
                        .map_err(|e| StrategosError::ProviderUnavailable(format!("{asset}: {e}")))?;
                    Ok::<_, StrategosError>(snapshot)
                })
                .await;
            (asset, result)
        });

        let mut snapshots = Vec::new();
        let mut skipped = Vec::new();
        for (asset, result) in join_all(fetches).await {
            match result {
                Ok(mut snapshot) => {
                    snapshot.asset = asset.clone();
                    snapshots.push(snapshot);
                }
                Err(e) => {
                    warn!(asset = %asset, error = %e, "metrics unavailable, skipping asset this tick");
                    skipped.push(asset.clone());
                }
            }
        }
        (snapshots, skipped)
    }

    async fn candidate_index(&self) -> Result<CandidateIndex> {
        let mut index = CandidateIndex::new();
        for category in StrategyCategory::BY_RISK {
            let found = self
                .config
                .retry
                .run("candidates", || self.store.candidates(category))
                .await?;
            if let Some(best) = found.first() {
                index.insert(category, best.id);
            }
        }
        Ok(index)
    }

    async fn apply(&self, decision: &SwitchDecision, active: Option<&Configuration>) -> Result<()> {
        let retry = &self.config.retry;
        match &decision.outcome {
            DecisionOutcome::Keep => Ok(()),
            DecisionOutcome::Switch { target, category } => {
                retry.run("activate", || self.store.activate(*target)).await?;
                info!(
                    asset = %decision.asset,
                    from = ?active.map(|c| c.id),
                    to = %target,
                    category = %category,
                    trigger = decision.trigger.map(|t| t.as_str()),
                    "strategy switched"
                );
                Ok(())
            }
            DecisionOutcome::AdjustRisk(adj) => {
                let config = active.ok_or_else(|| {
                    StrategosError::Internal("risk adjustment without an active configuration".into())
                })?;
                let patch = ConfigurationPatch {
                    risk_management: Some(
                        config
                            .risk_management
                            .with_number(RISK_MULTIPLIER_KEY, adj.position_size_multiplier),
                    ),
                    ..Default::default()
                };
                retry
                    .run("update_risk", || self.store.update(config.id, patch.clone()))
                    .await?;
                info!(
                    id = %config.id,
                    multiplier = adj.position_size_multiplier,
                    "risk reduced on active configuration"
                );
                self.notifier.fire(NotificationEvent::RiskAdjusted {
                    id: config.id,
                    position_size_multiplier: adj.position_size_multiplier,
                    reason: adj.reason.clone(),
                });
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryConfigRepository, InMemoryDecisionSink};
    use crate::crypto::CipherBox;
    use crate::domain::{
        ConfigId, ConfigurationDraft, ConfigurationRecord, ParamTree, SealedConfiguration,
        SessionWindow, SwitchTrigger, VolatilityRegime,
    };
    use crate::services::market_metrics::MockMetricsProvider;
    use crate::store::{ActiveSwap, ConfigRepository, Page, PageRequest};
    use async_trait::async_trait;

    /// In-memory repository with slow pointer moves and optionally failing updates
    #[derive(Default)]
    struct FlakyRepo {
        inner: InMemoryConfigRepository,
        swap_delay: Duration,
        fail_updates: bool,
    }

    #[async_trait]
    impl ConfigRepository for FlakyRepo {
        async fn insert(
            &self,
            content: SealedConfiguration,
            activate: bool,
        ) -> Result<ConfigurationRecord> {
            self.inner.insert(content, activate).await
        }

        async fn fetch(&self, id: ConfigId) -> Result<Option<ConfigurationRecord>> {
            self.inner.fetch(id).await
        }

        async fn fetch_page(&self, request: PageRequest) -> Result<Page<ConfigurationRecord>> {
            self.inner.fetch_page(request).await
        }

        async fn fetch_by_category(
            &self,
            category: StrategyCategory,
        ) -> Result<Vec<ConfigurationRecord>> {
            self.inner.fetch_by_category(category).await
        }

        async fn replace_content(
            &self,
            id: ConfigId,
            content: SealedConfiguration,
        ) -> Result<ConfigurationRecord> {
            if self.fail_updates {
                return Err(StrategosError::StoreUnavailable("write rejected".into()));
            }
            self.inner.replace_content(id, content).await
        }

        async fn any_sensitive(&self) -> Result<bool> {
            self.inner.any_sensitive().await
        }

        async fn active_id(&self) -> Result<Option<ConfigId>> {
            self.inner.active_id().await
        }

        async fn swap_active(
            &self,
            expected: Option<ConfigId>,
            target: Option<ConfigId>,
        ) -> Result<ActiveSwap> {
            if target.is_some() {
                tokio::time::sleep(self.swap_delay).await;
            }
            self.inner.swap_active(expected, target).await
        }
    }

    struct Rig {
        engine: SwitchingEngine,
        store: Arc<ConfigStore>,
        sink: Arc<InMemoryDecisionSink>,
    }

    fn rig(repo: FlakyRepo, mock: MockMetricsProvider, config: EngineConfig) -> Rig {
        let store = Arc::new(ConfigStore::new(
            Arc::new(repo),
            Arc::new(CipherBox::unavailable()),
        ));
        let sink = Arc::new(InMemoryDecisionSink::new());
        let engine = SwitchingEngine::new(
            store.clone(),
            Arc::new(mock),
            DecisionLog::new(sink.clone(), Duration::from_secs(1)),
            RuleTable::default(),
            config,
        );
        Rig { engine, store, sink }
    }

    fn reading(asset: &str, win_rate: f64, drawdown: f64, regime: VolatilityRegime) -> MetricsSnapshot {
        MetricsSnapshot {
            drawdown,
            ..snapshot(asset, win_rate, regime)
        }
    }

    fn snapshot(asset: &str, win_rate: f64, regime: VolatilityRegime) -> MetricsSnapshot {
        MetricsSnapshot {
            asset: asset.to_string(),
            window: "24h".into(),
            win_rate,
            drawdown: 0.05,
            volatility_regime: regime,
            session_window: SessionWindow::Asian,
            captured_at: Utc::now(),
        }
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            default_assets: vec!["BTC".into(), "ETH".into()],
            retry: RetryPolicy {
                max_attempts: 2,
                base_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
                call_timeout: Duration::from_secs(1),
            },
            ..EngineConfig::default()
        }
    }

    async fn engine_with(mock: MockMetricsProvider) -> (SwitchingEngine, Arc<ConfigStore>) {
        let store = Arc::new(ConfigStore::new(
            Arc::new(InMemoryConfigRepository::new()),
            Arc::new(CipherBox::unavailable()),
        ));
        let log = DecisionLog::new(Arc::new(InMemoryDecisionSink::new()), Duration::from_secs(1));
        let engine = SwitchingEngine::new(
            store.clone(),
            Arc::new(mock),
            log,
            RuleTable::default(),
            fast_config(),
        );
        (engine, store)
    }

    #[tokio::test]
    async fn test_failing_asset_is_isolated() {
        let mut mock = MockMetricsProvider::new();
        mock.expect_snapshot().returning(|asset, _| {
            if asset == "ETH" {
                Err(StrategosError::ProviderUnavailable("eth feed down".into()))
            } else {
                Ok(snapshot(asset, 0.6, VolatilityRegime::Medium))
            }
        });
        let (engine, store) = engine_with(mock).await;
        store
            .create(ConfigurationDraft::new("Trend").activated())
            .await
            .unwrap();

        let TickOutcome::Completed(report) = engine.tick().await.unwrap() else {
            panic!("tick should complete");
        };
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].asset, "BTC");
        assert_eq!(report.skipped_assets, vec!["ETH".to_string()]);
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[tokio::test]
    async fn test_all_assets_failing_fails_the_tick() {
        let mut mock = MockMetricsProvider::new();
        mock.expect_snapshot()
            .returning(|_, _| Err(StrategosError::ProviderUnavailable("down".into())));
        let (engine, _store) = engine_with(mock).await;

        assert!(engine.tick().await.is_err());
        assert_eq!(engine.stats().ticks_failed, 1);
    }

    #[tokio::test]
    async fn test_first_tick_is_full_reevaluation() {
        let mut mock = MockMetricsProvider::new();
        mock.expect_snapshot()
            .returning(|asset, _| Ok(snapshot(asset, 0.6, VolatilityRegime::Medium)));
        let (engine, store) = engine_with(mock).await;
        store
            .create(ConfigurationDraft::new("Trend").activated().with_assets(["SOL"]))
            .await
            .unwrap();

        let TickOutcome::Completed(first) = engine.tick().await.unwrap() else {
            panic!("tick should complete");
        };
        assert!(first.full_reevaluation);
        assert_eq!(first.entries[0].asset, "SOL");

        let TickOutcome::Completed(second) = engine.tick().await.unwrap() else {
            panic!("tick should complete");
        };
        assert!(!second.full_reevaluation);
        assert_eq!(second.entries[0].trigger, None);
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let mut mock = MockMetricsProvider::new();
        mock.expect_snapshot()
            .returning(|asset, _| Ok(snapshot(asset, 0.1, VolatilityRegime::Low)));
        let (engine, store) = engine_with(mock).await;
        let active = store
            .create(ConfigurationDraft::new("Scalper").activated())
            .await
            .unwrap();
        store.create(ConfigurationDraft::new("Range")).await.unwrap();

        let TickOutcome::Completed(report) = engine.tick_with(TickMode::DryRun).await.unwrap()
        else {
            panic!("tick should complete");
        };
        assert!(report.entries.iter().all(|e| !e.applied));
        assert!(report.entries.iter().any(|e| e.outcome.is_mutation()));
        assert_eq!(store.active_id().await.unwrap(), Some(active));
    }

    #[tokio::test]
    async fn test_slow_apply_past_the_deadline_still_completes_and_logs() {
        let mut mock = MockMetricsProvider::new();
        mock.expect_snapshot()
            .returning(|asset, _| Ok(reading(asset, 0.10, 0.05, VolatilityRegime::Low)));
        let repo = FlakyRepo {
            swap_delay: Duration::from_millis(200),
            ..FlakyRepo::default()
        };
        let rig = rig(
            repo,
            mock,
            EngineConfig {
                tick_timeout: Duration::from_millis(50),
                ..fast_config()
            },
        );
        rig.store
            .create(ConfigurationDraft::new("Scalper").with_assets(["BTC"]).activated())
            .await
            .unwrap();
        let range = rig.store.create(ConfigurationDraft::new("Range")).await.unwrap();

        let TickOutcome::Completed(report) = rig.engine.tick().await.unwrap() else {
            panic!("tick should complete");
        };
        assert!(report.applied().is_some());
        assert_eq!(rig.store.active_id().await.unwrap(), Some(range));

        let logged = rig.sink.entries().await;
        assert_eq!(logged.len(), 1);
        assert!(logged[0].applied);
        assert_eq!(rig.engine.stats().ticks_failed, 0);
    }

    #[tokio::test]
    async fn test_failed_mutation_falls_through_to_the_next_one() {
        let mut mock = MockMetricsProvider::new();
        mock.expect_snapshot().returning(|asset, _| {
            Ok(match asset {
                "BTC" => reading(asset, 0.60, 0.30, VolatilityRegime::Low),
                _ => reading(asset, 0.60, 0.05, VolatilityRegime::Medium),
            })
        });
        let repo = FlakyRepo {
            fail_updates: true,
            ..FlakyRepo::default()
        };
        let rig = rig(repo, mock, fast_config());

        let mut draft = ConfigurationDraft::new("Range")
            .with_assets(["BTC", "ETH"])
            .activated();
        draft.risk_management = ParamTree::from_value(
            serde_json::json!({"position_size_pct": 4.0, "stop_loss_pct": 2.0}),
        );
        rig.store.create(draft).await.unwrap();
        let trend = rig.store.create(ConfigurationDraft::new("Trend")).await.unwrap();

        let TickOutcome::Completed(report) = rig.engine.tick().await.unwrap() else {
            panic!("tick should complete");
        };
        // BTC's risk cut ranks first but cannot be written; ETH's switch goes through
        let btc = &report.entries[0];
        assert!(matches!(btc.outcome, DecisionOutcome::AdjustRisk(_)));
        assert!(!btc.applied);
        let eth = &report.entries[1];
        assert_eq!(eth.trigger, Some(SwitchTrigger::ScheduledReevaluation));
        assert!(eth.applied);
        assert_eq!(rig.store.active_id().await.unwrap(), Some(trend));
    }

    #[tokio::test]
    async fn test_switch_is_held_until_minimum_duration() {
        let mut mock = MockMetricsProvider::new();
        mock.expect_snapshot()
            .returning(|asset, _| Ok(snapshot(asset, 0.10, VolatilityRegime::Medium)));
        let rig = rig(
            FlakyRepo::default(),
            mock,
            EngineConfig {
                min_strategy_duration: Duration::from_secs(3600),
                ..fast_config()
            },
        );
        rig.store
            .create(ConfigurationDraft::new("Scalper").with_assets(["BTC"]).activated())
            .await
            .unwrap();
        rig.store.create(ConfigurationDraft::new("Range")).await.unwrap();
        let trend = rig.store.create(ConfigurationDraft::new("Trend")).await.unwrap();

        let TickOutcome::Completed(first) = rig.engine.tick().await.unwrap() else {
            panic!("tick should complete");
        };
        assert!(first.entries[0].applied);
        assert_eq!(rig.store.active_id().await.unwrap(), Some(trend));

        // Trend is failing too, but it has only just been activated
        let TickOutcome::Completed(second) = rig.engine.tick().await.unwrap() else {
            panic!("tick should complete");
        };
        assert!(second.entries[0].outcome.is_mutation());
        assert!(!second.entries[0].applied);
        assert!(second.entries[0].reason.contains("held"));
        assert_eq!(rig.store.active_id().await.unwrap(), Some(trend));
    }

    #[tokio::test]
    async fn test_preflight_rejects_unreadable_secrets() {
        let repo = Arc::new(InMemoryConfigRepository::new());
        let writer = ConfigStore::new(
            repo.clone(),
            Arc::new(CipherBox::new(Some(&CipherBox::generate_key()))),
        );
        writer
            .create(ConfigurationDraft::new("Scalper").with_secret(
                crate::domain::SensitiveCategory::ApiKeys,
                serde_json::json!({"k": "v"}),
            ))
            .await
            .unwrap();

        let store = Arc::new(ConfigStore::new(repo, Arc::new(CipherBox::unavailable())));
        let engine = SwitchingEngine::new(
            store,
            Arc::new(MockMetricsProvider::new()),
            DecisionLog::new(Arc::new(InMemoryDecisionSink::new()), Duration::from_secs(1)),
            RuleTable::default(),
            fast_config(),
        );
        assert!(matches!(
            engine.preflight().await,
            Err(StrategosError::Configuration(_))
        ));
    }
}
