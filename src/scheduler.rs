use crate::categorizer::Taxonomy;
use crate::config::SchedulerConfig;
use crate::dedup::Deduplicator;
use crate::fetcher::Fetcher;
use crate::parser;
use crate::registry::SourceRegistry;
use crate::store::Store;
use crate::types::{Entry, RawPayload, SourceConfig};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Fetching,
    Normalizing,
    Deduplicating,
    Categorizing,
    Committing,
}

/// Outcome of one refresh cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleSummary {
    pub skipped: bool,
    pub sources_due: usize,
    pub sources_fetched: usize,
    pub sources_failed: usize,
    pub entries_seen: usize,
    pub entries_committed: usize,
    pub entries_evicted: usize,
}

impl CycleSummary {
    fn coalesced() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }
}

/// Drives refresh cycles: fan out fetches for due sources, normalize,
/// de-duplicate, categorize, and commit through a single writer. A cycle in
/// flight coalesces any timer or on-demand trigger that arrives meanwhile.
pub struct Scheduler {
    fetcher: Arc<Fetcher>,
    registry: RwLock<Arc<SourceRegistry>>,
    store: Arc<Store>,
    taxonomy: Arc<Taxonomy>,
    dedup: Deduplicator,
    config: SchedulerConfig,
    snapshot_path: Option<PathBuf>,
    cycle_running: AtomicBool,
    trigger: Notify,
}

impl Scheduler {
    pub fn new(
        fetcher: Arc<Fetcher>,
        registry: Arc<SourceRegistry>,
        store: Arc<Store>,
        taxonomy: Arc<Taxonomy>,
        config: SchedulerConfig,
        snapshot_path: Option<PathBuf>,
    ) -> Self {
        Self {
            fetcher,
            registry: RwLock::new(registry),
            store,
            taxonomy,
            dedup: Deduplicator::default(),
            config,
            snapshot_path,
            cycle_running: AtomicBool::new(false),
            trigger: Notify::new(),
        }
    }

    pub fn store(&self) -> Arc<Store> {
        self.store.clone()
    }

    /// Swaps in a new source set between cycles. The store is untouched, so
    /// a registry reload never loses aggregated state.
    pub async fn replace_registry(&self, registry: Arc<SourceRegistry>) {
        info!("Replacing source registry ({} sources)", registry.len());
        *self.registry.write().await = registry;
    }

    /// On-demand refresh; coalesced if a cycle is already running.
    pub fn trigger_refresh(&self) {
        self.trigger.notify_one();
    }

    /// Timer-driven loop. Runs until the task is dropped.
    pub async fn run(self: Arc<Self>) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.refresh_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.trigger.notified() => {}
            }
            self.run_cycle().await;
            // A trigger that arrived while that cycle ran is coalesced, not
            // queued: drop the stored permit instead of re-running at once.
            tokio::select! {
                biased;
                _ = self.trigger.notified() => {}
                _ = std::future::ready(()) => {}
            }
        }
    }

    /// One full fetch -> normalize -> dedup -> categorize -> commit pass.
    /// Never fails the process: per-source problems are isolated and a total
    /// failure leaves the store at its last-good state.
    pub async fn run_cycle(&self) -> CycleSummary {
        if self.cycle_running.swap(true, Ordering::SeqCst) {
            warn!("Refresh trigger coalesced: a cycle is already running");
            return CycleSummary::coalesced();
        }

        let started = Instant::now();
        let summary = self.cycle_inner().await;
        self.cycle_running.store(false, Ordering::SeqCst);

        if !summary.skipped && summary.sources_due > 0 {
            info!(
                "Cycle complete in {:?}: {}/{} sources, {} candidates, {} committed, {} evicted",
                started.elapsed(),
                summary.sources_fetched,
                summary.sources_due,
                summary.entries_seen,
                summary.entries_committed,
                summary.entries_evicted,
            );
        }
        summary
    }

    async fn cycle_inner(&self) -> CycleSummary {
        let mut summary = CycleSummary::default();
        let registry = self.registry.read().await.clone();

        let due = registry.due_sources(Utc::now()).await;
        summary.sources_due = due.len();
        if due.is_empty() {
            debug!("No sources due, skipping cycle");
            summary.skipped = true;
            return summary;
        }

        self.phase(CyclePhase::Fetching);
        let payloads = self.fetch_all(&registry, due, &mut summary).await;
        summary.sources_fetched = payloads.len();
        if payloads.is_empty() {
            error!("All {} due sources failed; store keeps last-good state", summary.sources_due);
            self.phase(CyclePhase::Idle);
            return summary;
        }

        self.phase(CyclePhase::Normalizing);
        let mut batch: Vec<Entry> = Vec::new();
        for (source, payload) in &payloads {
            match parser::normalize(payload, source) {
                Ok(entries) => batch.extend(entries),
                Err(e) => {
                    warn!("Dropping payload from {}: {}", source.name, e);
                    registry.record_failure(&source.name, &e.to_string(), Utc::now()).await;
                    summary.sources_failed += 1;
                }
            }
        }
        summary.entries_seen = batch.len();

        self.phase(CyclePhase::Deduplicating);
        let index = self.store.dedup_index().await;
        let mut planned = self.dedup.plan(batch, &index);

        self.phase(CyclePhase::Categorizing);
        for entry in &mut planned {
            self.taxonomy.categorize(entry);
        }

        // Single committer: every upsert of the cycle goes through this loop,
        // and the lock inside the store covers only merge-and-write.
        self.phase(CyclePhase::Committing);
        summary.entries_committed = planned.len();
        for entry in planned {
            self.store.upsert(entry).await;
        }

        let horizon = Utc::now() - chrono::Duration::days(self.config.retention_days);
        summary.entries_evicted = self.store.evict_stale(horizon).await;

        if let Some(path) = &self.snapshot_path {
            if let Err(e) = self.store.save_snapshot(path).await {
                error!("Snapshot save failed: {}", e);
            }
        }

        self.phase(CyclePhase::Idle);
        summary
    }

    /// Concurrent fetch fan-out with a whole-cycle deadline. Sources still
    /// pending at the deadline are aborted; whatever completed is kept.
    async fn fetch_all(
        &self,
        registry: &SourceRegistry,
        due: Vec<SourceConfig>,
        summary: &mut CycleSummary,
    ) -> Vec<(SourceConfig, RawPayload)> {
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.cycle_timeout_secs);

        let mut tasks = JoinSet::new();
        for source in due {
            let fetcher = self.fetcher.clone();
            tasks.spawn(async move {
                let result = fetcher.fetch_source(&source).await;
                (source, result)
            });
        }

        let mut payloads = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((source, Ok(payload))))) => {
                    registry.record_success(&source.name, Utc::now()).await;
                    payloads.push((source, payload));
                }
                Ok(Some(Ok((source, Err(e))))) => {
                    warn!("Source {} failed this cycle: {}", source.name, e);
                    registry.record_failure(&source.name, &e.to_string(), Utc::now()).await;
                    summary.sources_failed += 1;
                }
                Ok(Some(Err(join_error))) => {
                    error!("Fetch task failed: {}", join_error);
                    summary.sources_failed += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    let pending = tasks.len();
                    warn!("Cycle deadline reached, aborting {} pending fetches", pending);
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    summary.sources_failed += pending;
                    break;
                }
            }
        }

        payloads
    }

    fn phase(&self, phase: CyclePhase) {
        debug!("Cycle phase: {:?}", phase);
    }
}
