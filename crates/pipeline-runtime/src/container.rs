//! Dependency wiring for the whole pipeline process.

use crate::config::PipelineConfig;
use anyhow::Context;
use pvm_01_feature_tracker::{spawn_watermark_sweeper, FeatureTracker};
use pvm_02_matcher::{MatchEngine, MatcherWorker};
use pvm_03_evidence::{EvidenceBuilder, EvidenceCoordinator};
use pvm_04_transition::{JobService, TransitionManager};
use shared_bus::exchange::TopicExchange;
use shared_bus::publisher::EventPublisher;
use shared_bus::subscriber::SubscriptionHandle;
use shared_store::blobs::{BlobRoot, DataDirLock};
use shared_store::memory::MemoryStores;
use shared_store::ports::{
    CatalogStore, JobStore, MatchStore, PhaseEventStore, ProcessedEventStore, ProgressStore,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// The stores a running pipeline uses, as trait objects so backends can
/// be swapped (the durable ledger replaces two of them).
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub progress: Arc<dyn ProgressStore>,
    pub phase_events: Arc<dyn PhaseEventStore>,
    pub ledger: Arc<dyn ProcessedEventStore>,
    pub matches: Arc<dyn MatchStore>,
}

/// A fully wired pipeline process.
pub struct Pipeline {
    pub bus: Arc<TopicExchange>,
    pub stores: Stores,
    pub service: Arc<JobService>,
    pub blob_root: BlobRoot,
    subscriptions: Vec<SubscriptionHandle>,
    sweeper: JoinHandle<()>,
    _data_lock: DataDirLock,
}

impl Pipeline {
    /// Builds stores, bus, and workers, binds every queue, and starts
    /// the watermark sweeper. Must run inside a tokio runtime.
    pub fn start(config: PipelineConfig) -> anyhow::Result<Self> {
        let blob_root = BlobRoot::create(&config.data_root)
            .with_context(|| format!("creating blob root at {}", config.data_root.display()))?;
        let data_lock = DataDirLock::acquire(blob_root.root())
            .context("acquiring exclusive lock on the data root")?;

        let bus = Arc::new(TopicExchange::new());
        let stores = build_stores(&config)?;

        let mut subscriptions = Vec::new();

        let tracker = Arc::new(FeatureTracker::new(
            bus.clone() as Arc<dyn EventPublisher>,
            stores.progress.clone(),
            stores.ledger.clone(),
            stores.jobs.clone(),
            config.tracker.clone(),
        ));
        subscriptions.extend(tracker.clone().subscribe_all(&bus));
        let sweeper = spawn_watermark_sweeper(tracker, config.tracker.sweep_interval);

        let matcher = Arc::new(MatcherWorker::new(
            MatchEngine::new(
                stores.catalog.clone(),
                stores.matches.clone(),
                config.matcher.clone(),
            ),
            bus.clone() as Arc<dyn EventPublisher>,
            stores.ledger.clone(),
            stores.jobs.clone(),
        ));
        subscriptions.push(matcher.subscribe(&bus));

        let evidence = Arc::new(EvidenceCoordinator::new(
            bus.clone() as Arc<dyn EventPublisher>,
            stores.ledger.clone(),
            stores.jobs.clone(),
            stores.matches.clone(),
            EvidenceBuilder::new(blob_root.clone()),
        ));
        subscriptions.extend(evidence.subscribe_all(&bus));

        let transition = Arc::new(TransitionManager::new(
            bus.clone() as Arc<dyn EventPublisher>,
            stores.jobs.clone(),
            stores.catalog.clone(),
            stores.phase_events.clone(),
            stores.ledger.clone(),
            config.transition.clone(),
        ));
        subscriptions.extend(transition.subscribe_all(&bus));

        let service = Arc::new(JobService::new(
            stores.jobs.clone(),
            stores.catalog.clone(),
            stores.matches.clone(),
            stores.phase_events.clone(),
            stores.ledger.clone(),
            stores.progress.clone(),
            bus.clone() as Arc<dyn EventPublisher>,
        ));

        info!(
            data_root = %blob_root.root().display(),
            queues = subscriptions.len(),
            "Pipeline started"
        );

        Ok(Self {
            bus,
            stores,
            service,
            blob_root,
            subscriptions,
            sweeper,
            _data_lock: data_lock,
        })
    }

    /// Stops consumers and the sweeper. Deliveries that were queued but
    /// not yet handled are dropped; at-least-once transport plus the
    /// idempotency ledger make that safe on restart.
    pub fn shutdown(self) {
        self.sweeper.abort();
        for sub in self.subscriptions {
            sub.shutdown();
        }
        info!("Pipeline stopped");
    }
}

#[cfg(not(feature = "rocksdb"))]
fn build_stores(_config: &PipelineConfig) -> anyhow::Result<Stores> {
    let memory = MemoryStores::new();
    Ok(Stores {
        jobs: memory.jobs,
        catalog: memory.catalog,
        progress: memory.progress,
        phase_events: memory.phase_events,
        ledger: memory.ledger,
        matches: memory.matches,
    })
}

#[cfg(feature = "rocksdb")]
fn build_stores(config: &PipelineConfig) -> anyhow::Result<Stores> {
    use shared_store::rocks::RocksLedger;

    let memory = MemoryStores::new();
    let (ledger, phase_events): (Arc<dyn ProcessedEventStore>, Arc<dyn PhaseEventStore>) =
        match &config.ledger_dir {
            Some(dir) => {
                let rocks = Arc::new(
                    RocksLedger::open(dir)
                        .map_err(|e| anyhow::anyhow!("opening durable ledger: {e}"))?,
                );
                info!(dir = %dir.display(), "Durable ledger enabled");
                (rocks.clone(), rocks)
            }
            None => (memory.ledger.clone(), memory.phase_events.clone()),
        };

    Ok(Stores {
        jobs: memory.jobs,
        catalog: memory.catalog,
        progress: memory.progress,
        phase_events,
        ledger,
        matches: memory.matches,
    })
}
