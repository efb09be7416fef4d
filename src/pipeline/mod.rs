pub mod export;
pub mod parse;
pub mod stage;
pub mod tracker;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::buffer::{Closed, StageBuffer};
use crate::config::PipelineSettings;
use crate::exporter::DiffingExporter;
use crate::fetcher::SessionFactory;
use crate::model::Restaurant;
use crate::parser::Extractor;
use crate::seeds::SeedSource;
use crate::sink::Sink;
use export::ExportStage;
use parse::ParseStage;
use stage::run_worker;
pub use tracker::{RunState, RunStats, RunTracker};

/// How long cancelled workers get to release their sessions before their
/// tasks are aborted.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSizes {
    pub produce: usize,
    pub parse: usize,
    pub export: usize,
}

impl PoolSizes {
    /// One core is left to the runtime; the rest is split three ways, parse
    /// getting one extra worker since it spends most time waiting on pages.
    pub fn for_cpus(cpus: usize) -> Self {
        let per = cpus.saturating_sub(1).div_ceil(3).max(1);
        Self {
            produce: 1,
            parse: per + 1,
            export: per,
        }
    }

    pub fn from_settings(settings: &PipelineSettings) -> Self {
        let mut sizes = Self::for_cpus(num_cpus::get());
        if let Some(n) = settings.parse_workers {
            sizes.parse = n.max(1);
        }
        if let Some(n) = settings.export_workers {
            sizes.export = n.max(1);
        }
        sizes
    }
}

#[derive(Default)]
struct Pools {
    producer: Option<JoinHandle<()>>,
    parse: Vec<JoinHandle<()>>,
    export: Vec<JoinHandle<()>>,
}

/// Owns the produce/parse/export pools, the two buffers between them and
/// their shutdown.
///
/// Parse and export workers are spawned once and live until `shutdown`,
/// blocking on their input buffer between runs.
pub struct Harvester {
    seeds: Arc<dyn SeedSource>,
    urls: Arc<StageBuffer<String>>,
    restaurants: Arc<StageBuffer<Restaurant>>,
    tracker: Arc<RunTracker>,
    open_sessions: Arc<AtomicUsize>,
    pools: Mutex<Pools>,
    cancel: CancellationToken,
    grace: Duration,
    accepting: AtomicBool,
    sizes: PoolSizes,
}

impl Harvester {
    /// Spawn the worker pools onto the current tokio runtime.
    pub fn start(
        settings: &PipelineSettings,
        seeds: Arc<dyn SeedSource>,
        sessions: Arc<dyn SessionFactory>,
        extractor: Arc<Extractor>,
        sink: Arc<dyn Sink>,
    ) -> Self {
        let sizes = PoolSizes::from_settings(settings);
        let urls = Arc::new(StageBuffer::new("urls", settings.buffer_capacity));
        let restaurants = Arc::new(StageBuffer::new("restaurants", settings.buffer_capacity));
        let tracker = Arc::new(RunTracker::new());
        let open_sessions = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let parse_stage = Arc::new(ParseStage::new(sessions, extractor, Arc::clone(&open_sessions)));
        let export_stage = Arc::new(ExportStage::new(DiffingExporter::new(sink)));

        let parse = (0..sizes.parse)
            .map(|id| {
                tokio::spawn(run_worker(
                    Arc::clone(&parse_stage),
                    id,
                    Arc::clone(&urls),
                    Some(Arc::clone(&restaurants)),
                    Arc::clone(&tracker),
                    cancel.clone(),
                ))
            })
            .collect();
        let export = (0..sizes.export)
            .map(|id| {
                tokio::spawn(run_worker(
                    Arc::clone(&export_stage),
                    id,
                    Arc::clone(&restaurants),
                    None,
                    Arc::clone(&tracker),
                    cancel.clone(),
                ))
            })
            .collect();

        info!(
            parse_workers = sizes.parse,
            export_workers = sizes.export,
            buffer_capacity = settings.buffer_capacity,
            "Harvester started"
        );

        Self {
            seeds,
            urls,
            restaurants,
            tracker,
            open_sessions,
            pools: Mutex::new(Pools {
                producer: None,
                parse,
                export,
            }),
            cancel,
            grace: settings.shutdown_grace(),
            accepting: AtomicBool::new(true),
            sizes,
        }
    }

    /// Seed one run and return without waiting for it to drain. Returns the
    /// run number, or `None` when the run was skipped because the previous
    /// one is still in flight or the harvester is shutting down.
    pub fn run_once(&self) -> Option<u64> {
        if !self.accepting.load(Ordering::SeqCst) {
            warn!("Harvester is shutting down, run skipped");
            return None;
        }
        let Some(run) = self.tracker.begin_run() else {
            warn!(state = ?self.tracker.state(), "Previous run still in flight, run skipped");
            return None;
        };

        let producer = tokio::spawn(produce(
            run,
            Arc::clone(&self.seeds),
            Arc::clone(&self.urls),
            Arc::clone(&self.tracker),
        ));
        self.pools().producer = Some(producer);
        Some(run)
    }

    pub fn state(&self) -> RunState {
        self.tracker.state()
    }

    /// Resolves once the current run, if any, has fully drained.
    pub async fn wait_idle(&self) {
        self.tracker.wait_idle().await
    }

    pub fn last_stats(&self) -> Option<RunStats> {
        self.tracker.last_stats()
    }

    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    pub fn pool_sizes(&self) -> PoolSizes {
        self.sizes
    }

    /// Stop accepting runs and drain stage by stage within the grace period.
    /// Past it, workers are cancelled so they drop their in-flight item and
    /// release their sessions; whatever is still running after that is
    /// aborted. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(grace = ?self.grace, "Shutting down harvester");

        let Pools {
            mut producer,
            mut parse,
            mut export,
        } = std::mem::take(&mut *self.pools());

        let drain = async {
            self.urls.close();
            if let Some(p) = producer.as_mut() {
                let _ = p.await;
            }
            for h in parse.iter_mut() {
                let _ = h.await;
            }
            self.restaurants.close();
            for h in export.iter_mut() {
                let _ = h.await;
            }
        };

        if tokio::time::timeout(self.grace, drain).await.is_err() {
            warn!("Grace period elapsed, cancelling workers");
            self.urls.close();
            self.restaurants.close();
            self.cancel.cancel();

            let mut remaining: Vec<JoinHandle<()>> = producer
                .into_iter()
                .chain(parse)
                .chain(export)
                .filter(|h| !h.is_finished())
                .collect();
            let settle = async {
                for h in remaining.iter_mut() {
                    let _ = h.await;
                }
            };
            if tokio::time::timeout(CANCEL_GRACE, settle).await.is_err() {
                let stuck = remaining.iter().filter(|h| !h.is_finished()).count();
                warn!(tasks = stuck, "Aborting workers that ignored cancellation");
                for h in &remaining {
                    h.abort();
                }
            }

            let dropped = self.tracker.abandon_pending();
            if dropped > 0 {
                warn!(items = dropped, "Dropped unfinished items on shutdown");
            }
        }

        info!(open_sessions = self.open_sessions(), "Harvester stopped");
    }

    fn pools(&self) -> MutexGuard<'_, Pools> {
        self.pools.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Harvester {
    fn drop(&mut self) {
        self.urls.close();
        self.restaurants.close();
        self.cancel.cancel();
    }
}

async fn produce(
    run: u64,
    seeds: Arc<dyn SeedSource>,
    urls: Arc<StageBuffer<String>>,
    tracker: Arc<RunTracker>,
) {
    let list = match seeds.seeds() {
        Ok(list) => list,
        Err(e) => {
            warn!(run, "Failed to read seeds: {:#}", e);
            tracker.seeding_done();
            return;
        }
    };
    info!(run, seeds = list.len(), "Run started");

    for url in list {
        tracker.item_seeded();
        if let Err(Closed(url)) = urls.put(url).await {
            warn!(run, url = %url, "Seed buffer closed, stopping producer");
            tracker.item_finished();
            break;
        }
    }
    tracker.seeding_done();
}

// ── Tests ──
