//! Real-time PHY Processing Engine
//!
//! The deadline-bound core of the eNodeB: a radio capture thread paces one
//! or two numerology pipelines through a slot counter, each pipeline fans
//! its slots out over a fixed pool of pipelined workers, and a decoupled
//! bounded pool of detector threads handles random-access preambles. The
//! numerical kernels, the radio transport and the upper-layer stack are
//! external collaborators behind the `interfaces` crate.
//!
//! [`Phy`] is the top-level facade: it validates configuration, owns every
//! thread, exposes the control-plane entry points and folds worker counters
//! into periodic metrics snapshots.

pub mod buffer;
pub mod metrics;
pub mod phy_common;
pub mod pool;
pub mod prach;
pub mod txrx;
pub mod ue_db;
pub mod worker;

use crate::buffer::BufferRing;
use crate::phy_common::{PhyCommon, PipelineCounters};
use crate::pool::WorkerPool;
use crate::prach::PrachWorkerPool;
use crate::txrx::{PipelineSpec, PipelineState, Txrx};
use crate::ue_db::{ResourceGrant, UeConfig, UeDb};
use crate::worker::{BypassProcessor, SlotProcessor};
use common::types::Rnti;
use crossbeam_channel::{bounded, select, tick, Sender};
use interfaces::config::{CarrierConfig, ConfigError, PhyArgs, RachConfig, RefSignalConfig};
use interfaces::metrics::PhyMetrics;
use interfaces::radio::RadioInterface;
use interfaces::stack::StackInterface;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum PhyError {
    #[error("configuration rejected: {0}")]
    Config(#[from] ConfigError),

    #[error("pipeline is stopped")]
    Stopped,

    #[error("unknown connection {0}")]
    UnknownConnection(Rnti),

    #[error("the primary carrier cannot be deactivated")]
    PrimaryCarrier,

    #[error("carrier index {0} out of range")]
    CarrierOutOfRange(usize),

    #[error("processor count {got} does not match the worker pool size {expected}")]
    ProcessorMismatch { expected: usize, got: usize },

    #[error("failed to spawn pipeline thread: {0}")]
    Spawn(String),
}

/// Cell-level configuration consumed at `init`.
#[derive(Debug, Clone)]
pub struct PhyConfig {
    pub carriers: Vec<CarrierConfig>,
    pub rach: RachConfig,
    pub ref_signal: RefSignalConfig,
}

/// One processing step per worker, per pipeline. Unused sets (for a
/// numerology with no configured carrier) are discarded.
pub struct PipelineProcessors {
    pub legacy: Vec<Box<dyn SlotProcessor>>,
    pub nr: Vec<Box<dyn SlotProcessor>>,
}

impl PipelineProcessors {
    /// Silence-transmitting processors for tests and bring-up.
    pub fn bypass(nof_workers: usize) -> Self {
        let build = || {
            (0..nof_workers)
                .map(|_| Box::<BypassProcessor>::default() as Box<dyn SlotProcessor>)
                .collect()
        };
        Self {
            legacy: build(),
            nr: build(),
        }
    }
}

/// The PHY engine. Construction starts every thread; [`Phy::stop`] (or
/// drop) tears them down in dependency order.
pub struct Phy {
    common: Arc<PhyCommon>,
    pools: Vec<Arc<WorkerPool>>,
    prach: Vec<Arc<PrachWorkerPool>>,
    txrx: Txrx,
    reporter: MetricsReporter,
    stopped: bool,
}

impl Phy {
    pub fn new(
        args: PhyArgs,
        cfg: PhyConfig,
        radio: Arc<dyn RadioInterface>,
        stack: Arc<dyn StackInterface>,
        processors: PipelineProcessors,
    ) -> Result<Self, PhyError> {
        args.validate()?;
        if cfg.carriers.is_empty() {
            return Err(ConfigError::InvalidCarrier("at least one carrier is required".into()).into());
        }
        for carrier in &cfg.carriers {
            carrier.validate()?;
            cfg.rach.validate(carrier.nof_prb)?;
        }
        cfg.ref_signal.validate()?;

        let common = Arc::new(PhyCommon {
            ue_db: UeDb::new(
                cfg.carriers.len(),
                args.nof_workers as u32,
                args.tti_modulus,
            ),
            counters: PipelineCounters::default(),
            carriers: cfg.carriers,
            rach: cfg.rach,
            ref_signal: cfg.ref_signal,
            radio,
            stack,
            args,
        });

        // One detector pool per carrier, decoupled from the slot cadence.
        let mut prach = Vec::with_capacity(common.carriers.len());
        for (cc, carrier) in common.carriers.iter().enumerate() {
            prach.push(Arc::new(PrachWorkerPool::new(
                cc,
                carrier,
                &common.rach,
                common.stack.clone(),
                common.args.nof_prach_threads,
                common.args.prach_queue_depth,
                common.args.max_prach_offset_us,
            )?));
        }

        // Carriers partition into one pipeline per numerology.
        let legacy: Vec<usize> = (0..common.carriers.len())
            .filter(|&cc| common.carriers[cc].numerology.is_legacy())
            .collect();
        let nr: Vec<usize> = (0..common.carriers.len())
            .filter(|&cc| !common.carriers[cc].numerology.is_legacy())
            .collect();

        let mut pools = Vec::new();
        let mut specs = Vec::new();
        for (label, carriers, procs) in [
            ("legacy", legacy, processors.legacy),
            ("nr", nr, processors.nr),
        ] {
            if carriers.is_empty() {
                continue;
            }
            let pool = Arc::new(WorkerPool::new(label, common.clone(), carriers.clone(), procs)?);
            pools.push(pool.clone());
            specs.push(PipelineSpec {
                label: label.to_string(),
                prach: carriers.iter().map(|&cc| (cc, prach[cc].clone())).collect(),
                pool,
            });
        }

        let ring = Arc::new(BufferRing::new(common.args.rx_ring_depth()));
        let txrx = Txrx::start(common.clone(), ring, specs)?;
        let reporter = MetricsReporter::spawn(common.clone(), pools.clone(), prach.clone())?;

        info!(
            carriers = common.carriers.len(),
            workers = common.args.nof_workers,
            "PHY engine initialised"
        );
        Ok(Self {
            common,
            pools,
            prach,
            txrx,
            reporter,
            stopped: false,
        })
    }

    /// Ordered teardown: coordinators first (no new slots), then worker
    /// pools (in-flight slots complete), then detectors and the metrics
    /// reporter. Idempotent.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.txrx.stop();
        for pool in &self.pools {
            pool.stop();
        }
        for pool in &self.prach {
            pool.stop();
        }
        self.reporter.stop();
        info!("PHY engine stopped");
    }

    pub fn state(&self) -> PipelineState {
        self.txrx.state()
    }

    // ---- Control-plane entry points (safe from foreign threads) ----

    /// Insert or update a connection's configuration.
    pub fn addmod_connection(&self, rnti: Rnti, config: UeConfig) -> Result<(), PhyError> {
        self.common.ue_db.addmod(rnti, config)
    }

    /// Mark a connection for removal; reclamation is deferred until every
    /// in-flight slot has drained, then `on_connection_removed` fires.
    pub fn remove_connection(&self, rnti: Rnti) -> Result<(), PhyError> {
        self.common.ue_db.remove(rnti)
    }

    pub fn activate_deactivate_carrier(
        &self,
        rnti: Rnti,
        carrier: usize,
        active: bool,
    ) -> Result<(), PhyError> {
        self.common
            .ue_db
            .activate_deactivate_carrier(rnti, carrier, active)
    }

    /// Queue an uplink grant for the slot named in it.
    pub fn set_grant(&self, rnti: Rnti, grant: ResourceGrant) -> Result<(), PhyError> {
        self.common.ue_db.set_grant(rnti, grant)
    }

    /// Bound the searched preamble timing uncertainty on every carrier.
    pub fn set_max_prach_offset_us(&self, us: f32) {
        for pool in &self.prach {
            pool.set_max_offset_us(us);
        }
    }

    /// Fold the counters accumulated since the previous snapshot (periodic
    /// or on-demand) into a fresh one.
    pub fn metrics_now(&self) -> PhyMetrics {
        collect_metrics(&self.common, &self.pools, &self.prach)
    }
}

impl Drop for Phy {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Drain every per-period counter in the engine and fold it into one
/// snapshot.
fn collect_metrics(
    common: &Arc<PhyCommon>,
    pools: &[Arc<WorkerPool>],
    prach: &[Arc<PrachWorkerPool>],
) -> PhyMetrics {
    let workers: Vec<_> = pools.iter().flat_map(|p| p.collect_metrics()).collect();
    let mut snapshot = metrics::fold_workers(&workers);
    snapshot.dropped_slots = common.counters.dropped_slots.swap(0, Ordering::Relaxed);
    snapshot.fetch_failures = common.counters.fetch_failures.swap(0, Ordering::Relaxed);
    snapshot.stale_fetches = common.counters.stale_fetches.swap(0, Ordering::Relaxed);
    for pool in prach {
        let (detections, dropped) = pool.take_counters();
        snapshot.prach.detections += detections;
        snapshot.prach.dropped_windows += dropped;
    }
    snapshot.connections = common.ue_db.len();
    snapshot
}

/// Periodic metrics thread: folds the accumulated counters once per period
/// and hands the snapshot to the stack's exporter.
struct MetricsReporter {
    stop_tx: Sender<()>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl MetricsReporter {
    fn spawn(
        common: Arc<PhyCommon>,
        pools: Vec<Arc<WorkerPool>>,
        prach: Vec<Arc<PrachWorkerPool>>,
    ) -> Result<Self, PhyError> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let period = Duration::from_millis(common.args.metrics_period_ms);
        let thread = thread::Builder::new()
            .name("phy-metrics".into())
            .spawn(move || {
                let ticker = tick(period);
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            let snapshot = collect_metrics(&common, &pools, &prach);
                            common.stack.on_metrics_ready(&snapshot);
                        }
                    }
                }
                debug!("metrics reporter drained");
            })
            .map_err(|e| PhyError::Spawn(e.to_string()))?;
        Ok(Self {
            stop_tx,
            thread: Mutex::new(Some(thread)),
        })
    }

    fn stop(&self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self
            .thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = handle.join();
        }
    }
}
