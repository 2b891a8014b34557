//! Pipeline Coordinator
//!
//! The operating loop tying the radio, the synchronization primitive, the
//! worker pools and the detector pools together.
//!
//! One capture thread is the single producer: it pulls one multi-carrier
//! buffer per slot, publishes it on the capture ring and advances every
//! pipeline's slot counter. One coordinator thread per pipeline consumes
//! its counter, accounts for gaps, fetches its buffer from the ring,
//! submits detection windows on occasions and dispatches the slot into the
//! pipeline's worker pool. A radio fetch failure skips exactly that slot;
//! the cadence continues uninterrupted.

use crate::buffer::{BufferRing, Checkout};
use crate::phy_common::PhyCommon;
use crate::pool::WorkerPool;
use crate::prach::{CaptureWindow, PrachWorkerPool, SearchWindow, SEQ_LEN};
use crate::worker::{lock, Assignment};
use common::tti_sync::{self, tti_interval, TtiConsumer, TtiProducer};
use common::types::Tti;
use interfaces::radio::RadioError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lifecycle of the coordinator set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// One pipeline's static wiring. The pool itself knows which carriers it
/// processes; the coordinator only needs the detector pools to feed.
pub(crate) struct PipelineSpec {
    pub label: String,
    pub pool: Arc<WorkerPool>,
    /// Detector pools of the owned carriers
    pub prach: Vec<(usize, Arc<PrachWorkerPool>)>,
}

pub struct Txrx {
    state: Mutex<PipelineState>,
    running: Arc<AtomicBool>,
    producers: Vec<Arc<TtiProducer>>,
    capture: Mutex<Option<thread::JoinHandle<()>>>,
    coordinators: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl Txrx {
    /// Spawn the capture thread and one coordinator per pipeline. The
    /// returned set is already running.
    pub(crate) fn start(
        common: Arc<PhyCommon>,
        ring: Arc<BufferRing>,
        pipelines: Vec<PipelineSpec>,
    ) -> Result<Self, crate::PhyError> {
        let running = Arc::new(AtomicBool::new(true));
        let modulus = common.args.tti_modulus;

        // Unwind already-started coordinators if a later spawn fails.
        let abort = |producers: &[Arc<TtiProducer>], coordinators: Vec<thread::JoinHandle<()>>| {
            running.store(false, Ordering::Release);
            for (i, handle) in coordinators.into_iter().enumerate() {
                while !handle.is_finished() {
                    if let Some(producer) = producers.get(i) {
                        producer.resync();
                    }
                    thread::sleep(Duration::from_millis(1));
                }
                let _ = handle.join();
            }
        };

        let mut producers = Vec::with_capacity(pipelines.len());
        let mut coordinators = Vec::with_capacity(pipelines.len());
        for spec in pipelines {
            let (producer, consumer) = tti_sync::channel(modulus);
            producers.push(Arc::new(producer));
            let spawned = thread::Builder::new()
                .name(format!("txrx-{}", spec.label))
                .spawn({
                    let common = common.clone();
                    let ring = ring.clone();
                    let running = running.clone();
                    move || coordinator_loop(spec, consumer, common, ring, running)
                });
            match spawned {
                Ok(handle) => coordinators.push(handle),
                Err(e) => {
                    abort(&producers, coordinators);
                    return Err(crate::PhyError::Spawn(e.to_string()));
                }
            }
        }

        let capture = match thread::Builder::new().name("txrx-capture".into()).spawn({
            let common = common.clone();
            let ring = ring.clone();
            let running = running.clone();
            let producers = producers.clone();
            move || capture_loop(common, ring, producers, running)
        }) {
            Ok(handle) => handle,
            Err(e) => {
                abort(&producers, coordinators);
                return Err(crate::PhyError::Spawn(e.to_string()));
            }
        };

        info!("pipeline coordinators running");
        Ok(Self {
            state: Mutex::new(PipelineState::Running),
            running,
            producers,
            capture: Mutex::new(Some(capture)),
            coordinators: Mutex::new(coordinators),
        })
    }

    pub fn state(&self) -> PipelineState {
        *lock(&self.state)
    }

    /// Cooperative shutdown: no further slot iterations begin, in-flight
    /// dispatched slots complete in their pools, every blocked wait is
    /// released and all threads are joined.
    pub fn stop(&self) {
        {
            let mut state = lock(&self.state);
            if matches!(*state, PipelineState::Stopping | PipelineState::Stopped) {
                return;
            }
            *state = PipelineState::Stopping;
        }
        self.running.store(false, Ordering::Release);

        if let Some(handle) = lock(&self.capture).take() {
            let _ = handle.join();
        }

        // A single release can be consumed by an iteration already in
        // flight, so keep nudging each coordinator until it drains.
        let mut coordinators = lock(&self.coordinators);
        for (i, handle) in coordinators.drain(..).enumerate() {
            while !handle.is_finished() {
                if let Some(producer) = self.producers.get(i) {
                    producer.resync();
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }

        *lock(&self.state) = PipelineState::Stopped;
        info!("pipeline coordinators stopped");
    }
}

impl Drop for Txrx {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Single-producer capture loop: pull, publish, advance every pipeline.
fn capture_loop(
    common: Arc<PhyCommon>,
    ring: Arc<BufferRing>,
    producers: Vec<Arc<TtiProducer>>,
    running: Arc<AtomicBool>,
) {
    let modulus = common.args.tti_modulus;
    let mut tti: Tti = 0;

    while running.load(Ordering::Acquire) {
        let next = (tti + 1) % modulus;
        match common.radio.pull(next) {
            Ok(capture) => {
                let stamped = capture.tti % modulus;
                ring.store(stamped, Arc::new(capture));
                if stamped == next {
                    for producer in &producers {
                        producer.increase();
                    }
                } else {
                    // The radio clock ran ahead of us; jump the pipelines
                    // forward to its idea of now.
                    warn!(
                        expected = next,
                        stamped, "capture stream jumped, resynchronizing slot counters"
                    );
                    for producer in &producers {
                        producer.set_counter(stamped);
                    }
                }
                tti = stamped;
            }
            Err(RadioError::Timeout) => {
                common.counters.fetch_failures.fetch_add(1, Ordering::Relaxed);
                debug!(tti = next, "no capture within the slot budget, slot skipped");
                ring.store_empty(next);
                for producer in &producers {
                    producer.increase();
                }
                tti = next;
            }
            Err(RadioError::Closed) => {
                warn!("radio stream closed, capture stopping");
                break;
            }
        }

        // Deferred connection reclamation happens at slot boundaries, once
        // the pipelining depth has drained past the removal mark.
        for rnti in common.ue_db.advance_slot(tti) {
            common.stack.on_connection_removed(rnti);
        }
    }
}

/// Per-pipeline consumer loop. See the module docs for the state sequence.
fn coordinator_loop(
    spec: PipelineSpec,
    mut consumer: TtiConsumer,
    common: Arc<PhyCommon>,
    ring: Arc<BufferRing>,
    running: Arc<AtomicBool>,
) {
    let modulus = common.args.tti_modulus;
    let tx_advance = common.tx_advance();
    let mut prev: Option<Tti> = None;

    loop {
        let tti = consumer.wait();
        if !running.load(Ordering::Acquire) {
            break;
        }

        if let Some(prev) = prev {
            let gap = tti_interval(prev, tti, modulus);
            if gap == 0 {
                // Released without forward progress; nothing to do.
                continue;
            }
            if gap > 1 {
                common
                    .counters
                    .dropped_slots
                    .fetch_add(gap as u64 - 1, Ordering::Relaxed);
                warn!(
                    pipeline = %spec.label,
                    tti,
                    missed = gap - 1,
                    "slot counter jumped, missed slots dropped"
                );
            }
        }
        prev = Some(tti);

        let capture = match ring.checkout(tti) {
            Checkout::Ready(capture) => capture,
            Checkout::Missing => continue,
            Checkout::Stale => {
                common.counters.stale_fetches.fetch_add(1, Ordering::Relaxed);
                debug!(pipeline = %spec.label, tti, "capture recycled before fetch, slot skipped");
                continue;
            }
        };

        // Detection windows are cloned out and queued before the slot is
        // dispatched; the detectors run outside the slot budget.
        for (cc, prach) in &spec.prach {
            if !prach.is_occasion(tti) {
                continue;
            }
            if let Some(rx) = capture.carriers.get(*cc) {
                let len = SEQ_LEN.min(rx.len());
                prach.submit(CaptureWindow {
                    tti,
                    carrier: *cc,
                    timestamp: capture.timestamp,
                    samples: rx.as_slice()[..len].to_vec(),
                    search: SearchWindow { begin: 0, len },
                });
            }
        }

        let handle = match spec.pool.acquire(tti) {
            Ok(handle) => handle,
            Err(_) => break,
        };
        spec.pool.dispatch(
            handle,
            Assignment {
                tti,
                tx_time: capture.timestamp + tx_advance,
                capture,
            },
        );
    }
    debug!(pipeline = %spec.label, "coordinator drained");
}
