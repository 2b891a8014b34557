//! Worker Pool
//!
//! Owns the pipelining discipline: a fixed set of workers, each bound to
//! the pool slot index `tti % pool_size`. `acquire` blocks until the worker
//! that handled `tti - pool_size` has released its slot, which bounds the
//! number of in-flight slots to the pool size and is the pipeline's only
//! backpressure mechanism. Slot `k` and slot `k + pool_size` share a
//! physical worker, so a worker always completes `k` strictly before
//! `k + pool_size` is dispatched. Completion order across different workers
//! is not ordered; only the in-flight bound holds.

use crate::phy_common::PhyCommon;
use crate::worker::{lock, Assignment, SfWorker, SlotProcessor, SlotState, WorkerSlot};
use crate::PhyError;
use common::types::Tti;
use interfaces::metrics::WorkerMetrics;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, info};

pub struct WorkerPool {
    label: String,
    slots: Vec<Arc<WorkerSlot>>,
    stopping: Arc<AtomicBool>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

/// Exclusive claim on one pool slot between `acquire` and `dispatch`.
/// Dropping an undispatched handle releases the slot.
pub struct WorkerHandle<'a> {
    pool: &'a WorkerPool,
    index: usize,
    armed: bool,
}

impl WorkerHandle<'_> {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for WorkerHandle<'_> {
    fn drop(&mut self) {
        if self.armed {
            let slot = &self.pool.slots[self.index];
            let mut state = lock(&slot.state);
            *state = SlotState::Idle;
            slot.cond.notify_all();
        }
    }
}

impl WorkerPool {
    /// Build the pool and start its worker threads. One processor per
    /// worker; each is configured for every carrier of the pipeline before
    /// any thread starts, so configuration failures surface here and not
    /// mid-slot.
    pub fn new(
        label: &str,
        common: Arc<PhyCommon>,
        carriers: Vec<usize>,
        processors: Vec<Box<dyn SlotProcessor>>,
    ) -> Result<Self, PhyError> {
        if processors.len() != common.args.nof_workers {
            return Err(PhyError::ProcessorMismatch {
                expected: common.args.nof_workers,
                got: processors.len(),
            });
        }

        let stopping = Arc::new(AtomicBool::new(false));
        let slots: Vec<Arc<WorkerSlot>> = (0..processors.len())
            .map(|_| Arc::new(WorkerSlot::new()))
            .collect();

        // Configure everything before the first thread starts, so a bad
        // carrier/processor combination fails the whole construction and
        // never leaves half a pool running.
        let mut processors = processors;
        for processor in processors.iter_mut() {
            for &cc in &carriers {
                processor.configure(&common.carriers[cc])?;
            }
        }

        let mut threads = Vec::with_capacity(processors.len());
        for (index, processor) in processors.into_iter().enumerate() {
            let worker = SfWorker {
                index,
                label: label.to_string(),
                slot: slots[index].clone(),
                common: common.clone(),
                carriers: carriers.clone(),
                processor,
                stopping: stopping.clone(),
            };
            match thread::Builder::new()
                .name(format!("{label}-worker-{index}"))
                .spawn(move || worker.run())
            {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    stopping.store(true, Ordering::Release);
                    for slot in &slots {
                        slot.cond.notify_all();
                    }
                    for handle in threads {
                        let _ = handle.join();
                    }
                    return Err(PhyError::Spawn(e.to_string()));
                }
            }
        }

        info!(
            pipeline = label,
            workers = slots.len(),
            carriers = carriers.len(),
            "worker pool started"
        );
        Ok(Self {
            label: label.to_string(),
            slots,
            stopping,
            threads: Mutex::new(threads),
        })
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Claim the pool slot for `tti`, blocking until the worker bound to
    /// that index has released its previous assignment. Fails once the pool
    /// is stopped; nothing may be acquired after `stop`.
    pub fn acquire(&self, tti: Tti) -> Result<WorkerHandle<'_>, PhyError> {
        let index = tti as usize % self.slots.len();
        let slot = &self.slots[index];
        let mut state = lock(&slot.state);
        loop {
            if self.stopping.load(Ordering::Acquire) {
                return Err(PhyError::Stopped);
            }
            if matches!(*state, SlotState::Idle) {
                *state = SlotState::Reserved;
                return Ok(WorkerHandle {
                    pool: self,
                    index,
                    armed: true,
                });
            }
            state = slot.cond.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Hand the slot to its worker thread for asynchronous execution.
    /// Returns immediately; the worker releases the slot itself when done.
    pub fn dispatch(&self, mut handle: WorkerHandle<'_>, assignment: Assignment) {
        debug_assert!(handle.armed, "dispatch of a spent handle");
        let slot = &self.slots[handle.index];
        let mut state = lock(&slot.state);
        debug_assert!(matches!(*state, SlotState::Reserved));
        *state = SlotState::Pending(assignment);
        slot.cond.notify_all();
        handle.armed = false;
    }

    /// Signal shutdown, wake everything blocked on the pool and join the
    /// worker threads. In-flight slots complete before their thread exits;
    /// nothing is force-killed. Idempotent.
    pub fn stop(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        for slot in &self.slots {
            slot.cond.notify_all();
        }
        let mut threads = lock(&self.threads);
        for handle in threads.drain(..) {
            if handle.join().is_err() {
                debug!(pipeline = %self.label, "worker thread panicked before join");
            }
        }
        info!(pipeline = %self.label, "worker pool stopped");
    }

    /// Drain every worker's metrics accumulator.
    pub fn collect_metrics(&self) -> Vec<WorkerMetrics> {
        self.slots
            .iter()
            .map(|slot| lock(&slot.metrics).take())
            .collect()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}
