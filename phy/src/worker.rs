//! Slot Worker
//!
//! A worker is a stateful processing unit bound to one pool slot index for
//! the lifetime of the pool. Each slot it is handed, it takes a read-only
//! connection snapshot, runs the opaque processing step for every carrier of
//! its pipeline, checks the result against the slot deadline and pushes the
//! transmit buffer towards the radio. The numerical kernels behind
//! [`SlotProcessor`] are external collaborators; the worker only owns the
//! pacing, deadline and accounting discipline around them.

use crate::metrics::{SlotMeasurements, WorkerMetricsAccum};
use crate::phy_common::PhyCommon;
use crate::ue_db::ConnectionSnapshot;
use common::types::Tti;
use interfaces::config::{CarrierConfig, ConfigError};
use interfaces::radio::{SampleBuffer, SlotCapture};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Instant;
use thiserror::Error;
use tracing::{trace, warn};

/// Failure of the opaque processing step for one slot. Recoverable: the
/// slot's output is dropped and the failure counted, the pipeline moves on.
#[derive(Error, Debug)]
#[error("slot processing failed: {0}")]
pub struct ProcessError(pub String);

/// Everything the processing step may touch during one slot on one carrier.
pub struct SlotContext<'a> {
    pub tti: Tti,
    pub carrier: usize,
    pub carrier_cfg: &'a CarrierConfig,
    pub rx: &'a SampleBuffer,
    pub tx: &'a mut SampleBuffer,
    pub connections: &'a [ConnectionSnapshot],
}

/// The numerology-specific processing seam. Implementations are selected
/// per pipeline (legacy or next-generation) and live for the pool's
/// lifetime; `configure` runs once per carrier before any slot is
/// dispatched.
pub trait SlotProcessor: Send {
    fn configure(&mut self, carrier: &CarrierConfig) -> Result<(), ConfigError>;

    fn process(&mut self, ctx: &mut SlotContext<'_>) -> Result<SlotMeasurements, ProcessError>;
}

/// A processing step that transmits silence and reports basic uplink
/// measurements. Stands in for the numerical kernels in the demo binary and
/// in tests.
#[derive(Default)]
pub struct BypassProcessor;

impl SlotProcessor for BypassProcessor {
    fn configure(&mut self, _carrier: &CarrierConfig) -> Result<(), ConfigError> {
        Ok(())
    }

    fn process(&mut self, ctx: &mut SlotContext<'_>) -> Result<SlotMeasurements, ProcessError> {
        let rssi_dbm = 10.0 * (ctx.rx.mean_power() + 1e-12).log10();
        let granted: Vec<u8> = ctx
            .connections
            .iter()
            .flat_map(|c| c.grants.iter())
            .filter(|g| g.carrier == ctx.carrier)
            .map(|g| g.mcs)
            .collect();
        let dl_mcs = if granted.is_empty() {
            None
        } else {
            Some(granted.iter().map(|&m| m as f32).sum::<f32>() / granted.len() as f32)
        };
        Ok(SlotMeasurements {
            dl_mcs,
            ul_rssi_dbm: Some(rssi_dbm),
            ul_sinr_db: Some(rssi_dbm + 120.0),
            ..Default::default()
        })
    }
}

/// One slot's worth of work handed from a coordinator to a worker.
pub struct Assignment {
    pub tti: Tti,
    pub capture: Arc<SlotCapture>,
    /// Absolute time the transmit buffer must reach the antenna
    pub tx_time: Instant,
}

pub(crate) enum SlotState {
    Idle,
    /// Acquired by a coordinator, not yet dispatched
    Reserved,
    Pending(Assignment),
    Working,
}

/// Shared face of one pool slot: its state machine and its metrics.
pub(crate) struct WorkerSlot {
    pub state: Mutex<SlotState>,
    pub cond: Condvar,
    pub metrics: Mutex<WorkerMetricsAccum>,
}

impl WorkerSlot {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Idle),
            cond: Condvar::new(),
            metrics: Mutex::new(WorkerMetricsAccum::default()),
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// The long-lived body of one worker thread.
pub(crate) struct SfWorker {
    pub index: usize,
    pub label: String,
    pub slot: Arc<WorkerSlot>,
    pub common: Arc<PhyCommon>,
    /// Carrier indices this pipeline owns
    pub carriers: Vec<usize>,
    pub processor: Box<dyn SlotProcessor>,
    pub stopping: Arc<AtomicBool>,
}

impl SfWorker {
    pub fn run(mut self) {
        trace!(worker = self.index, pipeline = %self.label, "worker started");
        while let Some(assignment) = self.next_assignment() {
            self.work(assignment);
        }
        trace!(worker = self.index, pipeline = %self.label, "worker stopped");
    }

    /// Block until an assignment is pending, or until shutdown with the
    /// slot drained back to idle.
    fn next_assignment(&self) -> Option<Assignment> {
        let mut state = lock(&self.slot.state);
        loop {
            if matches!(*state, SlotState::Pending(_)) {
                match std::mem::replace(&mut *state, SlotState::Working) {
                    SlotState::Pending(assignment) => return Some(assignment),
                    _ => unreachable!("state checked under the same lock"),
                }
            }
            if self.stopping.load(Ordering::Acquire) && matches!(*state, SlotState::Idle) {
                return None;
            }
            state = self
                .slot
                .cond
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    fn work(&mut self, assignment: Assignment) {
        let started = Instant::now();
        let tti = assignment.tti;
        let snapshot = self.common.ue_db.slot_snapshot(tti, &self.carriers);

        for &cc in &self.carriers {
            let carrier_cfg = &self.common.carriers[cc];
            let rx = match assignment.capture.carriers.get(cc) {
                Some(rx) => rx,
                None => {
                    warn!(tti, carrier = cc, "capture missing carrier buffer");
                    lock(&self.slot.metrics).record_process_failure();
                    continue;
                }
            };
            let mut tx = SampleBuffer::zeroed(carrier_cfg.samples_per_slot());
            let mut ctx = SlotContext {
                tti,
                carrier: cc,
                carrier_cfg,
                rx,
                tx: &mut tx,
                connections: &snapshot,
            };
            match self.processor.process(&mut ctx) {
                Ok(measurements) => {
                    lock(&self.slot.metrics).record(&measurements);
                    if let Err(e) = self.common.radio.push(tti, cc, tx, assignment.tx_time) {
                        warn!(tti, carrier = cc, error = %e, "transmit push failed");
                    }
                }
                Err(e) => {
                    warn!(tti, carrier = cc, error = %e, "processing step failed, slot output dropped");
                    lock(&self.slot.metrics).record_process_failure();
                }
            }
        }

        // Deadline accounting. A late slot is counted and logged; the buffer
        // was already pushed with its absolute deadline and the sink owns
        // the late-drop decision. There is no retry past a real-time
        // deadline.
        let elapsed = started.elapsed();
        if elapsed > self.common.slot_period() {
            warn!(
                tti,
                worker = self.index,
                pipeline = %self.label,
                elapsed_us = elapsed.as_micros() as u64,
                budget_us = self.common.slot_period().as_micros() as u64,
                "slot deadline missed"
            );
            lock(&self.slot.metrics).record_deadline_miss();
        }

        // Release the slot for the next acquire on this index.
        let mut state = lock(&self.slot.state);
        *state = SlotState::Idle;
        self.slot.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ue_db::{ConnectionSnapshot, ResourceGrant, UeConfig};
    use common::types::Rnti;
    use num_complex::Complex32;

    fn carrier() -> CarrierConfig {
        CarrierConfig {
            pci: common::types::Pci(1),
            nof_prb: 6,
            numerology: common::types::Numerology::Legacy,
            dl_freq_hz: 2.6e9,
            ul_freq_hz: 2.5e9,
        }
    }

    #[test]
    fn test_bypass_reports_rssi_and_grant_mcs() {
        let carrier_cfg = carrier();
        let mut rx = SampleBuffer::zeroed(64);
        rx.write_at(0, &vec![Complex32::new(1.0, 0.0); 64]);
        let mut tx = SampleBuffer::zeroed(64);
        let connections = vec![ConnectionSnapshot {
            rnti: Rnti(0x46),
            config: Arc::new(UeConfig::new(1)),
            grants: vec![
                ResourceGrant {
                    tti: 0,
                    carrier: 0,
                    nof_prb: 6,
                    mcs: 10,
                },
                ResourceGrant {
                    tti: 0,
                    carrier: 0,
                    nof_prb: 6,
                    mcs: 20,
                },
            ],
        }];
        let mut ctx = SlotContext {
            tti: 0,
            carrier: 0,
            carrier_cfg: &carrier_cfg,
            rx: &rx,
            tx: &mut tx,
            connections: &connections,
        };
        let mut processor = BypassProcessor;
        let m = processor.process(&mut ctx).unwrap();
        assert!((m.ul_rssi_dbm.unwrap() - 0.0).abs() < 0.1);
        assert!((m.dl_mcs.unwrap() - 15.0).abs() < 1e-6);
    }

    #[test]
    fn test_bypass_without_grants_reports_no_dl() {
        let carrier_cfg = carrier();
        let rx = SampleBuffer::zeroed(64);
        let mut tx = SampleBuffer::zeroed(64);
        let mut ctx = SlotContext {
            tti: 0,
            carrier: 0,
            carrier_cfg: &carrier_cfg,
            rx: &rx,
            tx: &mut tx,
            connections: &[],
        };
        let m = BypassProcessor.process(&mut ctx).unwrap();
        assert!(m.dl_mcs.is_none());
        assert!(m.ul_rssi_dbm.is_some());
    }
}
