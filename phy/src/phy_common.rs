//! Shared Pipeline Context
//!
//! State shared by the capture thread, the coordinators and every worker:
//! the validated configuration, the radio and stack boundaries, the
//! connection database and the pipeline-level drop counters. Constructed
//! once per engine instance and passed by reference; its lifetime is the
//! pipeline's lifetime.

use crate::ue_db::UeDb;
use interfaces::config::{CarrierConfig, PhyArgs, RachConfig, RefSignalConfig};
use interfaces::radio::RadioInterface;
use interfaces::stack::StackInterface;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

/// Drop accounting outside the workers. Read-and-reset by the aggregator.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    /// Slots a coordinator never processed because the producer ran ahead
    pub dropped_slots: AtomicU64,
    /// Slots the radio produced no buffer for within the budget
    pub fetch_failures: AtomicU64,
    /// Slots whose ring entry was recycled before checkout
    pub stale_fetches: AtomicU64,
}

pub struct PhyCommon {
    pub args: PhyArgs,
    pub carriers: Vec<CarrierConfig>,
    pub rach: RachConfig,
    pub ref_signal: RefSignalConfig,
    pub radio: Arc<dyn RadioInterface>,
    pub stack: Arc<dyn StackInterface>,
    pub ue_db: UeDb,
    pub counters: PipelineCounters,
}

impl PhyCommon {
    /// The slot period every pipeline paces deadlines against.
    pub fn slot_period(&self) -> Duration {
        Duration::from_micros(self.args.slot_period_us)
    }

    /// How far ahead of capture time a transmit buffer is scheduled: the
    /// pipelining depth worth of slots.
    pub fn tx_advance(&self) -> Duration {
        self.slot_period() * self.args.nof_workers as u32
    }
}
