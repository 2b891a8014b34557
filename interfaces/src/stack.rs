//! Upper-Layer Callback Interface
//!
//! Events the PHY engine raises towards the protocol stack. Implementations
//! must be cheap and non-blocking: callbacks run on detector, capture and
//! metrics threads, inside the real-time path's time budget.

use crate::metrics::PhyMetrics;
use common::types::Rnti;

pub trait StackInterface: Send + Sync {
    /// A random-access preamble was detected on `carrier` with the given
    /// sequence index and estimated timing offset. Reports across capture
    /// windows are unordered.
    fn on_preamble_detected(&self, carrier: usize, preamble_index: u8, offset_us: f32);

    /// A connection marked for removal has drained out of every in-flight
    /// slot and its state has been reclaimed.
    fn on_connection_removed(&self, rnti: Rnti);

    /// A periodic metrics snapshot is ready for export.
    fn on_metrics_ready(&self, metrics: &PhyMetrics);
}
