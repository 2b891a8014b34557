//! Metrics Snapshot Types
//!
//! Plain data crossing the PHY/stack boundary. Per-worker samples carry a
//! measured value together with the sample count it was averaged over; the
//! aggregator in the `phy` crate folds them into a weighted snapshot.

use serde::Serialize;

/// Downlink quantities measured by one worker over one reporting period.
/// `mcs` is the mean over `n_samples` processed slots.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct DlMetrics {
    pub n_samples: u64,
    pub mcs: f32,
}

/// Uplink quantities measured by one worker over one reporting period.
/// Value fields are means over `n_samples` processed slots.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct UlMetrics {
    pub n_samples: u64,
    pub mcs: f32,
    pub rssi_dbm: f32,
    pub sinr_db: f32,
}

/// One worker's contribution to a reporting period.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct WorkerMetrics {
    pub dl: DlMetrics,
    pub ul: UlMetrics,
    /// Slots whose processing exceeded the slot period
    pub deadline_misses: u64,
    /// Slots whose processing step returned an error
    pub process_failures: u64,
}

/// Random-access detection counters for a reporting period.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct PrachMetrics {
    /// Preambles reported to the stack
    pub detections: u64,
    /// Capture windows dropped because the detector queue was full
    pub dropped_windows: u64,
}

/// Aggregated snapshot handed to the exporter once per metrics period.
/// Value fields are weighted averages across workers; counters are sums.
#[derive(Debug, Default, Clone, Serialize)]
pub struct PhyMetrics {
    pub dl: DlMetrics,
    pub ul: UlMetrics,
    pub deadline_misses: u64,
    pub process_failures: u64,
    /// Slots the coordinators never saw because the producer ran ahead
    pub dropped_slots: u64,
    /// Slots skipped because the radio produced no buffer in time
    pub fetch_failures: u64,
    /// Slots skipped because the capture ring entry was already recycled
    pub stale_fetches: u64,
    pub prach: PrachMetrics,
    /// Connections present in the shared state at snapshot time
    pub connections: usize,
}
