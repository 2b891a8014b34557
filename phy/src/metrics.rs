//! Metrics Accumulation and Aggregation
//!
//! Workers accumulate per-slot measurements into a [`WorkerMetricsAccum`];
//! once per reporting period the aggregator drains every worker and folds
//! the samples into one [`PhyMetrics`] snapshot. Averaged quantities are
//! weighted by the sample count they were measured over, so workers that
//! processed more slots contribute proportionally more. A quantity nobody
//! measured reports zero; the division is skipped, not attempted.

use interfaces::metrics::{DlMetrics, PhyMetrics, UlMetrics, WorkerMetrics};

/// Measurements the processing step reports for one slot. `None` means the
/// quantity was not measured this slot and carries no weight.
#[derive(Debug, Default, Clone, Copy)]
pub struct SlotMeasurements {
    pub dl_mcs: Option<f32>,
    pub ul_mcs: Option<f32>,
    pub ul_rssi_dbm: Option<f32>,
    pub ul_sinr_db: Option<f32>,
}

/// Running sums owned by one worker, drained once per reporting period.
#[derive(Debug, Default)]
pub struct WorkerMetricsAccum {
    dl_samples: u64,
    dl_mcs_sum: f64,
    ul_samples: u64,
    ul_mcs_sum: f64,
    ul_rssi_sum: f64,
    ul_sinr_sum: f64,
    deadline_misses: u64,
    process_failures: u64,
}

impl WorkerMetricsAccum {
    pub fn record(&mut self, m: &SlotMeasurements) {
        if let Some(mcs) = m.dl_mcs {
            self.dl_samples += 1;
            self.dl_mcs_sum += mcs as f64;
        }
        if m.ul_mcs.is_some() || m.ul_rssi_dbm.is_some() || m.ul_sinr_db.is_some() {
            self.ul_samples += 1;
            self.ul_mcs_sum += m.ul_mcs.unwrap_or(0.0) as f64;
            self.ul_rssi_sum += m.ul_rssi_dbm.unwrap_or(0.0) as f64;
            self.ul_sinr_sum += m.ul_sinr_db.unwrap_or(0.0) as f64;
        }
    }

    pub fn record_deadline_miss(&mut self) {
        self.deadline_misses += 1;
    }

    pub fn record_process_failure(&mut self) {
        self.process_failures += 1;
    }

    /// Drain the accumulator into a per-period sample, resetting it.
    pub fn take(&mut self) -> WorkerMetrics {
        let taken = std::mem::take(self);
        WorkerMetrics {
            dl: DlMetrics {
                n_samples: taken.dl_samples,
                mcs: mean(taken.dl_mcs_sum, taken.dl_samples),
            },
            ul: UlMetrics {
                n_samples: taken.ul_samples,
                mcs: mean(taken.ul_mcs_sum, taken.ul_samples),
                rssi_dbm: mean(taken.ul_rssi_sum, taken.ul_samples),
                sinr_db: mean(taken.ul_sinr_sum, taken.ul_samples),
            },
            deadline_misses: taken.deadline_misses,
            process_failures: taken.process_failures,
        }
    }
}

fn mean(sum: f64, n: u64) -> f32 {
    if n > 0 {
        (sum / n as f64) as f32
    } else {
        0.0
    }
}

/// Weighted fold of per-worker samples. Counter fields of the snapshot that
/// are not worker-owned (drops, detector counters, connection count) are
/// left zero for the caller to fill in.
pub fn fold_workers(workers: &[WorkerMetrics]) -> PhyMetrics {
    let mut dl_weight = 0u64;
    let mut dl_mcs = 0f64;
    let mut ul_weight = 0u64;
    let mut ul_mcs = 0f64;
    let mut ul_rssi = 0f64;
    let mut ul_sinr = 0f64;
    let mut snapshot = PhyMetrics::default();

    for w in workers {
        dl_weight += w.dl.n_samples;
        dl_mcs += w.dl.n_samples as f64 * w.dl.mcs as f64;

        ul_weight += w.ul.n_samples;
        ul_mcs += w.ul.n_samples as f64 * w.ul.mcs as f64;
        ul_rssi += w.ul.n_samples as f64 * w.ul.rssi_dbm as f64;
        ul_sinr += w.ul.n_samples as f64 * w.ul.sinr_db as f64;

        snapshot.deadline_misses += w.deadline_misses;
        snapshot.process_failures += w.process_failures;
    }

    snapshot.dl = DlMetrics {
        n_samples: dl_weight,
        mcs: weighted(dl_mcs, dl_weight),
    };
    snapshot.ul = UlMetrics {
        n_samples: ul_weight,
        mcs: weighted(ul_mcs, ul_weight),
        rssi_dbm: weighted(ul_rssi, ul_weight),
        sinr_db: weighted(ul_sinr, ul_weight),
    };
    snapshot
}

fn weighted(sum: f64, weight: u64) -> f32 {
    if weight > 0 {
        (sum / weight as f64) as f32
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(ul_n: u64, rssi: f32) -> WorkerMetrics {
        WorkerMetrics {
            ul: UlMetrics {
                n_samples: ul_n,
                rssi_dbm: rssi,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_weighted_average_identity() {
        // Aggregate must equal sum(v_i * w_i) / sum(w_i).
        let workers = [worker(10, -90.0), worker(30, -100.0), worker(0, -50.0)];
        let folded = fold_workers(&workers);
        let expected = (10.0 * -90.0 + 30.0 * -100.0) / 40.0;
        assert!((folded.ul.rssi_dbm - expected as f32).abs() < 1e-4);
        assert_eq!(folded.ul.n_samples, 40);
    }

    #[test]
    fn test_zero_weight_reports_zero() {
        let workers = [worker(0, -90.0), worker(0, -100.0)];
        let folded = fold_workers(&workers);
        assert_eq!(folded.ul.rssi_dbm, 0.0);
        assert_eq!(folded.dl.mcs, 0.0);
        assert!(folded.ul.rssi_dbm.is_finite());
    }

    #[test]
    fn test_counters_are_summed() {
        let mut a = worker(1, 0.0);
        a.deadline_misses = 2;
        let mut b = worker(1, 0.0);
        b.deadline_misses = 3;
        b.process_failures = 1;
        let folded = fold_workers(&[a, b]);
        assert_eq!(folded.deadline_misses, 5);
        assert_eq!(folded.process_failures, 1);
    }

    #[test]
    fn test_accumulator_means_and_reset() {
        let mut accum = WorkerMetricsAccum::default();
        accum.record(&SlotMeasurements {
            ul_rssi_dbm: Some(-80.0),
            ul_sinr_db: Some(10.0),
            ..Default::default()
        });
        accum.record(&SlotMeasurements {
            ul_rssi_dbm: Some(-100.0),
            ul_sinr_db: Some(20.0),
            ..Default::default()
        });
        accum.record_deadline_miss();

        let sample = accum.take();
        assert_eq!(sample.ul.n_samples, 2);
        assert!((sample.ul.rssi_dbm + 90.0).abs() < 1e-4);
        assert!((sample.ul.sinr_db - 15.0).abs() < 1e-4);
        assert_eq!(sample.deadline_misses, 1);

        // Drained: the next period starts from zero.
        let empty = accum.take();
        assert_eq!(empty.ul.n_samples, 0);
        assert_eq!(empty.ul.rssi_dbm, 0.0);
    }

    #[test]
    fn test_unmeasured_slot_carries_no_weight() {
        let mut accum = WorkerMetricsAccum::default();
        accum.record(&SlotMeasurements::default());
        let sample = accum.take();
        assert_eq!(sample.dl.n_samples, 0);
        assert_eq!(sample.ul.n_samples, 0);
    }
}
