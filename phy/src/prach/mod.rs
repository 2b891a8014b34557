//! Preamble Detector Pool
//!
//! Random-access detection runs outside the slot cadence: the coordinator
//! clones the relevant part of a capture into a [`CaptureWindow`] and hands
//! it to a bounded queue; a small set of detector threads drains the queue
//! and reports hits to the stack. Detection is best-effort — when the queue
//! is full the window is dropped and counted rather than stalling the main
//! pipeline, and reports across windows carry no ordering guarantee. Each
//! window is consumed by exactly one thread.

pub mod detector;

pub use detector::{generate_preamble, Detection, ZcDetector, SEQ_LEN};

use crate::PhyError;
use common::types::Tti;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use interfaces::config::{CarrierConfig, RachConfig};
use interfaces::stack::StackInterface;
use num_complex::Complex32;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, trace};

/// Portion of a capture window the detector correlates over.
#[derive(Debug, Clone, Copy)]
pub struct SearchWindow {
    pub begin: usize,
    pub len: usize,
}

/// A timestamped slice of received samples queued for detection. Ownership
/// moves into the queue and is released by the detector thread that
/// consumes it.
#[derive(Debug)]
pub struct CaptureWindow {
    pub tti: Tti,
    pub carrier: usize,
    pub timestamp: Instant,
    pub samples: Vec<Complex32>,
    pub search: SearchWindow,
}

/// When within the frame structure detection windows occur.
#[derive(Debug, Clone, Copy)]
struct OccasionPattern {
    period_frames: u32,
    frame_offsets: &'static [u32],
    subframes: &'static [u32],
}

fn occasion_pattern(config_index: u8) -> Option<OccasionPattern> {
    // Deployment table for the frequency-division occasion configurations.
    let pattern = match config_index {
        0 => OccasionPattern {
            period_frames: 16,
            frame_offsets: &[1],
            subframes: &[9],
        },
        1 => OccasionPattern {
            period_frames: 8,
            frame_offsets: &[1],
            subframes: &[9],
        },
        2 => OccasionPattern {
            period_frames: 4,
            frame_offsets: &[1],
            subframes: &[9],
        },
        3 => OccasionPattern {
            period_frames: 2,
            frame_offsets: &[0],
            subframes: &[9],
        },
        4 => OccasionPattern {
            period_frames: 2,
            frame_offsets: &[1],
            subframes: &[9],
        },
        5 => OccasionPattern {
            period_frames: 2,
            frame_offsets: &[0, 1],
            subframes: &[9],
        },
        6 => OccasionPattern {
            period_frames: 1,
            frame_offsets: &[0],
            subframes: &[9],
        },
        7 => OccasionPattern {
            period_frames: 1,
            frame_offsets: &[0],
            subframes: &[8, 9],
        },
        _ => return None,
    };
    Some(pattern)
}

struct DetectorShared {
    carrier: usize,
    stack: Arc<dyn StackInterface>,
    detections: AtomicU64,
    dropped_windows: AtomicU64,
    /// f32 bits; updated by the control plane, read per window
    max_offset_us: AtomicU32,
}

/// Bounded-concurrency detection pool for one carrier.
pub struct PrachWorkerPool {
    shared: Arc<DetectorShared>,
    pattern: OccasionPattern,
    queue: Mutex<Option<Sender<CaptureWindow>>>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl PrachWorkerPool {
    pub fn new(
        carrier: usize,
        carrier_cfg: &CarrierConfig,
        rach: &RachConfig,
        stack: Arc<dyn StackInterface>,
        nof_threads: usize,
        queue_depth: usize,
        max_offset_us: f32,
    ) -> Result<Self, PhyError> {
        rach.validate(carrier_cfg.nof_prb)?;
        let pattern = occasion_pattern(rach.config_index).ok_or_else(|| {
            PhyError::Config(interfaces::config::ConfigError::InvalidRach(format!(
                "occasion configuration index {} not supported",
                rach.config_index
            )))
        })?;

        let shared = Arc::new(DetectorShared {
            carrier,
            stack,
            detections: AtomicU64::new(0),
            dropped_windows: AtomicU64::new(0),
            max_offset_us: AtomicU32::new(max_offset_us.to_bits()),
        });

        let (tx, rx) = bounded(queue_depth);
        let mut threads = Vec::with_capacity(nof_threads);
        for t in 0..nof_threads {
            let detector = ZcDetector::new(rach)?;
            let rx: Receiver<CaptureWindow> = rx.clone();
            let shared = shared.clone();
            let handle = thread::Builder::new()
                .name(format!("prach-{carrier}-{t}"))
                .spawn(move || detector_loop(detector, rx, shared))
                .map_err(|e| PhyError::Spawn(e.to_string()))?;
            threads.push(handle);
        }

        info!(
            carrier,
            threads = nof_threads,
            queue_depth,
            "preamble detector pool started"
        );
        Ok(Self {
            shared,
            pattern,
            queue: Mutex::new(Some(tx)),
            threads: Mutex::new(threads),
        })
    }

    /// Whether `tti` carries a detection occasion for this carrier.
    pub fn is_occasion(&self, tti: Tti) -> bool {
        let frame = tti / 10;
        let subframe = tti % 10;
        self.pattern
            .frame_offsets
            .contains(&(frame % self.pattern.period_frames))
            && self.pattern.subframes.contains(&subframe)
    }

    /// Bound the searched timing uncertainty. Detections beyond the bound
    /// are discarded before they reach the stack.
    pub fn set_max_offset_us(&self, us: f32) {
        self.shared
            .max_offset_us
            .store(us.to_bits(), Ordering::Relaxed);
    }

    /// Enqueue a window for detection. Returns false when the window was
    /// dropped: a full queue means the detectors are saturated and stalling
    /// the submitter would eat into the slot budget, so the window is
    /// counted and discarded.
    pub fn submit(&self, window: CaptureWindow) -> bool {
        let queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = queue.as_ref() else {
            return false;
        };
        match tx.try_send(window) {
            Ok(()) => true,
            Err(TrySendError::Full(w)) => {
                self.shared.dropped_windows.fetch_add(1, Ordering::Relaxed);
                debug!(tti = w.tti, carrier = w.carrier, "detector queue full, window dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Drain the pool's counters for one metrics period.
    pub fn take_counters(&self) -> (u64, u64) {
        (
            self.shared.detections.swap(0, Ordering::Relaxed),
            self.shared.dropped_windows.swap(0, Ordering::Relaxed),
        )
    }

    /// Close the queue and join the detector threads. Windows already
    /// queued are still processed. Idempotent.
    pub fn stop(&self) {
        let closed = {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.take().is_some()
        };
        if !closed {
            return;
        }
        let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
        info!(carrier = self.shared.carrier, "preamble detector pool stopped");
    }

    #[cfg(test)]
    fn new_detached(
        rach: &RachConfig,
        stack: Arc<dyn StackInterface>,
        queue_depth: usize,
    ) -> (Self, Receiver<CaptureWindow>) {
        let (tx, rx) = bounded(queue_depth);
        let pool = Self {
            shared: Arc::new(DetectorShared {
                carrier: 0,
                stack,
                detections: AtomicU64::new(0),
                dropped_windows: AtomicU64::new(0),
                max_offset_us: AtomicU32::new(1000f32.to_bits()),
            }),
            pattern: occasion_pattern(rach.config_index).unwrap(),
            queue: Mutex::new(Some(tx)),
            threads: Mutex::new(Vec::new()),
        };
        (pool, rx)
    }
}

impl Drop for PrachWorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn detector_loop(detector: ZcDetector, rx: Receiver<CaptureWindow>, shared: Arc<DetectorShared>) {
    while let Ok(window) = rx.recv() {
        let begin = window.search.begin.min(window.samples.len());
        let end = (begin + window.search.len).min(window.samples.len());
        let detections = detector.detect(&window.samples[begin..end]);

        let max_offset_us = f32::from_bits(shared.max_offset_us.load(Ordering::Relaxed));
        for d in detections {
            if d.offset_us > max_offset_us {
                trace!(
                    tti = window.tti,
                    preamble = d.preamble_index,
                    offset_us = d.offset_us,
                    "detection beyond search bound discarded"
                );
                continue;
            }
            shared.detections.fetch_add(1, Ordering::Relaxed);
            debug!(
                tti = window.tti,
                carrier = shared.carrier,
                preamble = d.preamble_index,
                offset_us = d.offset_us,
                metric = d.metric,
                "preamble detected"
            );
            shared
                .stack
                .on_preamble_detected(shared.carrier, d.preamble_index, d.offset_us);
        }
    }
}
