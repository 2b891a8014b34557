//! Zadoff-Chu Preamble Detection
//!
//! Contention-based random-access detection over long (839-element)
//! Zadoff-Chu sequences. The cell's preamble set is derived from a starting
//! logical root index and the zero-correlation-zone configuration: each root
//! contributes `seq_len / n_cs` cyclic shifts, and consecutive roots are
//! taken until the configured number of preambles is covered.
//!
//! Detection is frequency-domain correlation at the native sequence length:
//! the received window is DFT'd once, multiplied by the conjugate spectrum
//! of each candidate root and inverse-transformed. A transmitted shift `v`
//! with timing delay `d` concentrates the correlation energy in a single
//! bin at `(d - v*n_cs) mod seq_len`, so each shift owns a disjoint search
//! window of `n_cs` bins and the peak position inside the window is the
//! delay estimate. The constant-amplitude property of the sequences keeps
//! cross-root correlation flat, which is what makes the peak-to-mean metric
//! discriminative.

use interfaces::config::{ConfigError, RachConfig};
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use tracing::{debug, trace};

/// Long preamble sequence length.
pub const SEQ_LEN: usize = 839;

/// Nominal duration of the sequence part of a long preamble, microseconds.
pub const SEQ_DURATION_US: f32 = 800.0;

/// Peak-to-mean correlation power required to declare a detection. Noise
/// peaks stay under ~9x mean for this window length; a clean preamble
/// concentrates essentially all energy in one bin.
const DETECTION_THRESHOLD: f32 = 12.0;

/// Cyclic shift in sequence samples for each zero-correlation-zone
/// configuration of the unrestricted long-preamble set.
fn zero_corr_zone_to_ncs(zero_corr_zone: u16) -> Option<usize> {
    match zero_corr_zone {
        0 => Some(0),
        1 => Some(13),
        2 => Some(15),
        3 => Some(18),
        4 => Some(22),
        5 => Some(26),
        6 => Some(32),
        7 => Some(38),
        8 => Some(46),
        9 => Some(59),
        10 => Some(76),
        11 => Some(93),
        12 => Some(119),
        13 => Some(167),
        14 => Some(279),
        15 => Some(419),
        _ => None,
    }
}

/// How the preamble set maps onto roots and cyclic shifts.
#[derive(Debug, Clone, Copy)]
struct ShiftPlan {
    ncs: usize,
    shifts_per_root: usize,
    nof_roots: usize,
}

fn shift_plan(rach: &RachConfig) -> Result<ShiftPlan, ConfigError> {
    let ncs = zero_corr_zone_to_ncs(rach.zero_corr_zone).ok_or_else(|| {
        ConfigError::InvalidRach(format!(
            "zero correlation zone config {} out of range",
            rach.zero_corr_zone
        ))
    })?;
    let shifts_per_root = if ncs == 0 { 1 } else { SEQ_LEN / ncs };
    let num_preambles = rach.num_preambles as usize;
    if num_preambles == 0 || num_preambles > 64 {
        return Err(ConfigError::InvalidRach(format!(
            "{} preambles out of range (1-64)",
            rach.num_preambles
        )));
    }
    let nof_roots = (num_preambles + shifts_per_root - 1) / shifts_per_root;
    Ok(ShiftPlan {
        ncs,
        shifts_per_root,
        nof_roots,
    })
}

/// Physical root for the `offset`-th root of a set starting at `start`.
/// Every value in 1..=838 is a valid root of the prime-length family.
fn physical_root(start: u16, offset: usize) -> u16 {
    ((start as usize + offset) % (SEQ_LEN - 1)) as u16 + 1
}

/// Base Zadoff-Chu sequence x_u(n) = exp(-j*pi*u*n*(n+1) / seq_len).
fn zc_root(u: u16) -> Vec<Complex32> {
    let n_zc = SEQ_LEN as f64;
    (0..SEQ_LEN)
        .map(|n| {
            let n = n as f64;
            let phase = -std::f64::consts::PI * u as f64 * n * (n + 1.0) / n_zc;
            Complex32::from_polar(1.0, phase as f32)
        })
        .collect()
}

/// A single detected preamble.
#[derive(Debug, Clone, Copy)]
pub struct Detection {
    /// Index into the cell's preamble set (0-63)
    pub preamble_index: u8,
    /// Estimated timing delay in sequence samples
    pub offset_samples: u32,
    /// Estimated timing delay in microseconds
    pub offset_us: f32,
    /// Peak-to-mean correlation power
    pub metric: f32,
}

pub struct ZcDetector {
    plan: ShiftPlan,
    num_preambles: usize,
    /// Forward spectra of the candidate roots
    root_spectra: Vec<Vec<Complex32>>,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
}

impl ZcDetector {
    pub fn new(rach: &RachConfig) -> Result<Self, ConfigError> {
        let plan = shift_plan(rach)?;
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(SEQ_LEN);
        let ifft = planner.plan_fft_inverse(SEQ_LEN);

        let root_spectra = (0..plan.nof_roots)
            .map(|r| {
                let mut spectrum = zc_root(physical_root(rach.root_seq_index, r));
                fft.process(&mut spectrum);
                spectrum
            })
            .collect();
        debug!(
            roots = plan.nof_roots,
            shifts_per_root = plan.shifts_per_root,
            ncs = plan.ncs,
            "preamble detector initialised"
        );

        Ok(Self {
            plan,
            num_preambles: rach.num_preambles as usize,
            root_spectra,
            fft,
            ifft,
        })
    }

    /// Search window of shift `v`: start bin and length in the correlation
    /// power array.
    fn shift_window(&self, v: usize) -> (usize, usize) {
        if self.plan.ncs == 0 {
            return (0, SEQ_LEN);
        }
        if v == 0 {
            (0, self.plan.ncs)
        } else {
            (SEQ_LEN - v * self.plan.ncs, self.plan.ncs)
        }
    }

    /// Correlate one capture window against the whole preamble set. Returns
    /// zero or more detections; a window carrying exactly one clean preamble
    /// yields exactly one.
    pub fn detect(&self, samples: &[Complex32]) -> Vec<Detection> {
        if samples.len() < SEQ_LEN {
            trace!(len = samples.len(), "window shorter than one sequence");
            return Vec::new();
        }

        let mut rx_spectrum: Vec<Complex32> = samples[..SEQ_LEN].to_vec();
        self.fft.process(&mut rx_spectrum);

        let sample_us = SEQ_DURATION_US / SEQ_LEN as f32;
        let mut detections = Vec::new();

        for (r, root) in self.root_spectra.iter().enumerate() {
            let mut corr: Vec<Complex32> = rx_spectrum
                .iter()
                .zip(root.iter())
                .map(|(y, x)| y * x.conj())
                .collect();
            self.ifft.process(&mut corr);

            let power: Vec<f32> = corr.iter().map(|c| c.norm_sqr()).collect();
            let mean = power.iter().sum::<f32>() / SEQ_LEN as f32;
            if mean <= 0.0 {
                continue;
            }

            for v in 0..self.plan.shifts_per_root {
                let preamble_index = r * self.plan.shifts_per_root + v;
                if preamble_index >= self.num_preambles {
                    break;
                }
                let (begin, len) = self.shift_window(v);
                let (peak_pos, peak) = power[begin..begin + len]
                    .iter()
                    .enumerate()
                    .fold((0usize, 0f32), |best, (i, &p)| {
                        if p > best.1 {
                            (i, p)
                        } else {
                            best
                        }
                    });
                let metric = peak / mean;
                if metric > DETECTION_THRESHOLD {
                    detections.push(Detection {
                        preamble_index: preamble_index as u8,
                        offset_samples: peak_pos as u32,
                        offset_us: peak_pos as f32 * sample_us,
                        metric,
                    });
                }
            }
        }
        detections
    }
}

/// Generate the sequence-domain window for preamble `index` received with
/// `delay_samples` of timing offset, as it appears after cyclic-prefix
/// removal. Delays must stay inside the zero correlation zone for the
/// detector to attribute them to the right shift.
pub fn generate_preamble(
    rach: &RachConfig,
    index: u8,
    delay_samples: usize,
) -> Result<Vec<Complex32>, ConfigError> {
    let plan = shift_plan(rach)?;
    if index as usize >= rach.num_preambles as usize {
        return Err(ConfigError::InvalidRach(format!(
            "preamble index {} outside the configured set of {}",
            index, rach.num_preambles
        )));
    }
    let r = index as usize / plan.shifts_per_root;
    let v = index as usize % plan.shifts_per_root;
    let shift = v * plan.ncs;
    let delay = delay_samples % SEQ_LEN;

    let root = zc_root(physical_root(rach.root_seq_index, r));
    Ok((0..SEQ_LEN)
        .map(|n| root[(n + shift + SEQ_LEN - delay) % SEQ_LEN])
        .collect())
}
