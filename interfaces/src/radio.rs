//! Radio Source/Sink Abstraction
//!
//! The PHY engine consumes timestamped sample buffers from a radio front-end
//! and pushes transmit buffers back with an absolute deadline. The concrete
//! transport (hardware driver, channel emulator) lives behind
//! [`RadioInterface`]; the pipelines only see fixed-size buffers.

use common::types::Tti;
use num_complex::Complex32;
use std::time::Instant;
use thiserror::Error;

/// A fixed-capacity buffer of complex baseband samples for one carrier.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    samples: Vec<Complex32>,
}

impl SampleBuffer {
    /// Allocate a zeroed buffer of `len` samples.
    pub fn zeroed(len: usize) -> Self {
        Self {
            samples: vec![Complex32::new(0.0, 0.0); len],
        }
    }

    pub fn from_samples(samples: Vec<Complex32>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn as_slice(&self) -> &[Complex32] {
        &self.samples
    }

    pub fn as_mut_slice(&mut self) -> &mut [Complex32] {
        &mut self.samples
    }

    /// Overwrite a region of the buffer, truncating at the buffer end.
    pub fn write_at(&mut self, offset: usize, data: &[Complex32]) {
        if offset >= self.samples.len() {
            return;
        }
        let n = data.len().min(self.samples.len() - offset);
        self.samples[offset..offset + n].copy_from_slice(&data[..n]);
    }

    /// Mean sample power, linear scale.
    pub fn mean_power(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.norm_sqr()).sum::<f32>() / self.samples.len() as f32
    }
}

/// One slot worth of received samples across every configured carrier.
#[derive(Debug)]
pub struct SlotCapture {
    /// Slot number the radio stamped on this capture
    pub tti: Tti,
    /// Capture time of the first sample
    pub timestamp: Instant,
    /// One receive buffer per carrier, in carrier-index order
    pub carriers: Vec<SampleBuffer>,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RadioError {
    /// No buffer became available within the slot budget. The affected slot
    /// is skipped by the caller; the stream continues at the next slot.
    #[error("no sample buffer available within the slot budget")]
    Timeout,

    /// The radio has shut down and no further buffers will be produced.
    #[error("radio stream closed")]
    Closed,
}

/// Boundary to the radio front-end.
///
/// `pull` blocks until the slot's samples are available or the slot budget
/// expires. `push` hands a transmit buffer to the sink together with the
/// absolute time it must hit the antenna; buffers arriving past the hardware
/// deadline are dropped by the sink, never retried.
pub trait RadioInterface: Send + Sync {
    fn pull(&self, tti: Tti) -> Result<SlotCapture, RadioError>;

    fn push(
        &self,
        tti: Tti,
        carrier: usize,
        buffer: SampleBuffer,
        at: Instant,
    ) -> Result<(), RadioError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_at_clamps_to_capacity() {
        let mut buf = SampleBuffer::zeroed(8);
        let tone = vec![Complex32::new(1.0, 0.0); 4];
        buf.write_at(6, &tone);
        assert_eq!(buf.as_slice()[6], Complex32::new(1.0, 0.0));
        assert_eq!(buf.as_slice()[7], Complex32::new(1.0, 0.0));
        buf.write_at(9, &tone);
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn test_mean_power() {
        let mut buf = SampleBuffer::zeroed(4);
        assert_eq!(buf.mean_power(), 0.0);
        buf.write_at(0, &[Complex32::new(2.0, 0.0)]);
        assert!((buf.mean_power() - 1.0).abs() < 1e-6);
    }
}
