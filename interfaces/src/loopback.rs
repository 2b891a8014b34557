//! Loopback Radio
//!
//! A channel-backed [`RadioInterface`] with no hardware behind it. `pull`
//! paces itself to the slot period and returns idle buffers unless uplink
//! samples have been injected; `push` lands in a bounded queue a test or the
//! demo binary can drain. Overflowing transmit buffers are dropped, matching
//! a hardware sink's late-buffer policy.

use crate::radio::{RadioError, RadioInterface, SampleBuffer, SlotCapture};
use common::types::Tti;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use num_complex::Complex32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Uplink samples to embed into an upcoming capture.
#[derive(Debug)]
pub struct Injection {
    pub carrier: usize,
    /// Sample offset inside the slot buffer
    pub offset: usize,
    pub samples: Vec<Complex32>,
}

/// A transmit buffer accepted by the sink.
#[derive(Debug)]
pub struct TxSlot {
    pub tti: Tti,
    pub carrier: usize,
    pub buffer: SampleBuffer,
    pub at: Instant,
}

struct Pace {
    next_slot: Option<Instant>,
}

pub struct LoopbackRadio {
    carrier_samples: Vec<usize>,
    period: Duration,
    pace: Mutex<Pace>,
    inject_tx: Sender<Injection>,
    inject_rx: Receiver<Injection>,
    tx_tx: Sender<TxSlot>,
    tx_rx: Receiver<TxSlot>,
    pending_faults: AtomicU64,
    tx_dropped: AtomicU64,
}

impl LoopbackRadio {
    /// `carrier_samples` fixes the per-slot buffer size of each carrier.
    pub fn new(carrier_samples: Vec<usize>, period: Duration) -> Self {
        let (inject_tx, inject_rx) = bounded(64);
        let (tx_tx, tx_rx) = bounded(256);
        Self {
            carrier_samples,
            period,
            pace: Mutex::new(Pace { next_slot: None }),
            inject_tx,
            inject_rx,
            tx_tx,
            tx_rx,
            pending_faults: AtomicU64::new(0),
            tx_dropped: AtomicU64::new(0),
        }
    }

    /// Queue uplink samples for the next capture. Returns false if the
    /// injection queue is full.
    pub fn inject_uplink(&self, carrier: usize, offset: usize, samples: Vec<Complex32>) -> bool {
        self.inject_tx
            .try_send(Injection {
                carrier,
                offset,
                samples,
            })
            .is_ok()
    }

    /// Make the next `slots` calls to `pull` fail with a timeout.
    pub fn inject_fault(&self, slots: u64) {
        self.pending_faults.fetch_add(slots, Ordering::Relaxed);
    }

    /// Receiver for everything pushed towards the antenna.
    pub fn tx_receiver(&self) -> Receiver<TxSlot> {
        self.tx_rx.clone()
    }

    /// Transmit buffers discarded because the sink queue was full.
    pub fn tx_dropped(&self) -> u64 {
        self.tx_dropped.load(Ordering::Relaxed)
    }
}

impl RadioInterface for LoopbackRadio {
    fn pull(&self, tti: Tti) -> Result<SlotCapture, RadioError> {
        let mut pace = self.pace.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let slot_time = match pace.next_slot {
            Some(at) => at,
            None => now,
        };
        if slot_time > now {
            std::thread::sleep(slot_time - now);
        }
        pace.next_slot = Some(slot_time.max(now) + self.period);
        drop(pace);

        if self.pending_faults.load(Ordering::Relaxed) > 0 {
            self.pending_faults.fetch_sub(1, Ordering::Relaxed);
            return Err(RadioError::Timeout);
        }

        let mut carriers: Vec<SampleBuffer> = self
            .carrier_samples
            .iter()
            .map(|&len| SampleBuffer::zeroed(len))
            .collect();
        while let Ok(injection) = self.inject_rx.try_recv() {
            match carriers.get_mut(injection.carrier) {
                Some(buffer) => buffer.write_at(injection.offset, &injection.samples),
                None => debug!(carrier = injection.carrier, "injection for unknown carrier"),
            }
        }

        Ok(SlotCapture {
            tti,
            timestamp: Instant::now(),
            carriers,
        })
    }

    fn push(
        &self,
        tti: Tti,
        carrier: usize,
        buffer: SampleBuffer,
        at: Instant,
    ) -> Result<(), RadioError> {
        match self.tx_tx.try_send(TxSlot {
            tti,
            carrier,
            buffer,
            at,
        }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                // Sink policy: a buffer nobody drains in time is dropped.
                self.tx_dropped.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(RadioError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn radio() -> LoopbackRadio {
        LoopbackRadio::new(vec![64], Duration::from_micros(100))
    }

    #[test]
    fn test_pull_carries_injected_samples() {
        let r = radio();
        assert!(r.inject_uplink(0, 4, vec![Complex32::new(1.0, 1.0); 2]));
        let capture = r.pull(7).unwrap();
        assert_eq!(capture.tti, 7);
        assert_eq!(capture.carriers[0].as_slice()[4], Complex32::new(1.0, 1.0));
        assert_eq!(capture.carriers[0].as_slice()[3], Complex32::new(0.0, 0.0));
    }

    #[test]
    fn test_fault_injection_times_out() {
        let r = radio();
        r.inject_fault(2);
        assert!(matches!(r.pull(0), Err(RadioError::Timeout)));
        assert!(matches!(r.pull(1), Err(RadioError::Timeout)));
        assert!(r.pull(2).is_ok());
    }

    #[test]
    fn test_push_roundtrip() {
        let r = radio();
        let rx = r.tx_receiver();
        r.push(3, 0, SampleBuffer::zeroed(64), Instant::now()).unwrap();
        let tx = rx.try_recv().unwrap();
        assert_eq!(tx.tti, 3);
        assert_eq!(tx.buffer.len(), 64);
    }
}
