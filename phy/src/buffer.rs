//! Capture Ring
//!
//! A fixed ring of received-slot buffers sitting between the radio capture
//! thread and the pipeline coordinators. Entries are tagged with their slot
//! number: when the producer laps a consumer the stale entry is simply
//! overwritten, and the consumer detects the recycling by tag mismatch
//! instead of reading torn data. Shared captures are handed out as `Arc`
//! clones; a slot's memory returns to the ring when the last user drops it.

use common::types::Tti;
use interfaces::radio::SlotCapture;
use std::sync::{Arc, Mutex};

enum Entry {
    Vacant,
    /// The radio produced no buffer for this slot; the failure was already
    /// accounted by the capture thread.
    Empty(Tti),
    Ready(Tti, Arc<SlotCapture>),
}

/// Outcome of a coordinator's fetch for one slot.
pub enum Checkout {
    /// The entry was recycled before this consumer got to it.
    Stale,
    /// The slot had no capture (radio fetch failure); skip silently.
    Missing,
    Ready(Arc<SlotCapture>),
}

pub struct BufferRing {
    slots: Vec<Mutex<Entry>>,
}

impl BufferRing {
    pub fn new(depth: usize) -> Self {
        assert!(depth > 0, "capture ring needs at least one slot");
        Self {
            slots: (0..depth).map(|_| Mutex::new(Entry::Vacant)).collect(),
        }
    }

    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Publish a capture for `tti`, recycling whatever occupied the entry.
    pub fn store(&self, tti: Tti, capture: Arc<SlotCapture>) {
        let mut entry = self.entry(tti);
        *entry = Entry::Ready(tti, capture);
    }

    /// Record that `tti` produced no capture.
    pub fn store_empty(&self, tti: Tti) {
        let mut entry = self.entry(tti);
        *entry = Entry::Empty(tti);
    }

    /// Fetch the capture for `tti` without consuming it; several pipelines
    /// may check out the same slot.
    pub fn checkout(&self, tti: Tti) -> Checkout {
        let entry = self.entry(tti);
        match &*entry {
            Entry::Ready(tag, capture) if *tag == tti => Checkout::Ready(capture.clone()),
            Entry::Empty(tag) if *tag == tti => Checkout::Missing,
            _ => Checkout::Stale,
        }
    }

    fn entry(&self, tti: Tti) -> std::sync::MutexGuard<'_, Entry> {
        self.slots[tti as usize % self.slots.len()]
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interfaces::radio::SampleBuffer;
    use std::time::Instant;

    fn capture(tti: Tti) -> Arc<SlotCapture> {
        Arc::new(SlotCapture {
            tti,
            timestamp: Instant::now(),
            carriers: vec![SampleBuffer::zeroed(16)],
        })
    }

    #[test]
    fn test_checkout_matches_tag() {
        let ring = BufferRing::new(4);
        ring.store(6, capture(6));
        assert!(matches!(ring.checkout(6), Checkout::Ready(_)));
        // Slot 2 shares the entry with slot 6 but the tag does not match.
        assert!(matches!(ring.checkout(2), Checkout::Stale));
    }

    #[test]
    fn test_overwrite_invalidates_lapped_slot() {
        let ring = BufferRing::new(4);
        ring.store(1, capture(1));
        ring.store(5, capture(5));
        assert!(matches!(ring.checkout(1), Checkout::Stale));
        assert!(matches!(ring.checkout(5), Checkout::Ready(_)));
    }

    #[test]
    fn test_empty_slot_reports_missing() {
        let ring = BufferRing::new(4);
        ring.store_empty(3);
        assert!(matches!(ring.checkout(3), Checkout::Missing));
    }

    #[test]
    fn test_checkout_is_shared() {
        let ring = BufferRing::new(2);
        ring.store(0, capture(0));
        let a = match ring.checkout(0) {
            Checkout::Ready(c) => c,
            _ => panic!("expected capture"),
        };
        assert!(matches!(ring.checkout(0), Checkout::Ready(_)));
        assert_eq!(a.tti, 0);
    }
}
