//! Slot Synchronization Primitive
//!
//! Paces a pipeline coordinator to the radio capture cadence. A single
//! producer advances a wrapping slot counter once per transmission time
//! interval; a single consumer blocks until the counter moves and observes
//! the newest value. If the producer advanced more than once between waits
//! the consumer sees a gap, which it uses to account for dropped slots.
//!
//! The producer/consumer contract is enforced by construction: [`channel`]
//! returns one non-cloneable handle for each side, so concurrent producers
//! (or concurrent waiters) cannot be expressed.

use std::sync::{Arc, Condvar, Mutex};

/// Default counter modulus: 1024 frames of 10 subframes.
pub const TTI_MODULUS: u32 = 10240;

/// Wrap-aware distance from `from` to `to` in slots.
///
/// A pipeline that last consumed slot `from` and now observes `to` has
/// missed `tti_interval(from, to, modulus) - 1` slots.
pub fn tti_interval(from: u32, to: u32, modulus: u32) -> u32 {
    (to + modulus - from) % modulus
}

struct State {
    producer_cntr: u32,
    consumer_cntr: u32,
    resync: bool,
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
    modulus: u32,
}

/// Create a connected producer/consumer pair with the given counter modulus.
pub fn channel(modulus: u32) -> (TtiProducer, TtiConsumer) {
    assert!(modulus > 1, "counter modulus must exceed 1");
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            producer_cntr: 0,
            consumer_cntr: 0,
            resync: false,
        }),
        cond: Condvar::new(),
        modulus,
    });
    (
        TtiProducer {
            shared: shared.clone(),
        },
        TtiConsumer { shared },
    )
}

/// Producer side of the slot counter. Owned by the radio capture thread.
pub struct TtiProducer {
    shared: Arc<Shared>,
}

impl TtiProducer {
    /// Advance the counter by one slot and wake the consumer.
    pub fn increase(&self) {
        self.increase_by(1);
    }

    /// Advance the counter by `n` slots (mod the modulus) and wake the
    /// consumer. The consumer observes the coalesced jump as a gap.
    pub fn increase_by(&self, n: u32) {
        let mut state = lock(&self.shared.state);
        state.producer_cntr = (state.producer_cntr + n) % self.shared.modulus;
        self.shared.cond.notify_all();
    }

    /// Force the counter to an explicit value. Used when the pipeline has
    /// fallen behind real time and must jump forward to the capture clock.
    pub fn set_counter(&self, value: u32) {
        let mut state = lock(&self.shared.state);
        state.producer_cntr = value % self.shared.modulus;
        self.shared.cond.notify_all();
    }

    /// Release a blocked waiter without advancing the counter. The woken
    /// consumer observes the current counter value, which may equal one it
    /// has already seen; the counter's meaning is unchanged.
    pub fn resync(&self) {
        let mut state = lock(&self.shared.state);
        state.resync = true;
        self.shared.cond.notify_all();
    }

    /// Current counter value.
    pub fn counter(&self) -> u32 {
        lock(&self.shared.state).producer_cntr
    }

    pub fn modulus(&self) -> u32 {
        self.shared.modulus
    }
}

/// Consumer side of the slot counter. Owned by a pipeline coordinator.
pub struct TtiConsumer {
    shared: Arc<Shared>,
}

impl TtiConsumer {
    /// Block until the counter differs from the last consumed value, then
    /// return the new value. Returns immediately after a producer
    /// [`TtiProducer::resync`], in which case the returned value may have
    /// been observed before.
    pub fn wait(&mut self) -> u32 {
        let mut state = lock(&self.shared.state);
        while state.producer_cntr == state.consumer_cntr && !state.resync {
            state = self
                .shared
                .cond
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        state.resync = false;
        state.consumer_cntr = state.producer_cntr;
        state.consumer_cntr
    }

    pub fn modulus(&self) -> u32 {
        self.shared.modulus
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_wait_tracks_producer_monotonically() {
        let (prod, mut cons) = channel(TTI_MODULUS);
        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            loop {
                let value = cons.wait();
                seen.push(value);
                if value == 5 {
                    return seen;
                }
            }
        });
        for _ in 0..5 {
            prod.increase();
            thread::sleep(Duration::from_millis(2));
        }
        let seen = handle.join().unwrap();
        // Ticks the consumer was late for coalesce into gaps, but observed
        // values only ever move forward and end at the producer's value.
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*seen.last().unwrap(), 5);
    }

    #[test]
    fn test_wait_is_monotonic_and_gap_observable() {
        let (prod, mut cons) = channel(TTI_MODULUS);
        prod.increase();
        let first = cons.wait();
        assert_eq!(first, 1);

        // Producer runs ahead while the consumer is away; the next wait
        // observes the coalesced jump as a single gap.
        prod.increase_by(4);
        let second = cons.wait();
        assert_eq!(second, 5);
        assert_eq!(tti_interval(first, second, TTI_MODULUS), 4);
    }

    #[test]
    fn test_counter_wraps_at_modulus() {
        let (prod, mut cons) = channel(TTI_MODULUS);
        let initial = prod.counter();
        for _ in 0..TTI_MODULUS {
            prod.increase();
        }
        assert_eq!(prod.counter(), initial);
        // The consumer sees the counter back at its starting point, which
        // reads as "no forward progress" until the next increase.
        prod.increase();
        assert_eq!(cons.wait(), 1);
    }

    #[test]
    fn test_set_counter_jumps_forward() {
        let (prod, mut cons) = channel(TTI_MODULUS);
        prod.increase();
        assert_eq!(cons.wait(), 1);
        prod.set_counter(512);
        assert_eq!(cons.wait(), 512);
        assert_eq!(tti_interval(1, 512, TTI_MODULUS), 511);
    }

    #[test]
    fn test_resync_unblocks_without_increase() {
        let (prod, mut cons) = channel(TTI_MODULUS);
        let handle = thread::spawn(move || cons.wait());
        // Give the consumer time to block on a stale counter.
        thread::sleep(Duration::from_millis(20));
        prod.resync();
        assert_eq!(handle.join().unwrap(), 0);
        assert_eq!(prod.counter(), 0);
    }

    #[test]
    fn test_interval_wraps() {
        assert_eq!(tti_interval(10239, 0, TTI_MODULUS), 1);
        assert_eq!(tti_interval(10200, 40, TTI_MODULUS), 80);
        assert_eq!(tti_interval(5, 5, TTI_MODULUS), 0);
    }
}
