//! Shared Connection State
//!
//! Single source of truth for per-connection configuration, read by every
//! worker once per slot and mutated by the control plane from foreign
//! threads. Configurations are immutable `Arc` snapshots replaced wholesale
//! on update, so a worker's view never tears mid-slot. Removal is deferred:
//! a connection marked for release stays readable until the pipelining depth
//! worth of slots has drained past it, then its state is reclaimed at a slot
//! boundary.

use crate::PhyError;
use common::tti_sync::tti_interval;
use common::types::{Rnti, Tti};
use interfaces::config::RefSignalConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Per-connection configuration, replaced atomically on every update.
#[derive(Debug, Clone)]
pub struct UeConfig {
    pub ref_signal: RefSignalConfig,
    /// Activation flag per carrier; index 0 is the primary carrier.
    pub carrier_active: Vec<bool>,
}

impl UeConfig {
    /// A fresh configuration with only the primary carrier active.
    pub fn new(nof_carriers: usize) -> Self {
        let mut carrier_active = vec![false; nof_carriers.max(1)];
        carrier_active[0] = true;
        Self {
            ref_signal: RefSignalConfig::default(),
            carrier_active,
        }
    }
}

/// An uplink resource grant pending for a specific slot.
#[derive(Debug, Clone, Copy)]
pub struct ResourceGrant {
    pub tti: Tti,
    pub carrier: usize,
    pub nof_prb: u16,
    pub mcs: u8,
}

/// What a worker sees of one connection during one slot.
#[derive(Debug)]
pub struct ConnectionSnapshot {
    pub rnti: Rnti,
    pub config: std::sync::Arc<UeConfig>,
    pub grants: Vec<ResourceGrant>,
}

pub struct UeDb {
    nof_carriers: usize,
    modulus: u32,
    /// Slots a removal waits before reclaiming; the worker pool size.
    grace_slots: u32,
    conns: RwLock<HashMap<Rnti, std::sync::Arc<UeConfig>>>,
    grants: Mutex<HashMap<Rnti, Vec<ResourceGrant>>>,
    pending_removal: Mutex<Vec<(Rnti, Tti)>>,
    last_tti: AtomicU32,
}

impl UeDb {
    pub fn new(nof_carriers: usize, grace_slots: u32, modulus: u32) -> Self {
        Self {
            nof_carriers,
            modulus,
            grace_slots,
            conns: RwLock::new(HashMap::new()),
            grants: Mutex::new(HashMap::new()),
            pending_removal: Mutex::new(Vec::new()),
            last_tti: AtomicU32::new(0),
        }
    }

    /// Insert or replace a connection's configuration. Readers observe the
    /// old or the new configuration in full, never a mix.
    pub fn addmod(&self, rnti: Rnti, mut config: UeConfig) -> Result<(), PhyError> {
        if config.carrier_active.len() != self.nof_carriers {
            return Err(PhyError::CarrierOutOfRange(config.carrier_active.len()));
        }
        config.ref_signal.validate()?;
        if !config.carrier_active[0] {
            warn!(%rnti, "primary carrier forced active on addmod");
            config.carrier_active[0] = true;
        }
        // A re-added connection is no longer pending removal.
        self.pending_removal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(r, _)| *r != rnti);
        self.write_conns().insert(rnti, std::sync::Arc::new(config));
        Ok(())
    }

    /// Toggle a secondary carrier. The primary carrier (index 0) cannot be
    /// deactivated through this path.
    pub fn activate_deactivate_carrier(
        &self,
        rnti: Rnti,
        carrier: usize,
        active: bool,
    ) -> Result<(), PhyError> {
        if carrier == 0 && !active {
            return Err(PhyError::PrimaryCarrier);
        }
        if carrier >= self.nof_carriers {
            return Err(PhyError::CarrierOutOfRange(carrier));
        }
        let mut conns = self.write_conns();
        let current = conns.get(&rnti).ok_or(PhyError::UnknownConnection(rnti))?;
        let mut updated = UeConfig::clone(current);
        updated.carrier_active[carrier] = active;
        conns.insert(rnti, std::sync::Arc::new(updated));
        Ok(())
    }

    /// Mark a connection for removal. State is reclaimed only after the
    /// grace period has drained every in-flight slot that may reference it.
    pub fn remove(&self, rnti: Rnti) -> Result<(), PhyError> {
        if !self.read_conns().contains_key(&rnti) {
            return Err(PhyError::UnknownConnection(rnti));
        }
        let marked_at = self.last_tti.load(Ordering::Acquire);
        let mut pending = self
            .pending_removal
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if !pending.iter().any(|(r, _)| *r == rnti) {
            pending.push((rnti, marked_at));
        }
        Ok(())
    }

    /// Queue an uplink grant; the owning pipeline consumes it at its slot.
    pub fn set_grant(&self, rnti: Rnti, grant: ResourceGrant) -> Result<(), PhyError> {
        if grant.carrier >= self.nof_carriers {
            return Err(PhyError::CarrierOutOfRange(grant.carrier));
        }
        if !self.read_conns().contains_key(&rnti) {
            return Err(PhyError::UnknownConnection(rnti));
        }
        self.grants
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(rnti)
            .or_default()
            .push(grant);
        Ok(())
    }

    /// Read one connection's configuration; the returned snapshot is stable
    /// for as long as the caller holds it.
    pub fn read(&self, rnti: Rnti) -> Option<std::sync::Arc<UeConfig>> {
        self.read_conns().get(&rnti).cloned()
    }

    /// Per-slot view for a worker: every connection, with the grants due on
    /// this slot for the given carriers taken out of the pending set.
    pub fn slot_snapshot(&self, tti: Tti, carriers: &[usize]) -> Vec<ConnectionSnapshot> {
        let conns = self.read_conns();
        let mut grants = self.grants.lock().unwrap_or_else(|e| e.into_inner());
        conns
            .iter()
            .map(|(rnti, config)| {
                let due = match grants.get_mut(rnti) {
                    Some(pending) => {
                        let mut due = Vec::new();
                        pending.retain(|g| {
                            if g.tti == tti && carriers.contains(&g.carrier) {
                                due.push(*g);
                                return false;
                            }
                            // A grant whose slot already passed will never be
                            // served; drop it.
                            let age = tti_interval(g.tti, tti, self.modulus);
                            !(age > 0 && age < self.modulus / 2)
                        });
                        due
                    }
                    None => Vec::new(),
                };
                ConnectionSnapshot {
                    rnti: *rnti,
                    config: config.clone(),
                    grants: due,
                }
            })
            .collect()
    }

    /// Advance the removal clock to `tti` and reclaim every marked
    /// connection whose grace period has elapsed. Called once per slot by
    /// the capture thread; returns the reclaimed identifiers so the caller
    /// can notify the stack.
    pub fn advance_slot(&self, tti: Tti) -> Vec<Rnti> {
        self.last_tti.store(tti, Ordering::Release);
        let mut pending = self
            .pending_removal
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let mut reclaimed = Vec::new();
        pending.retain(|(rnti, marked_at)| {
            if tti_interval(*marked_at, tti, self.modulus) > self.grace_slots {
                reclaimed.push(*rnti);
                false
            } else {
                true
            }
        });
        drop(pending);

        if !reclaimed.is_empty() {
            let mut conns = self.write_conns();
            let mut grants = self.grants.lock().unwrap_or_else(|e| e.into_inner());
            for rnti in &reclaimed {
                conns.remove(rnti);
                grants.remove(rnti);
                debug!(rnti = %rnti, "connection state reclaimed");
            }
        }
        reclaimed
    }

    pub fn len(&self) -> usize {
        self.read_conns().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_conns().is_empty()
    }

    fn read_conns(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<Rnti, std::sync::Arc<UeConfig>>> {
        self.conns.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_conns(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<Rnti, std::sync::Arc<UeConfig>>> {
        self.conns.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::TTI_MODULUS;
    use std::sync::Arc;
    use std::thread;

    const RNTI: Rnti = Rnti(0x4601);

    fn db() -> UeDb {
        UeDb::new(2, 3, TTI_MODULUS)
    }

    fn config_with_shift(shift: u8) -> UeConfig {
        let mut cfg = UeConfig::new(2);
        cfg.ref_signal.cyclic_shift = shift;
        cfg
    }

    #[test]
    fn test_addmod_and_read() {
        let db = db();
        db.addmod(RNTI, config_with_shift(1)).unwrap();
        assert_eq!(db.read(RNTI).unwrap().ref_signal.cyclic_shift, 1);
        db.addmod(RNTI, config_with_shift(5)).unwrap();
        assert_eq!(db.read(RNTI).unwrap().ref_signal.cyclic_shift, 5);
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn test_snapshot_never_tears() {
        let db = Arc::new(db());
        db.addmod(RNTI, config_with_shift(0)).unwrap();

        let writer = {
            let db = db.clone();
            thread::spawn(move || {
                for i in 0..500u16 {
                    let mut cfg = config_with_shift((i % 8) as u8);
                    cfg.ref_signal.delta_ss = (i % 8) as u8;
                    db.addmod(RNTI, cfg).unwrap();
                }
            })
        };
        let reader = {
            let db = db.clone();
            thread::spawn(move || {
                for _ in 0..500 {
                    let snap = db.read(RNTI).unwrap();
                    // Both fields were written together; a torn view would
                    // disagree.
                    assert_eq!(snap.ref_signal.cyclic_shift, snap.ref_signal.delta_ss);
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();
    }

    #[test]
    fn test_primary_carrier_protected() {
        let db = db();
        db.addmod(RNTI, UeConfig::new(2)).unwrap();
        assert!(matches!(
            db.activate_deactivate_carrier(RNTI, 0, false),
            Err(PhyError::PrimaryCarrier)
        ));
        db.activate_deactivate_carrier(RNTI, 1, true).unwrap();
        assert!(db.read(RNTI).unwrap().carrier_active[1]);
        db.activate_deactivate_carrier(RNTI, 1, false).unwrap();
        assert!(!db.read(RNTI).unwrap().carrier_active[1]);
    }

    #[test]
    fn test_removal_is_deferred_by_grace_period() {
        let db = db();
        db.advance_slot(100);
        db.addmod(RNTI, UeConfig::new(2)).unwrap();
        db.remove(RNTI).unwrap();

        // Still readable while slots drain.
        assert!(db.advance_slot(101).is_empty());
        assert!(db.read(RNTI).is_some());
        assert!(db.advance_slot(103).is_empty());

        // Grace of 3 slots elapsed: reclaimed at the next boundary.
        let reclaimed = db.advance_slot(104);
        assert_eq!(reclaimed, vec![RNTI]);
        assert!(db.read(RNTI).is_none());
    }

    #[test]
    fn test_readd_cancels_pending_removal() {
        let db = db();
        db.advance_slot(10);
        db.addmod(RNTI, UeConfig::new(2)).unwrap();
        db.remove(RNTI).unwrap();
        db.addmod(RNTI, UeConfig::new(2)).unwrap();
        assert!(db.advance_slot(200).is_empty());
        assert!(db.read(RNTI).is_some());
    }

    #[test]
    fn test_grants_delivered_once_on_their_slot() {
        let db = db();
        db.addmod(RNTI, UeConfig::new(2)).unwrap();
        db.set_grant(
            RNTI,
            ResourceGrant {
                tti: 7,
                carrier: 0,
                nof_prb: 25,
                mcs: 16,
            },
        )
        .unwrap();

        // Not due yet.
        let early = db.slot_snapshot(6, &[0]);
        assert!(early[0].grants.is_empty());

        let due = db.slot_snapshot(7, &[0]);
        assert_eq!(due[0].grants.len(), 1);
        assert_eq!(due[0].grants[0].mcs, 16);

        // Consumed: a second read of the same slot sees nothing.
        let again = db.slot_snapshot(7, &[0]);
        assert!(again[0].grants.is_empty());
    }

    #[test]
    fn test_unknown_connection_is_an_error() {
        let db = db();
        assert!(matches!(db.remove(RNTI), Err(PhyError::UnknownConnection(_))));
        assert!(matches!(
            db.activate_deactivate_carrier(RNTI, 1, true),
            Err(PhyError::UnknownConnection(_))
        ));
    }
}
