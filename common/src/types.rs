//! Common Types for the eNodeB PHY Engine
//!
//! Defines fundamental identifiers and timing types used throughout the
//! processing pipelines.

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Transmission time interval number. Wraps at [`crate::TTI_MODULUS`].
pub type Tti = u32;

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// First RNTI assignable to a connected user
    pub const USER_MIN: u16 = 0x0010;
    /// Last RNTI assignable to a connected user
    pub const USER_MAX: u16 = 0xFFF3;

    /// Create a new RNTI
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }

    /// Whether this RNTI identifies a connected user (as opposed to a
    /// broadcast/paging/system identity)
    pub fn is_user(&self) -> bool {
        (Self::USER_MIN..=Self::USER_MAX).contains(&self.0)
    }
}

impl std::fmt::Display for Rnti {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Cell Identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellId(pub u16);

/// Physical Cell Identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pci(pub u16);

impl Pci {
    /// Maximum valid PCI for a legacy-numerology carrier (0-503)
    pub const MAX_LEGACY: u16 = 503;
    /// Maximum valid PCI for a next-generation carrier (0-1007)
    pub const MAX_NR: u16 = 1007;

    /// Create a new PCI with validation against the larger identity space
    pub fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX_NR {
            Some(Self(value))
        } else {
            None
        }
    }
}

/// Subcarrier spacing values in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SubcarrierSpacing {
    /// 15 kHz
    Scs15 = 15,
    /// 30 kHz
    Scs30 = 30,
    /// 60 kHz
    Scs60 = 60,
    /// 120 kHz
    Scs120 = 120,
}

impl SubcarrierSpacing {
    /// Slot duration for this spacing
    pub fn slot_duration(&self) -> Duration {
        match self {
            SubcarrierSpacing::Scs15 => Duration::from_micros(1000),
            SubcarrierSpacing::Scs30 => Duration::from_micros(500),
            SubcarrierSpacing::Scs60 => Duration::from_micros(250),
            SubcarrierSpacing::Scs120 => Duration::from_micros(125),
        }
    }

    /// Number of slots per 10 ms radio frame
    pub fn slots_per_frame(&self) -> u32 {
        match self {
            SubcarrierSpacing::Scs15 => 10,
            SubcarrierSpacing::Scs30 => 20,
            SubcarrierSpacing::Scs60 => 40,
            SubcarrierSpacing::Scs120 => 80,
        }
    }
}

/// Carrier numerology. Selects which processing pipeline a carrier belongs
/// to: the legacy pipeline runs on a fixed 1 ms subframe cadence, the
/// next-generation pipeline derives its cadence from the subcarrier spacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Numerology {
    /// Legacy carrier, 1 ms subframes, 15 kHz spacing only
    Legacy,
    /// Next-generation carrier with configurable subcarrier spacing
    Nr(SubcarrierSpacing),
}

impl Numerology {
    /// Slot period driving the pipeline's deadline accounting
    pub fn slot_period(&self) -> Duration {
        match self {
            Numerology::Legacy => Duration::from_micros(1000),
            Numerology::Nr(scs) => scs.slot_duration(),
        }
    }

    /// Number of slots per 10 ms radio frame
    pub fn slots_per_frame(&self) -> u32 {
        match self {
            Numerology::Legacy => 10,
            Numerology::Nr(scs) => scs.slots_per_frame(),
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Numerology::Legacy)
    }
}

/// Number of complex baseband samples carried per slot for a carrier of the
/// given bandwidth. The FFT size is the next power of two that fits the
/// occupied subcarriers, and a slot spans 15 FFT lengths of samples
/// including cyclic prefixes.
pub fn samples_per_slot(nof_prb: u16) -> usize {
    let fft = (nof_prb as u32 * 12).next_power_of_two() as usize;
    fft * 15
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rnti_user_range() {
        assert!(!Rnti(0x000F).is_user());
        assert!(Rnti(0x0010).is_user());
        assert!(Rnti(0x4601).is_user());
        assert!(Rnti(0xFFF3).is_user());
        assert!(!Rnti(0xFFF4).is_user());
    }

    #[test]
    fn test_pci_validation() {
        assert!(Pci::new(0).is_some());
        assert!(Pci::new(1007).is_some());
        assert!(Pci::new(1008).is_none());
    }

    #[test]
    fn test_slot_periods() {
        assert_eq!(Numerology::Legacy.slot_period(), Duration::from_millis(1));
        assert_eq!(
            Numerology::Nr(SubcarrierSpacing::Scs30).slot_period(),
            Duration::from_micros(500)
        );
        assert_eq!(Numerology::Nr(SubcarrierSpacing::Scs30).slots_per_frame(), 20);
    }

    #[test]
    fn test_samples_per_slot() {
        // 6 PRB -> 72 subcarriers -> 128 FFT -> 1920 samples
        assert_eq!(samples_per_slot(6), 1920);
        // 100 PRB -> 1200 subcarriers -> 2048 FFT -> 30720 samples
        assert_eq!(samples_per_slot(100), 30720);
    }
}
