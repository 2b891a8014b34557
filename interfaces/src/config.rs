//! Configuration Inputs
//!
//! Opaque configuration structs consumed by the PHY engine at `init`. Every
//! cross-field combination is validated here, before any thread starts; a
//! pipeline never comes up on an invalid configuration.

use common::types::{Numerology, Pci};
use common::TTI_MODULUS;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors. All of these are fatal to startup of the
/// component they concern.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid carrier configuration: {0}")]
    InvalidCarrier(String),

    #[error("invalid random-access configuration: {0}")]
    InvalidRach(String),

    #[error("invalid reference-signal configuration: {0}")]
    InvalidRefSignal(String),

    #[error("invalid pipeline arguments: {0}")]
    InvalidArgs(String),
}

/// Per-carrier cell configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarrierConfig {
    /// Physical cell identity
    pub pci: Pci,
    /// Carrier bandwidth in physical resource blocks
    pub nof_prb: u16,
    /// Numerology, selects the processing pipeline
    pub numerology: Numerology,
    /// Downlink centre frequency in Hz
    pub dl_freq_hz: f64,
    /// Uplink centre frequency in Hz
    pub ul_freq_hz: f64,
}

impl CarrierConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pci_max = if self.numerology.is_legacy() {
            Pci::MAX_LEGACY
        } else {
            Pci::MAX_NR
        };
        if self.pci.0 > pci_max {
            return Err(ConfigError::InvalidCarrier(format!(
                "PCI {} out of range for numerology (max {})",
                self.pci.0, pci_max
            )));
        }
        let prb_range = if self.numerology.is_legacy() {
            6..=100
        } else {
            11..=273
        };
        if !prb_range.contains(&self.nof_prb) {
            return Err(ConfigError::InvalidCarrier(format!(
                "{} PRB outside supported range {:?}",
                self.nof_prb, prb_range
            )));
        }
        if self.dl_freq_hz <= 0.0 || self.ul_freq_hz <= 0.0 {
            return Err(ConfigError::InvalidCarrier(
                "carrier frequencies must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Fixed per-slot buffer size for this carrier.
    pub fn samples_per_slot(&self) -> usize {
        common::types::samples_per_slot(self.nof_prb)
    }
}

/// Random-access (preamble detection) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RachConfig {
    /// Occasion pattern index into the deployment tables (0-7 supported)
    pub config_index: u8,
    /// Logical root sequence index the preamble set starts from
    pub root_seq_index: u16,
    /// Zero-correlation-zone configuration (0-15), selects the cyclic shift
    pub zero_corr_zone: u16,
    /// Frequency-domain offset of the detection window in PRB
    pub freq_offset: u16,
    /// Number of contention preambles in the cell (1-64)
    pub num_preambles: u8,
}

impl RachConfig {
    /// Number of roots in a long preamble sequence family.
    pub const MAX_ROOT_SEQUENCES: u16 = 838;

    pub fn validate(&self, nof_prb: u16) -> Result<(), ConfigError> {
        if self.config_index > 7 {
            return Err(ConfigError::InvalidRach(format!(
                "occasion configuration index {} not supported (0-7)",
                self.config_index
            )));
        }
        if self.root_seq_index >= Self::MAX_ROOT_SEQUENCES {
            return Err(ConfigError::InvalidRach(format!(
                "root sequence index {} out of range (0-{})",
                self.root_seq_index,
                Self::MAX_ROOT_SEQUENCES - 1
            )));
        }
        if self.zero_corr_zone > 15 {
            return Err(ConfigError::InvalidRach(format!(
                "zero correlation zone config {} out of range (0-15)",
                self.zero_corr_zone
            )));
        }
        if self.num_preambles == 0 || self.num_preambles > 64 {
            return Err(ConfigError::InvalidRach(format!(
                "{} preambles out of range (1-64)",
                self.num_preambles
            )));
        }
        // The detection window needs six PRB of guard at the band edge.
        if nof_prb < 6 || self.freq_offset > nof_prb - 6 {
            return Err(ConfigError::InvalidRach(format!(
                "frequency offset {} does not fit in {} PRB",
                self.freq_offset, nof_prb
            )));
        }
        Ok(())
    }
}

impl Default for RachConfig {
    fn default() -> Self {
        Self {
            config_index: 3,
            root_seq_index: 0,
            zero_corr_zone: 11,
            freq_offset: 4,
            num_preambles: 64,
        }
    }
}

/// Uplink demodulation reference-signal configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RefSignalConfig {
    /// Cyclic shift applied to the base sequence (0-7)
    pub cyclic_shift: u8,
    /// Sequence-group assignment offset (0-29)
    pub delta_ss: u8,
    /// Group hopping enabled
    pub group_hopping: bool,
    /// Sequence hopping enabled
    pub sequence_hopping: bool,
}

impl RefSignalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cyclic_shift > 7 {
            return Err(ConfigError::InvalidRefSignal(format!(
                "cyclic shift {} out of range (0-7)",
                self.cyclic_shift
            )));
        }
        if self.delta_ss > 29 {
            return Err(ConfigError::InvalidRefSignal(format!(
                "delta_ss {} out of range (0-29)",
                self.delta_ss
            )));
        }
        if self.group_hopping && self.sequence_hopping {
            return Err(ConfigError::InvalidRefSignal(
                "group hopping and sequence hopping are mutually exclusive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for RefSignalConfig {
    fn default() -> Self {
        Self {
            cyclic_shift: 0,
            delta_ss: 0,
            group_hopping: false,
            sequence_hopping: false,
        }
    }
}

/// Runtime arguments for the processing pipelines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhyArgs {
    /// Slot period in microseconds; the radio cadence must match
    pub slot_period_us: u64,
    /// Worker pool size per pipeline; also the pipelining depth
    pub nof_workers: usize,
    /// Detector threads per carrier
    pub nof_prach_threads: usize,
    /// Bounded capacity of the detector queue
    pub prach_queue_depth: usize,
    /// Largest accepted preamble timing offset in microseconds
    pub max_prach_offset_us: f32,
    /// Cadence of the periodic metrics snapshot in milliseconds
    pub metrics_period_ms: u64,
    /// Depth of the capture ring between the radio and the coordinators;
    /// 0 selects twice the worker pool size
    pub rx_ring_depth: usize,
    /// Slot counter modulus
    pub tti_modulus: u32,
}

impl PhyArgs {
    /// Upper bound on the worker pool size; keeps the pipelining depth (and
    /// with it buffered memory) within what a slot period can absorb.
    pub const MAX_WORKERS: usize = 8;

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slot_period_us == 0 {
            return Err(ConfigError::InvalidArgs(
                "slot period must be non-zero".into(),
            ));
        }
        if self.nof_workers == 0 || self.nof_workers > Self::MAX_WORKERS {
            return Err(ConfigError::InvalidArgs(format!(
                "{} workers out of range (1-{})",
                self.nof_workers,
                Self::MAX_WORKERS
            )));
        }
        if self.nof_prach_threads == 0 {
            return Err(ConfigError::InvalidArgs(
                "at least one detector thread is required".into(),
            ));
        }
        if self.prach_queue_depth == 0 {
            return Err(ConfigError::InvalidArgs(
                "detector queue depth must be non-zero".into(),
            ));
        }
        if self.max_prach_offset_us < 0.0 {
            return Err(ConfigError::InvalidArgs(
                "maximum preamble offset must be non-negative".into(),
            ));
        }
        if self.metrics_period_ms == 0 {
            return Err(ConfigError::InvalidArgs(
                "metrics period must be non-zero".into(),
            ));
        }
        if self.tti_modulus < 2 {
            return Err(ConfigError::InvalidArgs(
                "slot counter modulus must exceed 1".into(),
            ));
        }
        Ok(())
    }

    pub fn rx_ring_depth(&self) -> usize {
        if self.rx_ring_depth == 0 {
            self.nof_workers * 2
        } else {
            self.rx_ring_depth
        }
    }
}

impl Default for PhyArgs {
    fn default() -> Self {
        Self {
            slot_period_us: 1000,
            nof_workers: 3,
            nof_prach_threads: 1,
            prach_queue_depth: 8,
            max_prach_offset_us: 30.0,
            metrics_period_ms: 1000,
            rx_ring_depth: 0,
            tti_modulus: TTI_MODULUS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::SubcarrierSpacing;

    fn legacy_carrier() -> CarrierConfig {
        CarrierConfig {
            pci: Pci(42),
            nof_prb: 50,
            numerology: Numerology::Legacy,
            dl_freq_hz: 2.14e9,
            ul_freq_hz: 1.95e9,
        }
    }

    #[test]
    fn test_carrier_validation() {
        assert!(legacy_carrier().validate().is_ok());

        let mut bad_pci = legacy_carrier();
        bad_pci.pci = Pci(504);
        assert!(bad_pci.validate().is_err());

        let mut nr = legacy_carrier();
        nr.numerology = Numerology::Nr(SubcarrierSpacing::Scs30);
        nr.pci = Pci(504);
        nr.nof_prb = 106;
        assert!(nr.validate().is_ok());

        let mut bad_prb = legacy_carrier();
        bad_prb.nof_prb = 101;
        assert!(bad_prb.validate().is_err());
    }

    #[test]
    fn test_rach_validation() {
        let cfg = RachConfig::default();
        assert!(cfg.validate(50).is_ok());

        let mut bad_root = cfg.clone();
        bad_root.root_seq_index = 838;
        assert!(bad_root.validate(50).is_err());

        let mut bad_zcz = cfg.clone();
        bad_zcz.zero_corr_zone = 16;
        assert!(bad_zcz.validate(50).is_err());

        let mut bad_offset = cfg.clone();
        bad_offset.freq_offset = 45;
        assert!(bad_offset.validate(50).is_err());

        let mut no_preambles = cfg;
        no_preambles.num_preambles = 0;
        assert!(no_preambles.validate(50).is_err());
    }

    #[test]
    fn test_ref_signal_validation() {
        assert!(RefSignalConfig::default().validate().is_ok());

        let both_hopping = RefSignalConfig {
            group_hopping: true,
            sequence_hopping: true,
            ..Default::default()
        };
        assert!(both_hopping.validate().is_err());
    }

    #[test]
    fn test_args_validation() {
        assert!(PhyArgs::default().validate().is_ok());

        let mut too_many = PhyArgs::default();
        too_many.nof_workers = PhyArgs::MAX_WORKERS + 1;
        assert!(too_many.validate().is_err());

        let mut no_queue = PhyArgs::default();
        no_queue.prach_queue_depth = 0;
        assert!(no_queue.validate().is_err());
    }

    #[test]
    fn test_ring_depth_default() {
        let args = PhyArgs::default();
        assert_eq!(args.rx_ring_depth(), args.nof_workers * 2);
    }
}
