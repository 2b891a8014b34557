//! TOML Configuration for the eNodeB Binary
//!
//! File-facing structures with deployment-friendly field names; they map
//! into the typed `interfaces` configuration, where the real validation
//! lives.

use anyhow::{bail, Context, Result};
use common::types::{Numerology, Pci, SubcarrierSpacing};
use interfaces::config::{CarrierConfig, PhyArgs, RachConfig, RefSignalConfig};
use phy::PhyConfig;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct EnbConfig {
    #[serde(default)]
    pub phy: PhySection,
    #[serde(default)]
    pub rach: RachSection,
    #[serde(default = "default_carriers")]
    pub carrier: Vec<CarrierSection>,
    #[serde(default)]
    pub ref_signal: RefSignalSection,
}

impl Default for EnbConfig {
    fn default() -> Self {
        Self {
            phy: PhySection::default(),
            rach: RachSection::default(),
            carrier: default_carriers(),
            ref_signal: RefSignalSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PhySection {
    pub slot_period_us: u64,
    pub nof_workers: usize,
    pub nof_prach_threads: usize,
    pub prach_queue_depth: usize,
    pub max_prach_offset_us: f32,
    pub metrics_period_ms: u64,
}

impl Default for PhySection {
    fn default() -> Self {
        let args = PhyArgs::default();
        Self {
            slot_period_us: args.slot_period_us,
            nof_workers: args.nof_workers,
            nof_prach_threads: args.nof_prach_threads,
            prach_queue_depth: args.prach_queue_depth,
            max_prach_offset_us: args.max_prach_offset_us,
            metrics_period_ms: args.metrics_period_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RachSection {
    pub config_index: u8,
    pub root_seq_index: u16,
    pub zero_corr_zone: u16,
    pub freq_offset: u16,
    pub num_preambles: u8,
}

impl Default for RachSection {
    fn default() -> Self {
        let rach = RachConfig::default();
        Self {
            config_index: rach.config_index,
            root_seq_index: rach.root_seq_index,
            zero_corr_zone: rach.zero_corr_zone,
            freq_offset: rach.freq_offset,
            num_preambles: rach.num_preambles,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CarrierSection {
    pub pci: u16,
    pub nof_prb: u16,
    /// Subcarrier spacing in kHz; 15 selects the legacy pipeline
    #[serde(default = "default_scs")]
    pub scs_khz: u32,
    pub dl_freq_mhz: f64,
    pub ul_freq_mhz: f64,
}

fn default_scs() -> u32 {
    15
}

fn default_carriers() -> Vec<CarrierSection> {
    vec![CarrierSection {
        pci: 1,
        nof_prb: 50,
        scs_khz: 15,
        dl_freq_mhz: 2140.0,
        ul_freq_mhz: 1950.0,
    }]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefSignalSection {
    pub cyclic_shift: u8,
    pub delta_ss: u8,
    pub group_hopping: bool,
    pub sequence_hopping: bool,
}

impl Default for RefSignalSection {
    fn default() -> Self {
        let rs = RefSignalConfig::default();
        Self {
            cyclic_shift: rs.cyclic_shift,
            delta_ss: rs.delta_ss,
            group_hopping: rs.group_hopping,
            sequence_hopping: rs.sequence_hopping,
        }
    }
}

impl EnbConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading configuration file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Map the file representation into the typed engine configuration.
    pub fn to_phy(&self) -> Result<(PhyArgs, PhyConfig)> {
        let args = PhyArgs {
            slot_period_us: self.phy.slot_period_us,
            nof_workers: self.phy.nof_workers,
            nof_prach_threads: self.phy.nof_prach_threads,
            prach_queue_depth: self.phy.prach_queue_depth,
            max_prach_offset_us: self.phy.max_prach_offset_us,
            metrics_period_ms: self.phy.metrics_period_ms,
            ..Default::default()
        };

        let mut carriers = Vec::with_capacity(self.carrier.len());
        for section in &self.carrier {
            let pci = Pci::new(section.pci)
                .with_context(|| format!("PCI {} out of range", section.pci))?;
            let numerology = match section.scs_khz {
                15 => Numerology::Legacy,
                30 => Numerology::Nr(SubcarrierSpacing::Scs30),
                60 => Numerology::Nr(SubcarrierSpacing::Scs60),
                120 => Numerology::Nr(SubcarrierSpacing::Scs120),
                other => bail!("unsupported subcarrier spacing: {} kHz", other),
            };
            carriers.push(CarrierConfig {
                pci,
                nof_prb: section.nof_prb,
                numerology,
                dl_freq_hz: section.dl_freq_mhz * 1e6,
                ul_freq_hz: section.ul_freq_mhz * 1e6,
            });
        }

        let cfg = PhyConfig {
            carriers,
            rach: RachConfig {
                config_index: self.rach.config_index,
                root_seq_index: self.rach.root_seq_index,
                zero_corr_zone: self.rach.zero_corr_zone,
                freq_offset: self.rach.freq_offset,
                num_preambles: self.rach.num_preambles,
            },
            ref_signal: RefSignalConfig {
                cyclic_shift: self.ref_signal.cyclic_shift,
                delta_ss: self.ref_signal.delta_ss,
                group_hopping: self.ref_signal.group_hopping,
                sequence_hopping: self.ref_signal.sequence_hopping,
            },
        };
        Ok((args, cfg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_map_to_valid_engine_config() {
        let cfg = EnbConfig::default();
        let (args, phy_cfg) = cfg.to_phy().unwrap();
        assert!(args.validate().is_ok());
        assert_eq!(phy_cfg.carriers.len(), 1);
        assert!(phy_cfg.carriers[0].validate().is_ok());
    }

    #[test]
    fn test_parse_toml_sections() {
        let raw = r#"
            [phy]
            nof_workers = 4
            metrics_period_ms = 500

            [rach]
            root_seq_index = 128

            [[carrier]]
            pci = 101
            nof_prb = 100
            dl_freq_mhz = 2655.0
            ul_freq_mhz = 2535.0

            [[carrier]]
            pci = 102
            nof_prb = 106
            scs_khz = 30
            dl_freq_mhz = 3550.0
            ul_freq_mhz = 3550.0
        "#;
        let cfg: EnbConfig = toml::from_str(raw).unwrap();
        let (args, phy_cfg) = cfg.to_phy().unwrap();
        assert_eq!(args.nof_workers, 4);
        assert_eq!(phy_cfg.rach.root_seq_index, 128);
        assert_eq!(phy_cfg.carriers.len(), 2);
        assert!(phy_cfg.carriers[1].numerology == Numerology::Nr(SubcarrierSpacing::Scs30));
    }

    #[test]
    fn test_unsupported_scs_rejected() {
        let cfg = EnbConfig {
            carrier: vec![CarrierSection {
                pci: 1,
                nof_prb: 50,
                scs_khz: 240,
                dl_freq_mhz: 2140.0,
                ul_freq_mhz: 1950.0,
            }],
            ..Default::default()
        };
        assert!(cfg.to_phy().is_err());
    }
}
