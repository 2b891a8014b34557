//! External Interfaces for the PHY Engine
//!
//! This crate defines the boundary between the real-time processing core and
//! its collaborators: the radio sample stream, the upper-layer stack, and the
//! opaque configuration inputs. Everything here is data and traits; the
//! pipelines themselves live in the `phy` crate.

pub mod config;
pub mod loopback;
pub mod metrics;
pub mod radio;
pub mod stack;

pub use config::{CarrierConfig, ConfigError, PhyArgs, RachConfig, RefSignalConfig};
pub use loopback::LoopbackRadio;
pub use metrics::{PhyMetrics, WorkerMetrics};
pub use radio::{RadioError, RadioInterface, SampleBuffer, SlotCapture};
pub use stack::StackInterface;
