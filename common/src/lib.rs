//! Common Types and Primitives
//!
//! This crate provides the fundamental types shared across the eNodeB PHY
//! engine, along with the slot synchronization primitive that paces the
//! real-time pipelines.

pub mod tti_sync;
pub mod types;

// Re-export commonly used items
pub use tti_sync::{tti_interval, TtiConsumer, TtiProducer, TTI_MODULUS};
pub use types::*;
