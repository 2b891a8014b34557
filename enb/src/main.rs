//! Ferrite eNodeB Main Application
//!
//! Wires the PHY engine to a loopback radio and a logging stack adapter.
//! Without hardware attached this runs the full real-time pipeline against
//! an idle uplink, periodically injecting a random-access preamble so the
//! detection path is visible in the logs.

mod config;

use anyhow::Result;
use clap::Parser;
use common::types::Rnti;
use interfaces::loopback::LoopbackRadio;
use interfaces::metrics::PhyMetrics;
use interfaces::stack::StackInterface;
use phy::prach::generate_preamble;
use phy::ue_db::UeConfig;
use phy::{Phy, PipelineProcessors};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Ferrite eNodeB PHY engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run for this many seconds, then shut down (runs until ctrl-c if
    /// omitted)
    #[arg(long)]
    duration_s: Option<u64>,

    /// Seconds between demo preamble injections (0 disables)
    #[arg(long, default_value = "1")]
    inject_period_s: u64,
}

/// Stack adapter that reports PHY events through the log.
struct LogStack;

impl StackInterface for LogStack {
    fn on_preamble_detected(&self, carrier: usize, preamble_index: u8, offset_us: f32) {
        info!(carrier, preamble_index, offset_us, "random access preamble detected");
    }

    fn on_connection_removed(&self, rnti: Rnti) {
        info!(%rnti, "connection removed");
    }

    fn on_metrics_ready(&self, metrics: &PhyMetrics) {
        info!(
            connections = metrics.connections,
            ul_slots = metrics.ul.n_samples,
            ul_rssi_dbm = metrics.ul.rssi_dbm,
            deadline_misses = metrics.deadline_misses,
            dropped_slots = metrics.dropped_slots,
            fetch_failures = metrics.fetch_failures,
            prach_detections = metrics.prach.detections,
            prach_dropped = metrics.prach.dropped_windows,
            "metrics snapshot"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!("starting Ferrite eNodeB");

    let enb_cfg = match &args.config {
        Some(path) => {
            info!(config = %path.display(), "loading configuration file");
            config::EnbConfig::load(path)?
        }
        None => {
            info!("no configuration file given, using defaults");
            config::EnbConfig::default()
        }
    };
    let (phy_args, phy_cfg) = enb_cfg.to_phy()?;

    for (cc, carrier) in phy_cfg.carriers.iter().enumerate() {
        info!(
            carrier = cc,
            pci = carrier.pci.0,
            nof_prb = carrier.nof_prb,
            dl_freq_mhz = carrier.dl_freq_hz / 1e6,
            "carrier configured"
        );
    }

    let slot_period = Duration::from_micros(phy_args.slot_period_us);
    let radio = Arc::new(LoopbackRadio::new(
        phy_cfg.carriers.iter().map(|c| c.samples_per_slot()).collect(),
        slot_period,
    ));

    let nof_workers = phy_args.nof_workers;
    let nof_carriers = phy_cfg.carriers.len();
    let rach = phy_cfg.rach.clone();
    let mut engine = Phy::new(
        phy_args,
        phy_cfg,
        radio.clone(),
        Arc::new(LogStack),
        PipelineProcessors::bypass(nof_workers),
    )?;

    // A demo connection so the per-slot snapshot path has state to read.
    let rnti = Rnti(0x4601);
    engine.addmod_connection(rnti, UeConfig::new(nof_carriers))?;
    info!(%rnti, "demo connection added");

    // Periodically place a preamble into the uplink so the detection path
    // exercises end to end.
    let injector = if args.inject_period_s > 0 {
        let radio = radio.clone();
        let period = Duration::from_secs(args.inject_period_s);
        Some(tokio::spawn(async move {
            let mut index = 0u8;
            loop {
                tokio::time::sleep(period).await;
                match generate_preamble(&rach, index % rach.num_preambles, 0) {
                    Ok(samples) => {
                        if !radio.inject_uplink(0, 0, samples) {
                            warn!("uplink injection queue full");
                        }
                    }
                    Err(e) => warn!(error = %e, "preamble generation failed"),
                }
                index = index.wrapping_add(1);
            }
        }))
    } else {
        None
    };

    match args.duration_s {
        Some(seconds) => {
            info!(seconds, "running for a fixed duration");
            tokio::time::sleep(Duration::from_secs(seconds)).await;
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("shutdown requested");
        }
    }

    if let Some(task) = injector {
        task.abort();
    }
    engine.stop();
    info!("eNodeB stopped");
    Ok(())
}
