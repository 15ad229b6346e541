//! `simulate` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{info, warn};

use contracts::{DeviceId, DEVICE_ID_LEN};
use ingestion::{DeviceSimulator, SimulationReport};

use crate::cli::SimulateArgs;

/// Execute the `simulate` command
pub async fn run_simulate(args: &SimulateArgs) -> Result<()> {
    let first = DeviceId::parse_hex(&args.device_id)
        .with_context(|| format!("Invalid device id '{}': expected 16 hex chars", args.device_id))?;
    let interval = Duration::from_millis(args.interval_ms);

    info!(
        addr = %args.addr,
        devices = args.devices,
        frames_per_device = args.count,
        "Starting simulation"
    );

    let mut tasks = JoinSet::new();
    for index in 0..args.devices.max(1) {
        let simulator = DeviceSimulator::new(nth_device(&first, index));
        let addr = args.addr;
        let count = args.count;
        tasks.spawn(async move {
            let device = simulator.device_id().clone();
            (device, simulator.run(addr, count, interval).await)
        });
    }

    let mut failures = 0usize;
    while let Some(joined) = tasks.join_next().await {
        let (device, outcome) = joined.context("Simulator task panicked")?;
        match outcome {
            Ok(report) => print_report(&device, &report),
            Err(e) => {
                failures += 1;
                warn!(device_id = %device, error = %e, "Simulator failed");
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} simulated device(s) failed");
    }
    Ok(())
}

/// `first` plus `index`, carried across the id bytes big-endian
fn nth_device(first: &DeviceId, index: u16) -> DeviceId {
    let value = u64::from_be_bytes(*first.raw()).wrapping_add(u64::from(index));
    let raw: [u8; DEVICE_ID_LEN] = value.to_be_bytes();
    DeviceId::from_raw(raw)
}

fn print_report(device: &DeviceId, report: &SimulationReport) {
    println!("Device {}", device);
    println!("{}\n", report);
}
