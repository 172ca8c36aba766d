//! forecourtd: forecourt controller daemon
//!
//! Resolves configuration from the environment, opens the two-wire bus
//! (or a simulated one in demo mode), runs discovery, starts the status
//! monitor, and polls until ctrl-c.

mod settings;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use forecourt_core::manager::PumpManager;
use forecourt_core::protocol::{serial, PumpAddress, PumpStatus, SerialTransport, Transport};
use forecourt_core::sim::{SimHandle, SimulatedBus, SimulatedPump};

use settings::Settings;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = Settings::from_env()?;
    info!(demo = settings.demo_mode, "forecourtd starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(settings.config.max_workers)
        .enable_all()
        .build()
        .context("failed to build async runtime")?;

    runtime.block_on(run(settings))
}

async fn run(settings: Settings) -> Result<()> {
    let (transport, demo) = if settings.demo_mode {
        let (bus, handle) = demo_bus();
        (Box::new(bus) as Box<dyn Transport>, Some(handle))
    } else {
        (open_bus(&settings)?, None)
    };

    if let Some(handle) = demo {
        tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();
            let mut ticker = tokio::time::interval(Duration::from_secs(2));
            loop {
                ticker.tick().await;
                handle.advance(&mut rng);
            }
        });
    }

    let manager = PumpManager::new(transport, settings.config);

    match manager.trigger_discovery().await {
        Ok(found) if found.is_empty() => warn!("no pumps answered the discovery scan"),
        Ok(found) => {
            let addresses: Vec<String> = found.iter().map(|a| a.to_string()).collect();
            info!(pumps = %addresses.join(","), "discovery complete");
        }
        Err(err) => bail!("discovery failed: {err}"),
    }

    manager.start_monitor().await;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");
    manager.stop_monitor().await;

    let summary = serde_json::to_string(&manager.list_devices())?;
    info!(devices = %summary, "final device state");
    Ok(())
}

/// Four idle pumps for demo installations.
fn demo_bus() -> (SimulatedBus, SimHandle) {
    let pumps = (1..=4)
        .map(|n| SimulatedPump::new(PumpAddress::new(n).expect("static address"), PumpStatus::Idle))
        .collect();
    SimulatedBus::new(pumps)
}

/// Open the first usable serial port. An explicit `COM_PORT` list narrows
/// the candidates; otherwise every detected port is tried in order.
fn open_bus(settings: &Settings) -> Result<Box<dyn Transport>> {
    let candidates: Vec<String> = if settings.config.com_ports.is_empty() {
        serial::list_ports().into_iter().map(|p| p.name).collect()
    } else {
        settings.config.com_ports.clone()
    };

    if candidates.is_empty() {
        bail!("no serial ports detected and COM_PORT is not set");
    }

    for name in &candidates {
        match SerialTransport::open(
            name,
            settings.config.baud_rate,
            settings.config.write_timeout(),
        ) {
            Ok(transport) => {
                info!(port = %name, "bus opened");
                return Ok(Box::new(transport));
            }
            Err(err) => warn!(port = %name, error = %err, "failed to open port"),
        }
    }
    bail!("none of the candidate ports could be opened: {candidates:?}");
}
