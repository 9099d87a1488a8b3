//! # ELD Link Agent
//!
//! Headless runner. Talks to a simulated PT30 until a vendor radio SDK is
//! wired in behind `DeviceLink`.
//!
//! ```text
//! eld-agent [CONFIG_PATH]
//! ```
//!
//! Without a path the platform default (`agent.toml` in the config dir) is
//! used.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use eld_agent::simulator::{SimulatedLink, SimulatorConfig};
use eld_sync::AgentConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    eld_agent::init_tracing();

    info!("Starting ELD Link agent...");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AgentConfig::load(config_path)?;
    info!(
        address = ?config.device.address,
        sync_enabled = config.is_sync_enabled(),
        "Configuration loaded"
    );

    let mut simulator = SimulatorConfig::default();
    if let Some(address) = &config.device.address {
        simulator.address = address.clone();
    }
    let link = Arc::new(SimulatedLink::new(simulator));

    eld_agent::run(config, link).await?;

    info!("Agent shutdown complete");
    Ok(())
}
