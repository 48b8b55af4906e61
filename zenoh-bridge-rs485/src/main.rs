//! Zenoh bridge for RS-485 Modbus-RTU slaves.
//!
//! Polls holding registers from the slaves on one RS-485 bus and publishes
//! their latest snapshots to Zenoh.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rs485_master::{EngineSettings, MasterEngine};
use tracing::{error, info};
use zenoh_bridge_rs485::config::Rs485BridgeConfig;
use zenoh_bridge_rs485::publisher::{Publisher, SnapshotPublisher};
use zenoh_bridge_rs485::{BridgeStatus, LoggingConfig, serial};

const BRIDGE_NAME: &str = "rs485";

/// Zenoh bridge for RS-485 Modbus-RTU slaves.
#[derive(Parser, Debug)]
#[command(name = "zenoh-bridge-rs485")]
#[command(about = "Polls RS-485 Modbus-RTU slaves and publishes to Zenoh")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "rs485.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Rs485BridgeConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let log_config = LoggingConfig {
        level: args
            .log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone()),
        format: config.logging.format,
    };
    zenoh_bridge_rs485::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Starting zenoh-bridge-rs485");
    info!("Loaded configuration from {:?}", args.config);

    // Bus and engine
    let port = serial::open_port(&config.bus)
        .with_context(|| format!("Failed to open serial port {}", config.bus.port))?;
    let direction =
        serial::direction(&config.bus.direction).context("Failed to set up DE line")?;
    let engine = MasterEngine::new(port, direction, EngineSettings::from(&config.bus));

    for slave in &config.slaves {
        let slot = engine
            .register(slave.clone())
            .await
            .with_context(|| format!("Failed to register slave '{}'", slave.display_name()))?;
        info!(
            slot,
            slave = %slave.display_name(),
            address = slave.address,
            start = slave.register_start,
            count = slave.register_count,
            interval_ms = slave.poll_interval_ms,
            "Slave registered"
        );
    }

    engine.start().await.context("Failed to start polling")?;

    // Zenoh
    let session = zenoh_bridge_rs485::connect(&config.zenoh)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to Zenoh: {}", e))?;
    let session = Arc::new(session);

    let publisher = Publisher::new(
        session.clone(),
        config.publish.key_prefix.clone(),
        config.publish.format,
    );

    let snapshots =
        SnapshotPublisher::new(publisher.clone(), engine.registry(), config.publish.interval());
    let task = tokio::spawn(snapshots.run());

    info!(
        "RS485 bridge running with {} slave(s)",
        config.slaves.len()
    );

    let status = BridgeStatus::running(BRIDGE_NAME, env!("CARGO_PKG_VERSION")).with_metadata(
        serde_json::json!({
            "port": config.bus.port,
            "baud_rate": config.bus.baud_rate,
            "slaves": config.slaves.iter().map(|s| s.display_name()).collect::<Vec<_>>(),
        }),
    );
    if let Err(e) = status.publish(&publisher).await {
        error!("Failed to publish bridge status: {}", e);
    }

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    task.abort();
    engine.shutdown().await;

    let _ = BridgeStatus::offline(BRIDGE_NAME, env!("CARGO_PKG_VERSION"))
        .publish(&publisher)
        .await;

    session
        .close()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to close Zenoh session: {}", e))?;
    info!("RS485 bridge stopped");

    Ok(())
}
