//! Zenoh bridge for RS-485 Modbus-RTU slaves.
//!
//! The bridge drives an [`rs485_master::MasterEngine`] on a serial port and
//! publishes every slave's latest register snapshot to Zenoh:
//!
//! - [`config`] - Bridge configuration (JSON5 format)
//! - [`serial`] - Serial port and driver-enable line setup
//! - [`telemetry`] - Published report model
//! - [`serialization`] - JSON/CBOR encoding
//! - [`publisher`] - Snapshot publishing loop
//! - [`status`] - Bridge status messages
//! - [`session`] - Zenoh session management

pub mod config;
pub mod error;
pub mod publisher;
pub mod serial;
pub mod serialization;
pub mod session;
pub mod status;
pub mod telemetry;

pub use config::{LogFormat, LoggingConfig, PublishConfig, Rs485BridgeConfig, ZenohConfig};
pub use error::{BridgeError, Result};
pub use publisher::{Publisher, SnapshotPublisher, build_key};
pub use serialization::{Format, decode, encode};
pub use session::connect;
pub use status::BridgeStatus;
pub use telemetry::{SlaveReport, SlaveStatus};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| BridgeError::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| BridgeError::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
