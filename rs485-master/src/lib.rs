//! RS-485 Modbus-RTU master engine.
//!
//! Shares one half-duplex serial bus among many slave devices, each polled
//! at its own interval, and keeps the latest register values of every slave
//! available to concurrent readers.
//!
//! - [`crc`] - Modbus CRC-16
//! - [`frame`] - Read Holding Registers (0x03) request/response framing
//! - [`timing`] - character time, guard band and response timeout
//! - [`transport`] - serial port and driver-enable line ownership
//! - [`registry`] - fixed-capacity slave table and snapshots
//! - [`scheduler`] - the polling loop
//! - [`engine`] - [`MasterEngine`], the per-bus context object
//! - [`sim`] - simulated slaves for tests
//!
//! # Example
//!
//! ```ignore
//! use rs485_master::{EngineSettings, MasterEngine, NoDirection, SlaveConfig};
//!
//! let port = tokio_serial::new("/dev/ttyS1", 9600).open_native_async()?;
//! let engine = MasterEngine::new(port, NoDirection, EngineSettings::default());
//!
//! let slot = engine.register(SlaveConfig::new(1, 0, 6, 2000)).await?;
//! engine.start().await?;
//!
//! let snapshot = engine.snapshot(slot).await?;
//! println!("{:?} (error {})", snapshot.values, snapshot.last_error_code());
//! ```

pub mod config;
pub mod crc;
pub mod engine;
pub mod error;
pub mod frame;
pub mod registry;
pub mod scheduler;
pub mod sim;
pub mod timing;
pub mod transport;

pub use config::{BusConfig, DirectionConfig, SlaveConfig};
pub use crc::crc16;
pub use engine::{EngineSettings, MasterEngine};
pub use error::{MasterError, PollError, Result};
pub use frame::{build_read_request, build_read_response, parse_read_response, read_request};
pub use registry::{MAX_SLAVES, RegisteredSlave, SlaveRegistry, SlaveSnapshot};
pub use scheduler::poll_transaction;
pub use sim::SlaveSimulator;
pub use transport::{BusTransport, DirectionControl, GpioValueFile, NoDirection, SharedDirection};
