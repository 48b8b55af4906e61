//! Bus and slave configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MasterError, Result};
use crate::frame::MAX_REGISTERS;

/// Highest unicast Modbus slave address.
pub const MAX_SLAVE_ADDRESS: u8 = 247;

/// Serial bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Serial port path (e.g., "/dev/ttyS1" or "COM3")
    pub port: String,

    /// Baud rate (default: 9600)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Data bits (default: 8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,

    /// Parity: "none", "even", or "odd" (default: "none")
    #[serde(default = "default_parity")]
    pub parity: String,

    /// Stop bits: 1 or 2 (default: 1)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,

    /// Driver-enable line control
    #[serde(default)]
    pub direction: DirectionConfig,

    /// Maximum wait for bus ownership in milliseconds (default: 200)
    #[serde(default = "default_lock_timeout_ms")]
    pub bus_timeout_ms: u64,

    /// Maximum wait for the registry lock in milliseconds (default: 200)
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Scheduler tick in milliseconds (default: 10)
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

fn default_lock_timeout_ms() -> u64 {
    200
}

fn default_tick_ms() -> u64 {
    10
}

/// How the transceiver's driver-enable (DE) line is driven.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DirectionConfig {
    /// Transceiver switches direction on its own.
    #[default]
    None,
    /// GPIO exported through sysfs.
    Gpio {
        /// Path to the GPIO `value` file (e.g., "/sys/class/gpio/gpio33/value")
        path: String,
        /// Drive the line low to transmit
        #[serde(default)]
        active_low: bool,
    },
}

impl BusConfig {
    /// Bits on the wire per character: start + data + parity + stop.
    pub fn bits_per_char(&self) -> u32 {
        let parity = if self.parity.eq_ignore_ascii_case("none") {
            0
        } else {
            1
        };
        1 + self.data_bits as u32 + parity + self.stop_bits as u32
    }

    pub fn bus_timeout(&self) -> Duration {
        Duration::from_millis(self.bus_timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.port.is_empty() {
            return Err(MasterError::invalid_config("Serial port cannot be empty"));
        }

        if self.baud_rate == 0 {
            return Err(MasterError::invalid_config("baud_rate must be positive"));
        }

        if !(5..=8).contains(&self.data_bits) {
            return Err(MasterError::invalid_config(format!(
                "invalid data_bits {} (use 5-8)",
                self.data_bits
            )));
        }

        match self.parity.to_lowercase().as_str() {
            "none" | "even" | "odd" => {}
            other => {
                return Err(MasterError::invalid_config(format!(
                    "invalid parity '{}' (use none, even, or odd)",
                    other
                )));
            }
        }

        if !(1..=2).contains(&self.stop_bits) {
            return Err(MasterError::invalid_config(format!(
                "invalid stop_bits {} (use 1 or 2)",
                self.stop_bits
            )));
        }

        if self.tick_ms == 0 {
            return Err(MasterError::invalid_config("tick_ms must be positive"));
        }

        if let DirectionConfig::Gpio { path, .. } = &self.direction {
            if path.is_empty() {
                return Err(MasterError::invalid_config("GPIO path cannot be empty"));
            }
        }

        Ok(())
    }
}

/// One Modbus slave and the register window polled from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveConfig {
    /// Modbus slave address (1-247)
    pub address: u8,

    /// First holding register (0-based)
    #[serde(default)]
    pub register_start: u16,

    /// Number of holding registers (1-64)
    pub register_count: u16,

    /// Poll interval in milliseconds; 0 means the 1000 ms fallback
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u32,

    /// Optional display name
    #[serde(default)]
    pub name: Option<String>,
}

fn default_poll_interval_ms() -> u32 {
    1000
}

impl SlaveConfig {
    /// Create a configuration with no name.
    pub fn new(
        address: u8,
        register_start: u16,
        register_count: u16,
        poll_interval_ms: u32,
    ) -> Self {
        Self {
            address,
            register_start,
            register_count,
            poll_interval_ms,
            name: None,
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name used in logs and key expressions.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("slave{}", self.address))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.address == 0 || self.address > MAX_SLAVE_ADDRESS {
            return Err(MasterError::invalid_config(format!(
                "slave address {} out of range (1-{})",
                self.address, MAX_SLAVE_ADDRESS
            )));
        }

        if self.register_count == 0 || self.register_count as usize > MAX_REGISTERS {
            return Err(MasterError::invalid_config(format!(
                "slave {}: register_count {} out of range (1-{})",
                self.address, self.register_count, MAX_REGISTERS
            )));
        }

        Ok(())
    }
}
