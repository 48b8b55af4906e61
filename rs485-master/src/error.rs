//! Error types for the master engine.
//!
//! Two families live here:
//! - [`PollError`] describes why a single poll transaction failed. It is never
//!   propagated out of the scheduler; it is recorded on the slave's snapshot.
//! - [`MasterError`] is returned synchronously by the engine API
//!   (registration, removal, snapshot reads, lifecycle).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using [`MasterError`].
pub type Result<T> = std::result::Result<T, MasterError>;

/// Failure of one poll transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollError {
    /// The request frame could not be built (output buffer too small).
    #[error("request frame could not be built")]
    Build,

    /// Exclusive bus ownership could not be acquired in time.
    #[error("bus busy")]
    BusBusy,

    /// The response buffer could not be allocated.
    #[error("response buffer allocation failed")]
    Allocation,

    /// No response bytes arrived before the timeout.
    #[error("no response before timeout")]
    IoTimeout,

    /// The response is shorter than a valid frame.
    #[error("response frame too short")]
    ShortFrame,

    /// The response address or function code is not the one requested.
    #[error("unexpected slave address or function code")]
    AddressOrFunctionMismatch,

    /// The declared byte count does not match the requested register count.
    #[error("byte count does not match register count")]
    ByteCountMismatch,

    /// The frame CRC does not match its contents.
    #[error("CRC mismatch")]
    CrcMismatch,

    /// More registers requested than a snapshot can hold.
    #[error("register count exceeds snapshot capacity")]
    TooManyRegisters,

    /// The registry lock could not be acquired to publish the result.
    #[error("registry lock timeout")]
    LockTimeout,
}

impl PollError {
    /// Stable numeric code; 0 is reserved for "no error".
    pub fn code(&self) -> i32 {
        match self {
            PollError::Build => -2,
            PollError::BusBusy => -3,
            PollError::Allocation => -4,
            PollError::IoTimeout => -5,
            PollError::ShortFrame => -6,
            PollError::AddressOrFunctionMismatch => -7,
            PollError::ByteCountMismatch => -8,
            PollError::CrcMismatch => -9,
            PollError::TooManyRegisters => -10,
            PollError::LockTimeout => -11,
        }
    }

    /// Short identifier used in logs and published reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            PollError::Build => "build",
            PollError::BusBusy => "bus_busy",
            PollError::Allocation => "allocation",
            PollError::IoTimeout => "io_timeout",
            PollError::ShortFrame => "short_frame",
            PollError::AddressOrFunctionMismatch => "address_or_function_mismatch",
            PollError::ByteCountMismatch => "byte_count_mismatch",
            PollError::CrcMismatch => "crc_mismatch",
            PollError::TooManyRegisters => "too_many_registers",
            PollError::LockTimeout => "lock_timeout",
        }
    }
}

/// Errors returned by the engine API.
#[derive(Debug, Error)]
pub enum MasterError {
    /// Every slot of the registry is in use.
    #[error("slave registry is full ({0} slots)")]
    Full(usize),

    /// The slot index is out of range or not registered.
    #[error("no slave registered in slot {0}")]
    NotFound(usize),

    /// The registry lock could not be acquired in time.
    #[error("registry lock timeout")]
    LockTimeout,

    /// A slave or bus configuration was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// `start()` was called on a running engine.
    #[error("poll scheduler already running")]
    AlreadyRunning,

    /// `stop()` was called on a stopped engine.
    #[error("poll scheduler not running")]
    NotRunning,
}

impl MasterError {
    /// Create a configuration error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_error_codes_are_distinct_and_negative() {
        let all = [
            PollError::Build,
            PollError::BusBusy,
            PollError::Allocation,
            PollError::IoTimeout,
            PollError::ShortFrame,
            PollError::AddressOrFunctionMismatch,
            PollError::ByteCountMismatch,
            PollError::CrcMismatch,
            PollError::TooManyRegisters,
            PollError::LockTimeout,
        ];

        let mut codes: Vec<i32> = all.iter().map(PollError::code).collect();
        assert!(codes.iter().all(|c| *c < 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }

    #[test]
    fn test_poll_error_serde_matches_as_str() {
        let text = json5::to_string(&PollError::CrcMismatch).unwrap();
        assert_eq!(text.trim_matches('"'), PollError::CrcMismatch.as_str());
    }

    #[test]
    fn test_master_error_display() {
        assert_eq!(
            MasterError::Full(32).to_string(),
            "slave registry is full (32 slots)"
        );
        assert_eq!(
            MasterError::NotFound(7).to_string(),
            "no slave registered in slot 7"
        );
    }
}
