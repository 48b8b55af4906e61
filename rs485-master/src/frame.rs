//! Modbus RTU framing for function 0x03 (Read Holding Registers).
//!
//! Request (8 bytes):
//!
//! ```text
//! addr | 0x03 | start_hi | start_lo | count_hi | count_lo | crc_lo | crc_hi
//! ```
//!
//! Response (`5 + 2 * count` bytes):
//!
//! ```text
//! addr | 0x03 | byte_count | data (big-endian words) ... | crc_lo | crc_hi
//! ```

use std::fmt::Write as _;

use crate::crc::{crc16, crc16_le_bytes};
use crate::error::PollError;

/// Function code for Read Holding Registers.
pub const FUNCTION_READ_HOLDING: u8 = 0x03;

/// Length of a read request frame.
pub const REQUEST_LEN: usize = 8;

/// Address + function + byte count + CRC.
pub const MIN_RESPONSE_LEN: usize = 5;

/// Number of register values a snapshot can hold.
pub const MAX_REGISTERS: usize = 64;

/// Write a read-holding-registers request into `out`.
///
/// Returns the number of bytes written (always [`REQUEST_LEN`]), or
/// [`PollError::Build`] when `out` cannot hold the frame.
pub fn build_read_request(
    address: u8,
    start: u16,
    count: u16,
    out: &mut [u8],
) -> Result<usize, PollError> {
    if out.len() < REQUEST_LEN {
        return Err(PollError::Build);
    }

    out[0] = address;
    out[1] = FUNCTION_READ_HOLDING;
    out[2..4].copy_from_slice(&start.to_be_bytes());
    out[4..6].copy_from_slice(&count.to_be_bytes());
    let crc = crc16_le_bytes(&out[..6]);
    out[6..8].copy_from_slice(&crc);

    Ok(REQUEST_LEN)
}

/// Build a read-holding-registers request frame.
pub fn read_request(address: u8, start: u16, count: u16) -> [u8; REQUEST_LEN] {
    let mut frame = [0u8; REQUEST_LEN];
    // The array is exactly REQUEST_LEN bytes long, so building cannot fail.
    let _ = build_read_request(address, start, count, &mut frame);
    frame
}

/// Expected length of the response to a request for `count` registers.
pub fn response_len(count: u16) -> usize {
    MIN_RESPONSE_LEN + 2 * count as usize
}

/// Validate a read-holding-registers response and decode its values.
///
/// Checks are applied in order: minimum length, address and function code,
/// declared byte count, frame completeness, CRC, snapshot capacity.
pub fn parse_read_response(
    frame: &[u8],
    expected_address: u8,
    expected_count: u16,
) -> Result<Vec<u16>, PollError> {
    if frame.len() < MIN_RESPONSE_LEN {
        return Err(PollError::ShortFrame);
    }

    if frame[0] != expected_address || frame[1] != FUNCTION_READ_HOLDING {
        return Err(PollError::AddressOrFunctionMismatch);
    }

    let byte_count = frame[2] as usize;
    if byte_count != 2 * expected_count as usize {
        return Err(PollError::ByteCountMismatch);
    }

    let body_end = 3 + byte_count;
    if frame.len() < body_end + 2 {
        return Err(PollError::ShortFrame);
    }

    let received = u16::from_le_bytes([frame[body_end], frame[body_end + 1]]);
    if crc16(&frame[..body_end]) != received {
        return Err(PollError::CrcMismatch);
    }

    if expected_count as usize > MAX_REGISTERS {
        return Err(PollError::TooManyRegisters);
    }

    Ok(frame[3..body_end]
        .chunks_exact(2)
        .map(|word| u16::from_be_bytes([word[0], word[1]]))
        .collect())
}

/// Build a well-formed response carrying `values`, as a slave would send it.
pub fn build_read_response(address: u8, values: &[u16]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(MIN_RESPONSE_LEN + 2 * values.len());
    frame.push(address);
    frame.push(FUNCTION_READ_HOLDING);
    frame.push((values.len() * 2) as u8);
    for value in values {
        frame.extend_from_slice(&value.to_be_bytes());
    }
    let crc = crc16_le_bytes(&frame);
    frame.extend_from_slice(&crc);
    frame
}

/// Format a frame as space-separated hex for logging.
pub fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02X}", byte);
    }
    out
}
