//! Serial line timing derived from the baud rate.
//!
//! The Modbus formulas are written for 8-N-1 framing: one start bit, eight
//! data bits and one stop bit, i.e. ten bit-times per character. Other
//! framings only change the character time.

use std::time::Duration;

/// Baud rate used when a zero rate slips through.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Extra characters DE stays asserted after the last byte leaves the UART.
pub const GUARD_CHARS: u64 = 3;

/// Margin added to every response timeout, in microseconds.
pub const RESPONSE_MARGIN_US: u64 = 1_000_000;

/// Lower bound of the response timeout.
pub const MIN_RESPONSE_TIMEOUT_MS: u64 = 20;

/// Upper bound of the response timeout.
pub const MAX_RESPONSE_TIMEOUT_MS: u64 = 5000;

/// Interval used for slaves configured with a zero poll interval.
pub const FALLBACK_POLL_INTERVAL_MS: u32 = 1000;

/// Bits per character for 8-N-1.
pub const BITS_PER_CHAR_8N1: u32 = 10;

/// Time to transmit one 8-N-1 character, in microseconds.
pub fn char_time_us(baud: u32) -> u64 {
    char_time_us_with_bits(baud, BITS_PER_CHAR_8N1)
}

/// Time to transmit one character of `bits_per_char` bits, in microseconds.
pub fn char_time_us_with_bits(baud: u32, bits_per_char: u32) -> u64 {
    let baud = if baud == 0 { DEFAULT_BAUD_RATE } else { baud };
    bits_per_char as u64 * 1_000_000 / baud as u64
}

/// How long DE must stay asserted for a frame of `frame_len` bytes.
pub fn guard_band_us(frame_len: usize, char_us: u64) -> u64 {
    frame_len as u64 * char_us + GUARD_CHARS * char_us
}

/// The 3.5 character silent interval, rounded up.
pub fn silent_interval_us(char_us: u64) -> u64 {
    (7 * char_us).div_ceil(2)
}

/// Response timeout for a reply of `expected_len` bytes, clamped to
/// [`MIN_RESPONSE_TIMEOUT_MS`]..=[`MAX_RESPONSE_TIMEOUT_MS`].
pub fn response_timeout_ms(char_us: u64, expected_len: usize) -> u64 {
    let receive_us = expected_len as u64 * char_us;
    let total_us = silent_interval_us(char_us) + receive_us + RESPONSE_MARGIN_US;
    (total_us / 1000).clamp(MIN_RESPONSE_TIMEOUT_MS, MAX_RESPONSE_TIMEOUT_MS)
}

/// Poll interval actually applied to a slave.
pub fn effective_interval(poll_interval_ms: u32) -> Duration {
    let ms = if poll_interval_ms == 0 {
        FALLBACK_POLL_INTERVAL_MS
    } else {
        poll_interval_ms
    };
    Duration::from_millis(ms as u64)
}
