//! Half-duplex bus transport: serial port plus driver-enable (DE) line.
//!
//! The line moves through `Idle -> Transmitting -> GuardBand -> Idle`.
//! [`BusTransport::transmit`] hands out a [`BusLease`] that keeps exclusive
//! ownership of the bus; the guard band is retired (DE released) by the task
//! holding the lease, never by a detached timer. A lease dropped while its
//! guard band is pending leaves the deadline in place, and the next transmit
//! waits it out before asserting DE again. Bytes already waiting on the port
//! when a transmit starts belong to an earlier exchange and are discarded.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{Instant, sleep_until, timeout, timeout_at};
use tracing::{debug, trace, warn};

use crate::error::PollError;
use crate::frame::hex;
use crate::timing::guard_band_us;

/// Upper bound on stale bytes dropped before one transmit.
const DISCARD_LIMIT: usize = 4096;

/// Controls the transceiver's driver-enable line.
pub trait DirectionControl: Send {
    /// Drive DE: `true` to transmit, `false` to listen.
    fn set_driver_enable(&mut self, enabled: bool) -> io::Result<()>;
}

impl<T: DirectionControl + ?Sized> DirectionControl for Box<T> {
    fn set_driver_enable(&mut self, enabled: bool) -> io::Result<()> {
        (**self).set_driver_enable(enabled)
    }
}

/// For transceivers that switch direction automatically.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDirection;

impl DirectionControl for NoDirection {
    fn set_driver_enable(&mut self, _enabled: bool) -> io::Result<()> {
        Ok(())
    }
}

/// DE line driven through a sysfs GPIO `value` file.
#[derive(Debug)]
pub struct GpioValueFile {
    file: File,
    active_low: bool,
}

impl GpioValueFile {
    /// Open the `value` file of an exported GPIO and drive it to receive.
    pub fn open(path: impl AsRef<Path>, active_low: bool) -> io::Result<Self> {
        let file = OpenOptions::new().write(true).open(path)?;
        let mut gpio = Self { file, active_low };
        gpio.set_driver_enable(false)?;
        Ok(gpio)
    }
}

impl DirectionControl for GpioValueFile {
    fn set_driver_enable(&mut self, enabled: bool) -> io::Result<()> {
        let level = if enabled != self.active_low { b"1" } else { b"0" };
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(level)
    }
}

/// In-memory DE line that records every level change.
///
/// Clones share the same line, so a test can keep one handle while the
/// transport owns another.
#[derive(Debug, Clone, Default)]
pub struct SharedDirection {
    history: Arc<StdMutex<Vec<(Instant, bool)>>>,
}

impl SharedDirection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current level; `false` before the first change.
    pub fn is_enabled(&self) -> bool {
        self.history()
            .last()
            .map(|(_, level)| *level)
            .unwrap_or(false)
    }

    /// All level changes with the time they happened.
    pub fn history(&self) -> Vec<(Instant, bool)> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DirectionControl for SharedDirection {
    fn set_driver_enable(&mut self, enabled: bool) -> io::Result<()> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((Instant::now(), enabled));
        Ok(())
    }
}

/// State of the bus line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    /// DE released, nothing in flight.
    Idle,
    /// DE asserted, frame being written.
    Transmitting,
    /// Frame submitted; DE stays asserted until `release_at`.
    GuardBand { release_at: Instant },
}

struct BusLine<S, D> {
    port: S,
    direction: D,
    state: LineState,
}

impl<S, D: DirectionControl> BusLine<S, D> {
    fn drive(&mut self, enabled: bool) {
        if let Err(e) = self.direction.set_driver_enable(enabled) {
            warn!(enabled, error = %e, "Failed to drive DE line");
        }
    }

    fn release(&mut self) {
        self.drive(false);
        self.state = LineState::Idle;
        trace!("DE -> 0");
    }

    /// Wait out a pending guard band and release DE.
    async fn retire_guard_band(&mut self) {
        if let LineState::GuardBand { release_at } = self.state {
            sleep_until(release_at).await;
            self.release();
        }
    }
}

impl<S: AsyncRead + Unpin, D> BusLine<S, D> {
    /// Read and drop whatever is already waiting on the port.
    async fn discard_pending(&mut self) -> usize {
        let mut scratch = [0u8; 64];
        let mut discarded = 0;

        while discarded < DISCARD_LIMIT {
            match timeout(Duration::ZERO, self.port.read(&mut scratch)).await {
                Ok(Ok(n)) if n > 0 => discarded += n,
                _ => break,
            }
        }

        discarded
    }
}

/// Exclusive owner of the serial port and the DE line.
pub struct BusTransport<S, D> {
    line: Mutex<BusLine<S, D>>,
    char_us: u64,
    bus_timeout: Duration,
}

impl<S, D> BusTransport<S, D>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    D: DirectionControl,
{
    /// Create a transport; `char_us` is the character time of the line.
    pub fn new(port: S, direction: D, char_us: u64, bus_timeout: Duration) -> Self {
        Self {
            line: Mutex::new(BusLine {
                port,
                direction,
                state: LineState::Idle,
            }),
            char_us,
            bus_timeout,
        }
    }

    /// Character time in microseconds.
    pub fn char_time_us(&self) -> u64 {
        self.char_us
    }

    /// Current line state, or `None` while the bus is owned.
    pub fn line_state(&self) -> Option<LineState> {
        self.line.try_lock().ok().map(|line| line.state)
    }

    /// Assert DE and submit `frame`.
    ///
    /// Waits at most the bus timeout for ownership ([`PollError::BusBusy`]).
    /// Returns as soon as the frame is submitted; the returned lease keeps
    /// ownership until it is dropped.
    pub async fn transmit(&self, frame: &[u8]) -> Result<BusLease<'_, S, D>, PollError> {
        let mut line = timeout(self.bus_timeout, self.line.lock())
            .await
            .map_err(|_| {
                warn!(timeout_ms = self.bus_timeout.as_millis() as u64, "Bus busy");
                PollError::BusBusy
            })?;

        line.retire_guard_band().await;

        let stale = line.discard_pending().await;
        if stale > 0 {
            debug!(bytes = stale, "Discarded stale bytes before TX");
        }

        line.state = LineState::Transmitting;
        line.drive(true);

        let written = match line.port.write_all(frame).await {
            Ok(()) => line.port.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            warn!(error = %e, len = frame.len(), "Serial write failed");
            line.release();
            return Err(PollError::IoTimeout);
        }

        let hold_us = guard_band_us(frame.len(), self.char_us);
        line.state = LineState::GuardBand {
            release_at: Instant::now() + Duration::from_micros(hold_us),
        };

        debug!(len = frame.len(), hold_us, "TX started, DE -> 1");
        trace!(tx = %hex(frame), "TX frame");

        Ok(BusLease { line })
    }
}

/// Exclusive bus ownership following a transmit.
pub struct BusLease<'a, S, D> {
    line: MutexGuard<'a, BusLine<S, D>>,
}

impl<S, D> BusLease<'_, S, D>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    D: DirectionControl,
{
    /// Read up to `len` bytes within `timeout_ms`.
    ///
    /// The timeout runs from the call, guard band included. Returns whatever
    /// arrived (possibly fewer than `len` bytes); nothing at all is
    /// [`PollError::IoTimeout`].
    pub async fn receive_expected(
        &mut self,
        len: usize,
        timeout_ms: u64,
    ) -> Result<Vec<u8>, PollError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        self.line.retire_guard_band().await;

        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| PollError::Allocation)?;
        buf.resize(len, 0);

        let mut filled = 0;
        while filled < len {
            match timeout_at(deadline, self.line.port.read(&mut buf[filled..])).await {
                Ok(Ok(0)) => {
                    debug!("Serial port closed");
                    break;
                }
                Ok(Ok(n)) => filled += n,
                Ok(Err(e)) => {
                    warn!(error = %e, "Serial read failed");
                    break;
                }
                Err(_) => break,
            }
        }

        buf.truncate(filled);

        if buf.is_empty() {
            return Err(PollError::IoTimeout);
        }

        trace!(rx = %hex(&buf), expected = len, "RX frame");
        Ok(buf)
    }

    /// State of the line under this lease.
    pub fn state(&self) -> LineState {
        self.line.state
    }
}
