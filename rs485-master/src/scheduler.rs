//! Poll scheduler: one loop, one bus, many slaves.
//!
//! Every tick the scheduler claims the slaves whose interval has elapsed and
//! polls them one after another in slot order. A failed poll is recorded on
//! the slave and retried at its next interval; nothing is retried within a
//! transaction.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::config::SlaveConfig;
use crate::error::PollError;
use crate::frame::{REQUEST_LEN, build_read_request, parse_read_response, response_len};
use crate::registry::{PollTicket, SlaveRegistry};
use crate::timing::response_timeout_ms;
use crate::transport::{BusTransport, DirectionControl};

/// Default scheduler tick.
pub const DEFAULT_TICK: Duration = Duration::from_millis(10);

/// Read the configured register window from one slave.
pub async fn poll_transaction<S, D>(
    bus: &BusTransport<S, D>,
    config: &SlaveConfig,
) -> Result<Vec<u16>, PollError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    D: DirectionControl,
{
    let mut request = [0u8; REQUEST_LEN];
    let len = build_read_request(
        config.address,
        config.register_start,
        config.register_count,
        &mut request,
    )?;

    let expected_len = response_len(config.register_count);
    let timeout_ms = response_timeout_ms(bus.char_time_us(), expected_len);

    let response = {
        let mut lease = bus.transmit(&request[..len]).await?;
        lease.receive_expected(expected_len, timeout_ms).await?
    };

    parse_read_response(&response, config.address, config.register_count)
}

/// The background polling loop.
pub struct PollScheduler<S, D> {
    registry: Arc<SlaveRegistry>,
    bus: Arc<BusTransport<S, D>>,
    tick: Duration,
    running: Arc<AtomicBool>,
}

impl<S, D> PollScheduler<S, D>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    D: DirectionControl,
{
    pub fn new(
        registry: Arc<SlaveRegistry>,
        bus: Arc<BusTransport<S, D>>,
        tick: Duration,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            registry,
            bus,
            tick,
            running,
        }
    }

    /// Run until the running flag is cleared.
    ///
    /// The flag is checked between ticks, so a tick in progress (and any
    /// transaction in it) always completes.
    pub async fn run(self) {
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            tick_ms = self.tick.as_millis() as u64,
            char_us = self.bus.char_time_us(),
            "Starting poll scheduler"
        );

        loop {
            ticker.tick().await;

            if !self.running.load(Ordering::Acquire) {
                break;
            }

            self.run_tick().await;
        }

        info!("Poll scheduler stopped");
    }

    /// Poll every slave that is due now. Returns the number of polls made.
    pub async fn run_tick(&self) -> usize {
        let now = Instant::now();

        let due = match self.registry.claim_due(now).await {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "Could not scan slave table");
                return 0;
            }
        };

        for ticket in &due {
            self.poll(ticket).await;
        }

        due.len()
    }

    async fn poll(&self, ticket: &PollTicket) {
        let started = Instant::now();
        let outcome = poll_transaction(&self.bus, &ticket.config).await;

        match &outcome {
            Ok(values) => debug!(
                slot = ticket.slot,
                address = ticket.config.address,
                registers = values.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Poll succeeded"
            ),
            Err(e) => warn!(
                slot = ticket.slot,
                address = ticket.config.address,
                error = %e,
                code = e.code(),
                "Poll failed"
            ),
        }

        self.registry.publish(ticket, outcome, Instant::now()).await;
    }
}
