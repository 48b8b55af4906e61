//! The master engine: one context object per RS-485 bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{BusConfig, SlaveConfig};
use crate::error::{MasterError, Result};
use crate::registry::{RegisteredSlave, SlaveRegistry, SlaveSnapshot};
use crate::scheduler::{DEFAULT_TICK, PollScheduler};
use crate::timing::{BITS_PER_CHAR_8N1, DEFAULT_BAUD_RATE, char_time_us_with_bits};
use crate::transport::{BusTransport, DirectionControl};

/// Timing parameters of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub baud_rate: u32,
    pub bits_per_char: u32,
    pub tick: Duration,
    pub bus_timeout: Duration,
    pub lock_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            bits_per_char: BITS_PER_CHAR_8N1,
            tick: DEFAULT_TICK,
            bus_timeout: Duration::from_millis(200),
            lock_timeout: Duration::from_millis(200),
        }
    }
}

impl From<&BusConfig> for EngineSettings {
    fn from(config: &BusConfig) -> Self {
        Self {
            baud_rate: config.baud_rate,
            bits_per_char: config.bits_per_char(),
            tick: config.tick(),
            bus_timeout: config.bus_timeout(),
            lock_timeout: config.lock_timeout(),
        }
    }
}

impl EngineSettings {
    /// Character time of the line in microseconds.
    pub fn char_time_us(&self) -> u64 {
        char_time_us_with_bits(self.baud_rate, self.bits_per_char)
    }
}

/// Owns the bus transport, the slave registry and the poll scheduler.
///
/// All methods take `&self`; wrap the engine in an `Arc` to share it between
/// tasks.
pub struct MasterEngine<S, D> {
    registry: Arc<SlaveRegistry>,
    bus: Arc<BusTransport<S, D>>,
    settings: EngineSettings,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S, D> MasterEngine<S, D>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    D: DirectionControl + 'static,
{
    /// Create a stopped engine on `port`, driving `direction` as DE.
    pub fn new(port: S, direction: D, settings: EngineSettings) -> Self {
        let bus = BusTransport::new(
            port,
            direction,
            settings.char_time_us(),
            settings.bus_timeout,
        );

        info!(
            baud = settings.baud_rate,
            char_us = settings.char_time_us(),
            tick_ms = settings.tick.as_millis() as u64,
            "RS485 master initialised"
        );

        Self {
            registry: Arc::new(SlaveRegistry::new(settings.lock_timeout)),
            bus: Arc::new(bus),
            settings,
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Shared handle to the slave table, for readers that outlive a borrow.
    pub fn registry(&self) -> Arc<SlaveRegistry> {
        self.registry.clone()
    }

    /// Add a slave; returns its slot index.
    pub async fn register(&self, config: SlaveConfig) -> Result<usize> {
        self.registry.register(config).await
    }

    /// Remove the slave in `slot`.
    pub async fn unregister(&self, slot: usize) -> Result<()> {
        self.registry.unregister(slot).await
    }

    /// Latest snapshot of the slave in `slot`.
    pub async fn snapshot(&self, slot: usize) -> Result<SlaveSnapshot> {
        self.registry.snapshot(slot).await
    }

    /// Every registered slave with its latest snapshot.
    pub async fn snapshot_all(&self) -> Result<Vec<RegisteredSlave>> {
        self.registry.snapshot_all().await
    }

    /// Number of registered slaves.
    pub fn count(&self) -> usize {
        self.registry.count()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Spawn the poll scheduler.
    pub async fn start(&self) -> Result<()> {
        let mut task = self.task.lock().await;

        if self.running.swap(true, Ordering::AcqRel) {
            return Err(MasterError::AlreadyRunning);
        }

        let scheduler = PollScheduler::new(
            self.registry.clone(),
            self.bus.clone(),
            self.settings.tick,
            self.running.clone(),
        );
        *task = Some(tokio::spawn(scheduler.run()));

        info!(slaves = self.count(), "RS485 polling started");
        Ok(())
    }

    /// Stop the poll scheduler and wait for it to exit.
    ///
    /// A transaction in flight completes before the scheduler exits.
    pub async fn stop(&self) -> Result<()> {
        let mut task = self.task.lock().await;

        if !self.running.swap(false, Ordering::AcqRel) {
            return Err(MasterError::NotRunning);
        }

        if let Some(handle) = task.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Poll scheduler task failed");
            }
        }

        info!("RS485 polling stopped");
        Ok(())
    }

    /// Stop polling (if running) and release the bus.
    pub async fn shutdown(self) {
        if self.is_running() {
            let _ = self.stop().await;
        }
        info!("RS485 master shut down");
    }
}

impl<S, D> Drop for MasterEngine<S, D> {
    fn drop(&mut self) {
        // The scheduler exits on its next tick.
        self.running.store(false, Ordering::Release);
    }
}
