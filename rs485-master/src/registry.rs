//! Fixed-capacity slave table and the snapshots read by callers.
//!
//! Slot indices are stable handles: a slot keeps its index for the lifetime
//! of the registration and is reused only after [`SlaveRegistry::unregister`].
//! Snapshot contents are written only by the poll scheduler, under the same
//! lock that [`SlaveRegistry::snapshot`] takes, so readers see either the old
//! or the fully updated snapshot.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{Instant, timeout};
use tracing::{info, warn};

use crate::config::SlaveConfig;
use crate::error::{MasterError, PollError, Result};
use crate::timing::effective_interval;

/// Number of slots in the registry.
pub const MAX_SLAVES: usize = 32;

/// Latest known state of one slave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveSnapshot {
    pub address: u8,
    pub register_start: u16,
    pub register_count: u16,
    /// Register values from the last successful poll (zero until then).
    pub values: Vec<u16>,
    /// Milliseconds since engine start of the last successful poll.
    pub timestamp_ms: Option<u64>,
    /// Outcome of the most recent poll attempt.
    pub last_error: Option<PollError>,
    /// Poll attempts since registration.
    pub poll_count: u64,
    /// Failed attempts since the last success.
    pub consecutive_failures: u32,
}

impl SlaveSnapshot {
    fn new(config: &SlaveConfig) -> Self {
        Self {
            address: config.address,
            register_start: config.register_start,
            register_count: config.register_count,
            values: vec![0; config.register_count as usize],
            timestamp_ms: None,
            last_error: None,
            poll_count: 0,
            consecutive_failures: 0,
        }
    }

    /// 0 when the last attempt succeeded, otherwise the [`PollError::code`].
    pub fn last_error_code(&self) -> i32 {
        self.last_error.map(|e| e.code()).unwrap_or(0)
    }

    /// Whether any poll has succeeded yet.
    pub fn has_data(&self) -> bool {
        self.timestamp_ms.is_some()
    }
}

/// A registered slave as seen by readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredSlave {
    pub slot: usize,
    pub config: SlaveConfig,
    pub snapshot: SlaveSnapshot,
}

/// Work item handed to the scheduler for one due slave.
#[derive(Debug, Clone)]
pub struct PollTicket {
    pub slot: usize,
    pub generation: u64,
    pub config: SlaveConfig,
}

#[derive(Debug)]
struct SlaveEntry {
    config: SlaveConfig,
    generation: u64,
    /// `None` until the first poll, which makes a new slave due at once.
    last_poll: Option<Instant>,
    snapshot: SlaveSnapshot,
}

#[derive(Debug)]
struct Slots {
    entries: [Option<SlaveEntry>; MAX_SLAVES],
    next_generation: u64,
}

/// Slave table shared by the scheduler and API callers.
#[derive(Debug)]
pub struct SlaveRegistry {
    slots: Mutex<Slots>,
    count: AtomicUsize,
    /// Generation + 1 of a registration whose poll outcome could not be
    /// published for lack of the lock; 0 when none.
    lock_missed: [AtomicU64; MAX_SLAVES],
    lock_timeout: Duration,
    epoch: Instant,
}

impl SlaveRegistry {
    /// Create an empty registry.
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(Slots {
                entries: std::array::from_fn(|_| None),
                next_generation: 0,
            }),
            count: AtomicUsize::new(0),
            lock_missed: std::array::from_fn(|_| AtomicU64::new(0)),
            lock_timeout,
            epoch: Instant::now(),
        }
    }

    /// Number of registered slaves.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    async fn lock(&self) -> Result<MutexGuard<'_, Slots>> {
        timeout(self.lock_timeout, self.slots.lock())
            .await
            .map_err(|_| MasterError::LockTimeout)
    }

    /// Claim the first free slot for `config`.
    ///
    /// The new slave is due on the next scheduler tick.
    pub async fn register(&self, config: SlaveConfig) -> Result<usize> {
        config.validate()?;

        let mut slots = self.lock().await?;
        let slot = slots
            .entries
            .iter()
            .position(Option::is_none)
            .ok_or(MasterError::Full(MAX_SLAVES))?;

        let generation = slots.next_generation;
        slots.next_generation += 1;

        info!(
            slot,
            address = config.address,
            start = config.register_start,
            count = config.register_count,
            interval_ms = config.poll_interval_ms,
            "Added slave"
        );

        slots.entries[slot] = Some(SlaveEntry {
            snapshot: SlaveSnapshot::new(&config),
            config,
            generation,
            last_poll: None,
        });
        self.lock_missed[slot].store(0, Ordering::Release);
        self.count.fetch_add(1, Ordering::AcqRel);

        Ok(slot)
    }

    /// Free `slot`.
    pub async fn unregister(&self, slot: usize) -> Result<()> {
        if slot >= MAX_SLAVES {
            return Err(MasterError::NotFound(slot));
        }

        let mut slots = self.lock().await?;
        let entry = slots.entries[slot]
            .take()
            .ok_or(MasterError::NotFound(slot))?;
        self.count.fetch_sub(1, Ordering::AcqRel);

        info!(slot, address = entry.config.address, "Removed slave");
        Ok(())
    }

    /// Copy of the latest snapshot for `slot`.
    pub async fn snapshot(&self, slot: usize) -> Result<SlaveSnapshot> {
        if slot >= MAX_SLAVES {
            return Err(MasterError::NotFound(slot));
        }

        let slots = self.lock().await?;
        let entry = slots.entries[slot]
            .as_ref()
            .ok_or(MasterError::NotFound(slot))?;
        Ok(self.reader_view(slot, entry))
    }

    /// Consistent copy of every registered slave, in slot order.
    pub async fn snapshot_all(&self) -> Result<Vec<RegisteredSlave>> {
        let slots = self.lock().await?;
        Ok(slots
            .entries
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| {
                entry.as_ref().map(|entry| RegisteredSlave {
                    slot,
                    config: entry.config.clone(),
                    snapshot: self.reader_view(slot, entry),
                })
            })
            .collect())
    }

    fn reader_view(&self, slot: usize, entry: &SlaveEntry) -> SlaveSnapshot {
        let mut view = entry.snapshot.clone();
        if self.lock_missed[slot].load(Ordering::Acquire) == entry.generation + 1 {
            view.last_error = Some(PollError::LockTimeout);
        }
        view
    }

    /// Milliseconds between engine start and `at`.
    pub fn elapsed_ms(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.epoch).as_millis() as u64
    }

    /// Stamp and return every slave whose poll interval has elapsed at `now`.
    pub(crate) async fn claim_due(&self, now: Instant) -> Result<Vec<PollTicket>> {
        let mut slots = self.lock().await?;
        let mut due = Vec::new();

        for (slot, entry) in slots.entries.iter_mut().enumerate() {
            let Some(entry) = entry else { continue };

            let interval = effective_interval(entry.config.poll_interval_ms);
            let is_due = entry
                .last_poll
                .is_none_or(|last| now.saturating_duration_since(last) >= interval);

            if is_due {
                entry.last_poll = Some(now);
                entry.snapshot.poll_count += 1;
                due.push(PollTicket {
                    slot,
                    generation: entry.generation,
                    config: entry.config.clone(),
                });
            }
        }

        Ok(due)
    }

    /// Record the outcome of a poll.
    ///
    /// Values and timestamp change only on success; `last_error` always
    /// reflects this attempt. Outcomes for a slot that was removed (or
    /// removed and reused) since the ticket was issued are dropped.
    pub(crate) async fn publish(
        &self,
        ticket: &PollTicket,
        outcome: std::result::Result<Vec<u16>, PollError>,
        now: Instant,
    ) {
        let mut slots = match self.lock().await {
            Ok(slots) => slots,
            Err(_) => {
                warn!(slot = ticket.slot, "Registry lock timeout, poll result dropped");
                // Generations only grow; the newest miss wins.
                self.lock_missed[ticket.slot]
                    .fetch_max(ticket.generation + 1, Ordering::AcqRel);
                return;
            }
        };

        let Some(entry) = slots.entries[ticket.slot]
            .as_mut()
            .filter(|entry| entry.generation == ticket.generation)
        else {
            return;
        };
        self.lock_missed[ticket.slot].store(0, Ordering::Release);

        let snapshot = &mut entry.snapshot;
        match outcome {
            Ok(values) => {
                snapshot.values = values;
                snapshot.timestamp_ms = Some(self.elapsed_ms(now));
                snapshot.last_error = None;
                snapshot.consecutive_failures = 0;
            }
            Err(e) => {
                snapshot.last_error = Some(e);
                snapshot.consecutive_failures = snapshot.consecutive_failures.saturating_add(1);
            }
        }
    }
}
