//! Published view of a slave's register snapshot.

use chrono::{DateTime, Utc};
use rs485_master::{RegisteredSlave, SlaveSnapshot};
use serde::{Deserialize, Serialize};

/// Health of a slave as seen from its snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlaveStatus {
    /// Last poll succeeded.
    Online,
    /// Last poll failed; values are from an earlier success.
    Stale,
    /// Polls fail and no value was ever read.
    Offline,
    /// Not polled yet.
    Unknown,
}

impl SlaveStatus {
    pub fn of(snapshot: &SlaveSnapshot) -> Self {
        match (snapshot.has_data(), snapshot.last_error) {
            (true, None) => SlaveStatus::Online,
            (true, Some(_)) => SlaveStatus::Stale,
            (false, Some(_)) => SlaveStatus::Offline,
            (false, None) => SlaveStatus::Unknown,
        }
    }
}

/// Error attached to a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportError {
    pub code: i32,
    pub name: String,
    pub message: String,
}

/// One slave's registers as published on Zenoh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveReport {
    /// Slave name (used in the key expression).
    pub name: String,
    pub address: u8,
    pub register_start: u16,
    pub register_count: u16,
    pub values: Vec<u16>,
    pub status: SlaveStatus,
    pub last_error: Option<ReportError>,
    /// Milliseconds since the values were read.
    pub age_ms: Option<u64>,
    /// Unix time of the read in milliseconds.
    pub timestamp: Option<i64>,
    pub poll_count: u64,
    pub consecutive_failures: u32,
}

impl SlaveReport {
    /// Build a report for `slave`.
    ///
    /// `now_ms` is the registry clock (milliseconds since engine start) at
    /// the moment `wall_clock` was taken.
    pub fn from_slave(
        name: impl Into<String>,
        slave: &RegisteredSlave,
        now_ms: u64,
        wall_clock: DateTime<Utc>,
    ) -> Self {
        let snapshot = &slave.snapshot;
        let age_ms = snapshot
            .timestamp_ms
            .map(|read_at| now_ms.saturating_sub(read_at));
        let timestamp = age_ms.map(|age| wall_clock.timestamp_millis() - age as i64);

        Self {
            name: name.into(),
            address: snapshot.address,
            register_start: snapshot.register_start,
            register_count: snapshot.register_count,
            values: snapshot.values.clone(),
            status: SlaveStatus::of(snapshot),
            last_error: snapshot.last_error.map(|e| ReportError {
                code: e.code(),
                name: e.as_str().to_string(),
                message: e.to_string(),
            }),
            age_ms,
            timestamp,
            poll_count: snapshot.poll_count,
            consecutive_failures: snapshot.consecutive_failures,
        }
    }
}
