//! Publishes register snapshots to Zenoh.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rs485_master::SlaveRegistry;
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior, interval};

use crate::error::{BridgeError, Result};
use crate::serialization::{Format, encode};
use crate::telemetry::SlaveReport;

/// Key suffix under which a slave's registers are published.
pub const REGISTERS_SUFFIX: &str = "registers";

/// Build a full key expression from a prefix and a suffix.
pub fn build_key(key_prefix: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        key_prefix.to_string()
    } else {
        format!("{}/{}", key_prefix, suffix)
    }
}

/// Key of the register report for `slave_name`.
pub fn registers_key(key_prefix: &str, slave_name: &str) -> String {
    build_key(key_prefix, &format!("{}/{}", slave_name, REGISTERS_SUFFIX))
}

/// Thin wrapper over a Zenoh session with a key prefix and a payload format.
#[derive(Clone, Debug)]
pub struct Publisher {
    session: Arc<zenoh::Session>,
    key_prefix: String,
    format: Format,
}

impl Publisher {
    pub fn new(
        session: Arc<zenoh::Session>,
        key_prefix: impl Into<String>,
        format: Format,
    ) -> Self {
        Self {
            session,
            key_prefix: key_prefix.into(),
            format,
        }
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Encode `value` in the publisher's format and put it on a full key.
    pub async fn publish_to_key<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let payload = encode(value, self.format)?;
        self.publish_raw(key, payload).await
    }

    /// Publish a JSON value to a full key.
    pub async fn publish_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.publish_raw(key, payload).await
    }

    /// Publish raw bytes to a full key.
    pub async fn publish_raw(&self, key: &str, payload: Vec<u8>) -> Result<()> {
        self.session
            .put(key, payload)
            .await
            .map_err(|e| BridgeError::Publish {
                key: key.to_string(),
                message: e.to_string(),
            })
    }
}

/// Outcome of one publish round.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    pub success: usize,
    pub failed: usize,
}

impl PublishStats {
    pub fn total(&self) -> usize {
        self.success + self.failed
    }
}

/// Build a report for every registered slave, in slot order.
pub async fn collect_reports(registry: &SlaveRegistry) -> Result<Vec<SlaveReport>> {
    let slaves = registry.snapshot_all().await?;
    let now_ms = registry.elapsed_ms(Instant::now());
    let wall_clock = Utc::now();

    Ok(slaves
        .iter()
        .map(|slave| {
            SlaveReport::from_slave(slave.config.display_name(), slave, now_ms, wall_clock)
        })
        .collect())
}

/// Periodically publishes every slave's snapshot.
pub struct SnapshotPublisher {
    publisher: Publisher,
    registry: Arc<SlaveRegistry>,
    interval: Duration,
}

impl SnapshotPublisher {
    pub fn new(publisher: Publisher, registry: Arc<SlaveRegistry>, interval: Duration) -> Self {
        Self {
            publisher,
            registry,
            interval,
        }
    }

    /// Run the publishing loop.
    pub async fn run(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            key_prefix = %self.publisher.key_prefix(),
            interval_ms = self.interval.as_millis() as u64,
            format = ?self.publisher.format(),
            "Starting snapshot publisher"
        );

        loop {
            ticker.tick().await;

            match self.publish_once().await {
                Ok(stats) if stats.failed > 0 => tracing::warn!(
                    failed = stats.failed,
                    total = stats.total(),
                    "Some snapshots were not published"
                ),
                Ok(stats) => tracing::trace!(published = stats.success, "Snapshots published"),
                Err(e) => tracing::warn!(error = %e, "Could not read slave snapshots"),
            }
        }
    }

    /// Publish one report per registered slave.
    pub async fn publish_once(&self) -> Result<PublishStats> {
        let reports = collect_reports(&self.registry).await?;
        let mut stats = PublishStats::default();

        for report in &reports {
            let key = registers_key(self.publisher.key_prefix(), &report.name);
            match self.publisher.publish_to_key(&key, report).await {
                Ok(()) => stats.success += 1,
                Err(e) => {
                    stats.failed += 1;
                    tracing::warn!(slave = %report.name, error = %e, "Failed to publish snapshot");
                }
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::SlaveStatus;
    use rs485_master::SlaveConfig;

    #[test]
    fn test_build_key() {
        assert_eq!(build_key("zensight/rs485", "meter"), "zensight/rs485/meter");
        assert_eq!(build_key("zensight/rs485", ""), "zensight/rs485");
        assert_eq!(
            registers_key("zensight/rs485", "slave2"),
            "zensight/rs485/slave2/registers"
        );
    }

    #[test]
    fn test_publish_stats() {
        let stats = PublishStats {
            success: 3,
            failed: 1,
        };
        assert_eq!(stats.total(), 4);
    }

    #[tokio::test]
    async fn test_collect_reports_uses_display_names() {
        let registry = SlaveRegistry::new(Duration::from_millis(200));
        registry
            .register(SlaveConfig::new(1, 0, 6, 2000).with_name("meter"))
            .await
            .unwrap();
        registry
            .register(SlaveConfig::new(2, 0, 4, 5000))
            .await
            .unwrap();

        let reports = collect_reports(&registry).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].name, "meter");
        assert_eq!(reports[1].name, "slave2");
        assert_eq!(reports[1].values, vec![0; 4]);
        assert_eq!(reports[1].status, SlaveStatus::Unknown);
    }
}
