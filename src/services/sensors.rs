//! Beam sensor state and the synchronous snapshot query
//!
//! `SensorBoard` mirrors the last known beam levels for display only. Gate
//! decisions go through `SensorOracle::query_snapshot`, which asks the
//! controller for a fresh reading and waits for the reply to come back
//! through the reader task.

use crate::domain::types::{BeamSide, SensorReading};
use crate::infra::metrics::Metrics;
use crate::io::protocol::Command;
use crate::io::serial_link::GateCommander;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Last known beam levels, updated by classified link events
#[derive(Debug, Default)]
pub struct SensorBoard {
    entry_blocked: AtomicBool,
    exit_blocked: AtomicBool,
}

impl SensorBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, side: BeamSide, blocked: bool) {
        let cell = match side {
            BeamSide::Entry => &self.entry_blocked,
            BeamSide::Exit => &self.exit_blocked,
        };
        cell.store(blocked, Ordering::Relaxed);
    }

    pub fn apply(&self, reading: SensorReading) {
        self.set(BeamSide::Entry, reading.entry_blocked);
        self.set(BeamSide::Exit, reading.exit_blocked);
    }

    pub fn reading(&self) -> SensorReading {
        SensorReading {
            entry_blocked: self.entry_blocked.load(Ordering::Relaxed),
            exit_blocked: self.exit_blocked.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    #[error("serial link unavailable")]
    LinkDown,
    #[error("no sensor reply within timeout")]
    Timeout,
}

/// Source of fresh sensor readings
#[async_trait]
pub trait SensorProbe: Send + Sync {
    async fn query_snapshot(&self) -> Result<SensorReading, SnapshotError>;
}

pub struct SensorOracle {
    commander: Arc<dyn GateCommander>,
    /// Latch for the outstanding query; the reader side completes it
    pending: parking_lot::Mutex<Option<oneshot::Sender<SensorReading>>>,
    /// One query in flight at a time
    query_lock: tokio::sync::Mutex<()>,
    timeout: Duration,
    metrics: Arc<Metrics>,
}

impl SensorOracle {
    pub fn new(commander: Arc<dyn GateCommander>, timeout: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            commander,
            pending: parking_lot::Mutex::new(None),
            query_lock: tokio::sync::Mutex::new(()),
            timeout,
            metrics,
        }
    }

    /// Ask the controller for a fresh reading and wait up to `timeout` for it.
    ///
    /// Queries are serialized, so each caller gets the reply to its own
    /// `CMD:SENSORS`; never a stale or borrowed value.
    pub async fn query_with_timeout(&self, timeout: Duration) -> Result<SensorReading, SnapshotError> {
        let _serial = self.query_lock.lock().await;
        let started = Instant::now();

        let (tx, rx) = oneshot::channel();
        *self.pending.lock() = Some(tx);

        if !self.commander.send_command(Command::Sensors).await {
            self.pending.lock().take();
            return Err(SnapshotError::LinkDown);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reading)) => {
                debug!(
                    entry = reading.entry_blocked,
                    exit = reading.exit_blocked,
                    latency_ms = %started.elapsed().as_millis(),
                    "sensor_snapshot"
                );
                Ok(reading)
            }
            _ => {
                self.pending.lock().take();
                self.metrics.record_snapshot_timeout();
                warn!(timeout_ms = %timeout.as_millis(), "sensor_snapshot_timeout");
                Err(SnapshotError::Timeout)
            }
        }
    }

    /// Complete the outstanding query, if any. Called from the reader side.
    pub fn deliver(&self, reading: SensorReading) -> bool {
        match self.pending.lock().take() {
            Some(tx) => tx.send(reading).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl SensorProbe for SensorOracle {
    async fn query_snapshot(&self) -> Result<SensorReading, SnapshotError> {
        self.query_with_timeout(self.timeout).await
    }
}
