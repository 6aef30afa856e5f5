//! Lock-free counters and periodic reporting
//!
//! NOTE: All atomics use Relaxed ordering; these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Counters for the serial link, fan-out and claim protocols
pub struct Metrics {
    frames_rx: AtomicU64,
    frames_unrecognized: AtomicU64,
    commands_sent: AtomicU64,
    commands_failed: AtomicU64,
    reconnects: AtomicU64,
    snapshot_timeouts: AtomicU64,
    observers_pruned: AtomicU64,
    messages_dropped: AtomicU64,
    claims_granted: AtomicU64,
    claims_rejected: AtomicU64,
    rollbacks: AtomicU64,
    /// Frames received since last report (reset on report)
    frames_since_report: AtomicU64,
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            frames_rx: AtomicU64::new(0),
            frames_unrecognized: AtomicU64::new(0),
            commands_sent: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            snapshot_timeouts: AtomicU64::new(0),
            observers_pruned: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            claims_granted: AtomicU64::new(0),
            claims_rejected: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
            frames_since_report: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_frame(&self) {
        self.frames_rx.fetch_add(1, Ordering::Relaxed);
        self.frames_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_unrecognized(&self) {
        self.frames_unrecognized.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_command(&self, ok: bool) {
        if ok {
            self.commands_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.commands_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_snapshot_timeout(&self) {
        self.snapshot_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_observer_pruned(&self) {
        self.observers_pruned.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_claim(&self, granted: bool) {
        if granted {
            self.claims_granted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.claims_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_rx(&self) -> u64 {
        self.frames_rx.load(Ordering::Relaxed)
    }

    pub fn commands_sent(&self) -> u64 {
        self.commands_sent.load(Ordering::Relaxed)
    }

    pub fn commands_failed(&self) -> u64 {
        self.commands_failed.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn observers_pruned(&self) -> u64 {
        self.observers_pruned.load(Ordering::Relaxed)
    }

    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    /// Snapshot all counters, resetting the per-interval rate
    pub fn report(&self, observers: usize) -> MetricsSummary {
        let now = Instant::now();
        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = now.duration_since(*last);
            *last = now;
            elapsed
        };
        let interval_frames = self.frames_since_report.swap(0, Ordering::Relaxed);
        let secs = elapsed.as_secs_f64();
        let frames_per_sec = if secs > 0.0 { interval_frames as f64 / secs } else { 0.0 };

        MetricsSummary {
            frames_rx: self.frames_rx.load(Ordering::Relaxed),
            frames_per_sec,
            frames_unrecognized: self.frames_unrecognized.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            snapshot_timeouts: self.snapshot_timeouts.load(Ordering::Relaxed),
            observers,
            observers_pruned: self.observers_pruned.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            claims_granted: self.claims_granted.load(Ordering::Relaxed),
            claims_rejected: self.claims_rejected.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub frames_rx: u64,
    pub frames_per_sec: f64,
    pub frames_unrecognized: u64,
    pub commands_sent: u64,
    pub commands_failed: u64,
    pub reconnects: u64,
    pub snapshot_timeouts: u64,
    pub observers: usize,
    pub observers_pruned: u64,
    pub messages_dropped: u64,
    pub claims_granted: u64,
    pub claims_rejected: u64,
    pub rollbacks: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            frames_rx = %self.frames_rx,
            frames_per_sec = %format!("{:.2}", self.frames_per_sec),
            frames_unrecognized = %self.frames_unrecognized,
            commands_sent = %self.commands_sent,
            commands_failed = %self.commands_failed,
            reconnects = %self.reconnects,
            snapshot_timeouts = %self.snapshot_timeouts,
            observers = %self.observers,
            observers_pruned = %self.observers_pruned,
            messages_dropped = %self.messages_dropped,
            claims_granted = %self.claims_granted,
            claims_rejected = %self.claims_rejected,
            rollbacks = %self.rollbacks,
            "metrics"
        );
    }
}
