//! Shared health state for the /health endpoint.
//! Updated by the scheduler and the DB writer.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Shared health counters. Written by background tasks, read by the API.
#[derive(Default)]
pub struct HealthState {
    pub scans_completed: AtomicU64,
    pub scans_failed: AtomicU64,
    pub alerts_fired: AtomicU64,
    /// Unix seconds of the last finished scan (0 = none yet).
    pub last_scan_at: AtomicI64,
    /// Approximate count of writes queued for the DB writer.
    pub write_queue_pending: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub scans_completed: u64,
    pub scans_failed: u64,
    pub alerts_fired: u64,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub write_queue_pending: u64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_scan(&self, ok: bool, at: DateTime<Utc>) {
        if ok {
            self.scans_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.scans_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.last_scan_at.store(at.timestamp(), Ordering::Relaxed);
    }

    pub fn inc_alerts_fired(&self) {
        self.alerts_fired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_write_queue_pending(&self) {
        self.write_queue_pending.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_write_queue_pending(&self) {
        // Saturate: a send that failed after inc must not wrap the counter.
        let _ = self
            .write_queue_pending
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
    }

    pub fn alerts_fired(&self) -> u64 {
        self.alerts_fired.load(Ordering::Relaxed)
    }

    pub fn write_queue_pending(&self) -> u64 {
        self.write_queue_pending.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let last = self.last_scan_at.load(Ordering::Relaxed);
        HealthSnapshot {
            status: "ok",
            scans_completed: self.scans_completed.load(Ordering::Relaxed),
            scans_failed: self.scans_failed.load(Ordering::Relaxed),
            alerts_fired: self.alerts_fired(),
            last_scan_at: (last > 0).then(|| DateTime::from_timestamp(last, 0)).flatten(),
            write_queue_pending: self.write_queue_pending(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let health = HealthState::new();
        assert!(health.snapshot().last_scan_at.is_none());

        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        health.record_scan(true, at);
        health.record_scan(false, at);
        health.inc_alerts_fired();

        let snap = health.snapshot();
        assert_eq!(snap.scans_completed, 1);
        assert_eq!(snap.scans_failed, 1);
        assert_eq!(snap.alerts_fired, 1);
        assert_eq!(snap.last_scan_at, Some(at));
    }

    #[test]
    fn queue_counter_never_wraps() {
        let health = HealthState::new();
        health.dec_write_queue_pending();
        assert_eq!(health.write_queue_pending(), 0);
        health.inc_write_queue_pending();
        health.inc_write_queue_pending();
        health.dec_write_queue_pending();
        assert_eq!(health.write_queue_pending(), 1);
    }
}
