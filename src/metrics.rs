use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct Metrics {
    calls_granted: Arc<AtomicU64>,
    calls_denied: Arc<AtomicU64>,
    refills: Arc<AtomicU64>,
    waits: Arc<AtomicU64>,
    wait_micros: Arc<AtomicU64>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub calls_granted: u64,
    pub calls_denied: u64,
    pub refills: u64,
    pub waits: u64,
    pub time_waited: Duration,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_granted(&self) {
        self.calls_granted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_denied(&self) {
        self.calls_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refill(&self) {
        self.refills.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wait(&self, duration: Duration) {
        self.waits.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.wait_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            calls_granted: self.calls_granted.load(Ordering::Relaxed),
            calls_denied: self.calls_denied.load(Ordering::Relaxed),
            refills: self.refills.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            time_waited: Duration::from_micros(self.wait_micros.load(Ordering::Relaxed)),
        }
    }

    pub fn log_summary(&self) {
        let snap = self.snapshot();
        info!(
            calls_granted = snap.calls_granted,
            calls_denied = snap.calls_denied,
            refills = snap.refills,
            waits = snap.waits,
            time_waited_ms = snap.time_waited.as_millis() as u64,
            "Rate limit metrics"
        );
    }
}
