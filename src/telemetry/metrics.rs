//! Metrics collection for runtime monitoring.

use hdrhistogram::Histogram;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Runtime metrics collector
#[derive(Debug)]
pub struct Metrics {
    // Pool jobs
    tasks_executed: AtomicU64,
    tasks_stolen: AtomicU64,
    tasks_panicked: AtomicU64,

    // Coroutines
    coroutines_spawned: AtomicU64,
    coroutines_resumed: AtomicU64,
    coroutines_completed: AtomicU64,
    coroutines_failed: AtomicU64,

    // Submit-to-finish latency of pool jobs
    latency_histogram: RwLock<Histogram<u64>>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        // 3 significant figures, max value of 1 hour in nanoseconds
        let histogram = Histogram::new_with_max(3_600_000_000_000, 3)
            .expect("Failed to create histogram");

        Self {
            tasks_executed: AtomicU64::new(0),
            tasks_stolen: AtomicU64::new(0),
            tasks_panicked: AtomicU64::new(0),
            coroutines_spawned: AtomicU64::new(0),
            coroutines_resumed: AtomicU64::new(0),
            coroutines_completed: AtomicU64::new(0),
            coroutines_failed: AtomicU64::new(0),
            latency_histogram: RwLock::new(histogram),
            start_time: Instant::now(),
        }
    }

    /// Record a finished job and its submit-to-finish latency
    pub fn record_task_execution(&self, latency_ns: u64) {
        self.tasks_executed.fetch_add(1, Ordering::Relaxed);

        if let Some(mut hist) = self.latency_histogram.try_write() {
            let _ = hist.record(latency_ns);
        }
    }

    pub fn record_task_stolen(&self) {
        self.tasks_stolen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_panic(&self) {
        self.tasks_panicked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coroutine_spawned(&self) {
        self.coroutines_spawned.fetch_add(1, Ordering::Relaxed);
    }

    /// A parked coroutine came back from a suspension point
    pub fn record_coroutine_resumed(&self) {
        self.coroutines_resumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coroutine_finished(&self, ok: bool) {
        if ok {
            self.coroutines_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.coroutines_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let histogram = self.latency_histogram.read();

        MetricsSnapshot {
            timestamp: Instant::now(),
            uptime: self.start_time.elapsed(),
            tasks_executed: self.tasks_executed.load(Ordering::Relaxed),
            tasks_stolen: self.tasks_stolen.load(Ordering::Relaxed),
            tasks_panicked: self.tasks_panicked.load(Ordering::Relaxed),
            coroutines_spawned: self.coroutines_spawned.load(Ordering::Relaxed),
            coroutines_resumed: self.coroutines_resumed.load(Ordering::Relaxed),
            coroutines_completed: self.coroutines_completed.load(Ordering::Relaxed),
            coroutines_failed: self.coroutines_failed.load(Ordering::Relaxed),
            avg_latency_ns: if histogram.len() > 0 {
                histogram.mean() as u64
            } else {
                0
            },
            p50_latency_ns: histogram.value_at_quantile(0.50),
            p99_latency_ns: histogram.value_at_quantile(0.99),
            max_latency_ns: histogram.max(),
        }
    }

    pub fn reset(&self) {
        self.tasks_executed.store(0, Ordering::Relaxed);
        self.tasks_stolen.store(0, Ordering::Relaxed);
        self.tasks_panicked.store(0, Ordering::Relaxed);
        self.coroutines_spawned.store(0, Ordering::Relaxed);
        self.coroutines_resumed.store(0, Ordering::Relaxed);
        self.coroutines_completed.store(0, Ordering::Relaxed);
        self.coroutines_failed.store(0, Ordering::Relaxed);

        if let Some(mut hist) = self.latency_histogram.try_write() {
            hist.reset();
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub timestamp: Instant,
    pub uptime: Duration,
    pub tasks_executed: u64,
    pub tasks_stolen: u64,
    pub tasks_panicked: u64,
    pub coroutines_spawned: u64,
    pub coroutines_resumed: u64,
    pub coroutines_completed: u64,
    pub coroutines_failed: u64,
    pub avg_latency_ns: u64,
    pub p50_latency_ns: u64,
    pub p99_latency_ns: u64,
    pub max_latency_ns: u64,
}

impl MetricsSnapshot {
    /// Coroutines spawned but not yet finished
    pub fn coroutines_in_flight(&self) -> u64 {
        self.coroutines_spawned
            .saturating_sub(self.coroutines_completed + self.coroutines_failed)
    }

    pub fn tasks_per_second(&self) -> f64 {
        let seconds = self.uptime.as_secs_f64();
        if seconds == 0.0 {
            return 0.0;
        }
        self.tasks_executed as f64 / seconds
    }
}
