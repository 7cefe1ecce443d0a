//! Runtime counters for the worker pool and the coroutines running on it.
//!
//! With the `telemetry` feature off, a zero-cost stub with the same API is
//! compiled instead so call sites never need their own `cfg`.

#[cfg(feature = "telemetry")]
pub mod metrics;

#[cfg(feature = "telemetry")]
pub use metrics::{Metrics, MetricsSnapshot};

#[cfg(not(feature = "telemetry"))]
pub mod metrics {
    #[derive(Debug, Default)]
    pub struct Metrics;

    impl Metrics {
        pub fn new() -> Self { Self }
        pub fn record_task_execution(&self, _: u64) {}
        pub fn record_task_stolen(&self) {}
        pub fn record_task_panic(&self) {}
        pub fn record_coroutine_spawned(&self) {}
        pub fn record_coroutine_resumed(&self) {}
        pub fn record_coroutine_finished(&self, _: bool) {}
        pub fn snapshot(&self) -> MetricsSnapshot { MetricsSnapshot::default() }
        pub fn reset(&self) {}
    }

    #[derive(Debug, Clone, Default)]
    pub struct MetricsSnapshot {
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
        pub uptime: std::time::Duration,
    }

    impl MetricsSnapshot {
        pub fn coroutines_in_flight(&self) -> u64 { 0 }
        pub fn tasks_per_second(&self) -> f64 { 0.0 }
    }
}

#[cfg(not(feature = "telemetry"))]
pub use metrics::{Metrics, MetricsSnapshot};
