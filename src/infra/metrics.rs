//! Lock-free poller metrics and periodic reporting
//!
//! NOTE: All atomics use Relaxed ordering intentionally; these are
//! statistical counters only. Do NOT use them for coordination.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Lock-free metrics collector shared by the poller and coordinator
pub struct Metrics {
    /// Valid fixes dispatched to the registry (monotonic)
    fixes_dispatched: AtomicU64,
    /// Reports that failed validation (monotonic)
    fixes_rejected: AtomicU64,
    /// Poll cycles with no data inside the poll timeout (monotonic)
    timeouts: AtomicU64,
    /// ARRIVE events delivered (monotonic)
    arrivals: AtomicU64,
    /// DEPART events delivered (monotonic)
    departures: AtomicU64,
    /// Dispatches since last report (reset on report)
    dispatches_since_report: AtomicU64,
    /// Sum of dispatch latencies in microseconds (reset on report)
    dispatch_latency_sum_us: AtomicU64,
    /// Max dispatch latency in microseconds (reset on report)
    dispatch_latency_max_us: AtomicU64,
    /// Last report time (only touched by the reporter)
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
            fixes_dispatched: AtomicU64::new(0),
            fixes_rejected: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            arrivals: AtomicU64::new(0),
            departures: AtomicU64::new(0),
            dispatches_since_report: AtomicU64::new(0),
            dispatch_latency_sum_us: AtomicU64::new(0),
            dispatch_latency_max_us: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record one dispatch and the events it produced
    #[inline]
    pub fn record_dispatch(&self, latency_us: u64, arrivals: u64, departures: u64) {
        self.fixes_dispatched.fetch_add(1, Ordering::Relaxed);
        self.dispatches_since_report.fetch_add(1, Ordering::Relaxed);
        self.dispatch_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.dispatch_latency_max_us, latency_us);
        self.arrivals.fetch_add(arrivals, Ordering::Relaxed);
        self.departures.fetch_add(departures, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_rejected(&self) {
        self.fixes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fixes_dispatched(&self) -> u64 {
        self.fixes_dispatched.load(Ordering::Relaxed)
    }

    pub fn fixes_rejected(&self) -> u64 {
        self.fixes_rejected.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn arrivals(&self) -> u64 {
        self.arrivals.load(Ordering::Relaxed)
    }

    pub fn departures(&self) -> u64 {
        self.departures.load(Ordering::Relaxed)
    }

    /// Snapshot counters, resetting the per-interval ones
    pub fn report(&self, watches: usize) -> MetricsSummary {
        let dispatches = self.dispatches_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.dispatch_latency_sum_us.swap(0, Ordering::Relaxed);
        let latency_max = self.dispatch_latency_max_us.swap(0, Ordering::Relaxed);

        let elapsed_secs = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed().as_secs_f64();
            *last = Instant::now();
            elapsed
        };

        MetricsSummary {
            watches,
            fixes_dispatched: self.fixes_dispatched(),
            fixes_rejected: self.fixes_rejected(),
            timeouts: self.timeouts(),
            arrivals: self.arrivals(),
            departures: self.departures(),
            fixes_per_sec: if elapsed_secs > 0.0 { dispatches as f64 / elapsed_secs } else { 0.0 },
            avg_dispatch_us: if dispatches > 0 { latency_sum / dispatches } else { 0 },
            max_dispatch_us: latency_max,
        }
    }
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub watches: usize,
    pub fixes_dispatched: u64,
    pub fixes_rejected: u64,
    pub timeouts: u64,
    pub arrivals: u64,
    pub departures: u64,
    pub fixes_per_sec: f64,
    pub avg_dispatch_us: u64,
    pub max_dispatch_us: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            watches = %self.watches,
            fixes_dispatched = %self.fixes_dispatched,
            fixes_rejected = %self.fixes_rejected,
            timeouts = %self.timeouts,
            arrivals = %self.arrivals,
            departures = %self.departures,
            fixes_per_sec = %format!("{:.2}", self.fixes_per_sec),
            avg_dispatch_us = %self.avg_dispatch_us,
            max_dispatch_us = %self.max_dispatch_us,
            "metrics"
        );
    }
}
