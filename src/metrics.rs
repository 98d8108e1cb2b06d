use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;

/// Global runtime metrics for the daemon.
///
/// Purpose:
/// - Track discovered / scheduled collectors
/// - Track dispatcher ticks
/// - Track detached job launches and their outcome
/// - Track failures caught by the dispatcher
///
/// Design:
/// - Lock-free (Atomics)
/// - Cheap to update
/// - Safe in async + multithreaded contexts
#[derive(Default)]
pub struct RuntimeMetrics {
    // Registry
    pub collectors_discovered: AtomicUsize,
    pub collectors_scheduled: AtomicUsize,

    // Dispatcher
    pub ticks: AtomicUsize,
    pub catch_up_failures: AtomicUsize,
    pub tick_failures: AtomicUsize,

    // Detached jobs
    pub jobs_launched: AtomicUsize,
    pub jobs_completed: AtomicUsize,
    pub jobs_failed: AtomicUsize,
}

impl RuntimeMetrics {
    /// One-line summary, used by the periodic reporter.
    pub fn summary(&self) -> String {
        format!(
            "collectors={} scheduled={} ticks={} launched={} completed={} failed={} catch_up_err={} tick_err={}",
            self.collectors_discovered.load(Ordering::Relaxed),
            self.collectors_scheduled.load(Ordering::Relaxed),
            self.ticks.load(Ordering::Relaxed),
            self.jobs_launched.load(Ordering::Relaxed),
            self.jobs_completed.load(Ordering::Relaxed),
            self.jobs_failed.load(Ordering::Relaxed),
            self.catch_up_failures.load(Ordering::Relaxed),
            self.tick_failures.load(Ordering::Relaxed),
        )
    }
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> =
    Lazy::new(|| Arc::new(RuntimeMetrics::default()));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_reports_counters() {
        let metrics = RuntimeMetrics::default();
        metrics.jobs_launched.fetch_add(3, Ordering::Relaxed);
        metrics.jobs_failed.fetch_add(1, Ordering::Relaxed);

        let line = metrics.summary();
        assert!(line.contains("launched=3"));
        assert!(line.contains("failed=1"));
        assert!(line.contains("ticks=0"));
    }
}
