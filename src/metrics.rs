//! Metrics collection and export for lease pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Snapshot of a pool's counters and gauges.
///
/// # Examples
///
/// ```
/// use leasepool::{ConnectionParams, Handle, HandleError, Pool, PoolConfig};
///
/// struct Conn;
/// impl Handle for Conn {}
///
/// let pool = Pool::new(
///     |_: &ConnectionParams| Ok::<_, HandleError>(Conn),
///     ConnectionParams::default(),
///     PoolConfig::default(),
/// )
/// .unwrap();
///
/// let lease = pool.acquire().unwrap().unwrap();
/// let metrics = pool.metrics();
/// assert_eq!(metrics.total_acquired, 1);
/// assert_eq!(metrics.leased, 1);
/// # pool.release(&lease).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Leases granted over the pool's lifetime.
    pub total_acquired: usize,

    /// Leases returned over the pool's lifetime.
    pub total_released: usize,

    /// Handles materialized by the factory.
    pub handles_created: usize,

    /// Handles discarded by age or idle eviction.
    pub handles_evicted: usize,

    /// Acquire calls that found the pool exhausted after all retries.
    pub exhaustion_events: usize,

    /// Retry rounds slept through while waiting for a handle.
    pub retry_rounds: usize,

    /// Flush hook failures during release.
    pub flush_failures: usize,

    /// Handles currently leased out.
    pub leased: usize,

    /// Handles currently in the available queue.
    pub available: usize,

    /// Leased entries over maximum capacity, 0.0 to 1.0.
    pub utilization: f64,

    /// Configured maximum pool size.
    pub max_size: usize,
}

impl PoolMetrics {
    /// Export metrics as a string map.
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_acquired".to_string(), self.total_acquired.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("handles_created".to_string(), self.handles_created.to_string());
        metrics.insert("handles_evicted".to_string(), self.handles_evicted.to_string());
        metrics.insert("exhaustion_events".to_string(), self.exhaustion_events.to_string());
        metrics.insert("retry_rounds".to_string(), self.retry_rounds.to_string());
        metrics.insert("flush_failures".to_string(), self.flush_failures.to_string());
        metrics.insert("leased".to_string(), self.leased.to_string());
        metrics.insert("available".to_string(), self.available.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics.insert("max_size".to_string(), self.max_size.to_string());
        metrics
    }
}

/// Exporter for the Prometheus text exposition format.
pub struct MetricsExporter;

impl MetricsExporter {
    /// Render metrics in Prometheus exposition format, labelled with the pool
    /// name and any extra tags.
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let mut output = String::new();
        let labels = Self::format_labels(pool_name, tags);

        // Gauges
        output.push_str("# HELP leasepool_handles_leased Handles currently leased\n");
        output.push_str("# TYPE leasepool_handles_leased gauge\n");
        output.push_str(&format!("leasepool_handles_leased{{{}}} {}\n", labels, metrics.leased));

        output.push_str("# HELP leasepool_handles_available Handles currently available\n");
        output.push_str("# TYPE leasepool_handles_available gauge\n");
        output.push_str(&format!("leasepool_handles_available{{{}}} {}\n", labels, metrics.available));

        output.push_str("# HELP leasepool_utilization Pool utilization ratio\n");
        output.push_str("# TYPE leasepool_utilization gauge\n");
        output.push_str(&format!("leasepool_utilization{{{}}} {:.2}\n", labels, metrics.utilization));

        // Counters
        output.push_str("# HELP leasepool_acquired_total Leases granted\n");
        output.push_str("# TYPE leasepool_acquired_total counter\n");
        output.push_str(&format!("leasepool_acquired_total{{{}}} {}\n", labels, metrics.total_acquired));

        output.push_str("# HELP leasepool_released_total Leases returned\n");
        output.push_str("# TYPE leasepool_released_total counter\n");
        output.push_str(&format!("leasepool_released_total{{{}}} {}\n", labels, metrics.total_released));

        output.push_str("# HELP leasepool_handles_created_total Handles materialized by the factory\n");
        output.push_str("# TYPE leasepool_handles_created_total counter\n");
        output.push_str(&format!("leasepool_handles_created_total{{{}}} {}\n", labels, metrics.handles_created));

        output.push_str("# HELP leasepool_handles_evicted_total Handles discarded by eviction\n");
        output.push_str("# TYPE leasepool_handles_evicted_total counter\n");
        output.push_str(&format!("leasepool_handles_evicted_total{{{}}} {}\n", labels, metrics.handles_evicted));

        output.push_str("# HELP leasepool_exhaustion_events_total Acquires that found no handle\n");
        output.push_str("# TYPE leasepool_exhaustion_events_total counter\n");
        output.push_str(&format!("leasepool_exhaustion_events_total{{{}}} {}\n", labels, metrics.exhaustion_events));

        output.push_str("# HELP leasepool_retry_rounds_total Retry rounds slept through\n");
        output.push_str("# TYPE leasepool_retry_rounds_total counter\n");
        output.push_str(&format!("leasepool_retry_rounds_total{{{}}} {}\n", labels, metrics.retry_rounds));

        output.push_str("# HELP leasepool_flush_failures_total Flush hook failures during release\n");
        output.push_str("# TYPE leasepool_flush_failures_total counter\n");
        output.push_str(&format!("leasepool_flush_failures_total{{{}}} {}\n", labels, metrics.flush_failures));

        output
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(tags) = tags {
            for (key, value) in tags {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

/// Internal counter set.
#[derive(Default)]
pub(crate) struct MetricsTracker {
    pub total_acquired: AtomicUsize,
    pub total_released: AtomicUsize,
    pub handles_created: AtomicUsize,
    pub handles_evicted: AtomicUsize,
    pub exhaustion_events: AtomicUsize,
    pub retry_rounds: AtomicUsize,
    pub flush_failures: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, leased: usize, available: usize, max_size: usize) -> PoolMetrics {
        let utilization = if max_size > 0 {
            leased as f64 / max_size as f64
        } else {
            0.0
        };

        PoolMetrics {
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
            handles_created: self.handles_created.load(Ordering::Relaxed),
            handles_evicted: self.handles_evicted.load(Ordering::Relaxed),
            exhaustion_events: self.exhaustion_events.load(Ordering::Relaxed),
            retry_rounds: self.retry_rounds.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            leased,
            available,
            utilization,
            max_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PoolMetrics {
        let tracker = MetricsTracker::new();
        MetricsTracker::incr(&tracker.total_acquired);
        MetricsTracker::incr(&tracker.total_acquired);
        MetricsTracker::incr(&tracker.total_released);
        MetricsTracker::incr(&tracker.handles_created);
        tracker.snapshot(1, 1, 4)
    }

    #[test]
    fn snapshot_reflects_counters() {
        let metrics = sample();
        assert_eq!(metrics.total_acquired, 2);
        assert_eq!(metrics.total_released, 1);
        assert_eq!(metrics.handles_created, 1);
        assert_eq!(metrics.utilization, 0.25);
    }

    #[test]
    fn export_map_has_all_keys() {
        let exported = sample().export();
        assert_eq!(exported["total_acquired"], "2");
        assert_eq!(exported["utilization"], "0.25");
        assert_eq!(exported.len(), 11);
    }

    #[test]
    fn prometheus_format_includes_labels() {
        let mut tags = HashMap::new();
        tags.insert("service".to_string(), "api".to_string());

        let output = MetricsExporter::export_prometheus(&sample(), "orders", Some(&tags));
        assert!(output.contains("leasepool_handles_leased{"));
        assert!(output.contains("pool=\"orders\""));
        assert!(output.contains("service=\"api\""));
        assert!(output.contains("leasepool_acquired_total"));
    }
}
