//! Health snapshots for lease pools

/// Point-in-time health of a pool.
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
///     PoolConfig::new().with_max_pool_size(4).with_initial_pool_size(2),
/// )
/// .unwrap();
///
/// let health = pool.health();
/// assert!(health.is_healthy());
/// assert_eq!(health.available, 2);
/// ```
#[derive(Debug, Clone)]
pub struct PoolHealth {
    /// Whether the pool is in a usable, non-degraded state.
    pub is_healthy: bool,

    /// Leased entries over maximum capacity, 0.0 to 1.0.
    pub utilization: f64,

    /// Handles sitting in the available queue.
    pub available: usize,

    /// Handles currently leased out.
    pub leased: usize,

    /// Entries that exist, leased or not.
    pub size: usize,

    /// Configured maximum pool size.
    pub max_size: usize,

    /// Human-readable warnings for anything degraded.
    pub warnings: Vec<String>,
}

impl PoolHealth {
    pub(crate) fn new(
        available: usize,
        leased: usize,
        size: usize,
        max_size: usize,
        shutdown: bool,
    ) -> Self {
        let utilization = if max_size > 0 {
            leased as f64 / max_size as f64
        } else {
            0.0
        };

        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if shutdown {
            warnings.push("pool is shut down".to_string());
            is_healthy = false;
        }

        if utilization > 0.9 {
            warnings.push(format!("high utilization: {:.1}%", utilization * 100.0));
            is_healthy = false;
        }

        if available == 0 && size >= max_size && !shutdown {
            warnings.push("pool exhausted: no handles available".to_string());
        }

        Self {
            is_healthy,
            utilization,
            available,
            leased,
            size,
            max_size,
            warnings,
        }
    }

    /// Check if the pool is healthy.
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_pool_is_healthy() {
        let health = PoolHealth::new(2, 0, 2, 4, false);
        assert!(health.is_healthy());
        assert!(health.warnings.is_empty());
        assert_eq!(health.utilization, 0.0);
    }

    #[test]
    fn full_lease_load_degrades_health() {
        let health = PoolHealth::new(0, 4, 4, 4, false);
        assert!(!health.is_healthy());
        assert_eq!(health.utilization, 1.0);
        assert!(health.warnings.iter().any(|w| w.contains("utilization")));
        assert!(health.warnings.iter().any(|w| w.contains("exhausted")));
    }

    #[test]
    fn shutdown_pool_is_unhealthy() {
        let health = PoolHealth::new(0, 0, 0, 4, true);
        assert!(!health.is_healthy());
        assert!(health.warnings.iter().any(|w| w.contains("shut down")));
    }
}
