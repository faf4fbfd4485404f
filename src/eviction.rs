//! Time-based eviction of pooled handles
//!
//! Eviction is lazy: an entry's age and idle time are inspected only when the
//! entry is considered for lease, never by a background timer. A handle can
//! therefore sit past its threshold indefinitely if nothing calls `acquire`.
//! This is a documented limitation of the design, not a defect.

use std::time::{Duration, Instant};

use crate::config::PoolConfig;

/// Policy deciding when an unleased handle is discarded instead of leased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Handles live forever.
    #[default]
    None,

    /// Discard handles older than the given age, counted from creation.
    MaxAge(Duration),

    /// Discard handles that have sat unleased longer than the given duration,
    /// counted from the moment they entered the available queue.
    MaxIdle(Duration),

    /// Discard on whichever of age or idle trips first.
    Combined { max_age: Duration, max_idle: Duration },
}

impl EvictionPolicy {
    /// Derive the policy from the configured thresholds.
    pub fn from_config(config: &PoolConfig) -> Self {
        match (config.max_handle_age, config.max_idle) {
            (Some(max_age), Some(max_idle)) => Self::Combined { max_age, max_idle },
            (Some(max_age), None) => Self::MaxAge(max_age),
            (None, Some(max_idle)) => Self::MaxIdle(max_idle),
            (None, None) => Self::None,
        }
    }

    /// Whether an entry created at `created_at` and idle since `idle_since`
    /// has outstayed its welcome.
    pub fn is_expired(&self, created_at: Instant, idle_since: Option<Instant>) -> bool {
        let idle_exceeds = |limit: &Duration| {
            idle_since.is_some_and(|since| since.elapsed() > *limit)
        };
        match self {
            Self::None => false,
            Self::MaxAge(max_age) => created_at.elapsed() > *max_age,
            Self::MaxIdle(max_idle) => idle_exceeds(max_idle),
            Self::Combined { max_age, max_idle } => {
                created_at.elapsed() > *max_age || idle_exceeds(max_idle)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_derived_from_config() {
        assert_eq!(
            EvictionPolicy::from_config(&PoolConfig::default()),
            EvictionPolicy::None
        );

        let config = PoolConfig::new().with_max_handle_age(Duration::from_secs(1));
        assert_eq!(
            EvictionPolicy::from_config(&config),
            EvictionPolicy::MaxAge(Duration::from_secs(1))
        );

        let config = PoolConfig::new()
            .with_max_handle_age(Duration::from_secs(1))
            .with_max_idle(Duration::from_secs(2));
        assert_eq!(
            EvictionPolicy::from_config(&config),
            EvictionPolicy::Combined {
                max_age: Duration::from_secs(1),
                max_idle: Duration::from_secs(2),
            }
        );
    }

    #[test]
    fn no_policy_never_expires() {
        let old = Instant::now() - Duration::from_millis(500);
        assert!(!EvictionPolicy::None.is_expired(old, Some(old)));
    }

    #[test]
    fn max_age_counts_from_creation() {
        let policy = EvictionPolicy::MaxAge(Duration::from_millis(10));
        let old = Instant::now() - Duration::from_millis(50);
        assert!(policy.is_expired(old, None));
        assert!(!policy.is_expired(Instant::now(), None));
    }

    #[test]
    fn max_idle_counts_from_queue_entry() {
        let policy = EvictionPolicy::MaxIdle(Duration::from_millis(10));
        let old = Instant::now() - Duration::from_millis(50);
        // a leased entry has no idle clock
        assert!(!policy.is_expired(old, None));
        assert!(policy.is_expired(old, Some(old)));
        assert!(!policy.is_expired(old, Some(Instant::now())));
    }

    #[test]
    fn combined_trips_on_either() {
        let policy = EvictionPolicy::Combined {
            max_age: Duration::from_secs(3600),
            max_idle: Duration::from_millis(10),
        };
        let now = Instant::now();
        let idle_old = now - Duration::from_millis(50);
        assert!(policy.is_expired(now, Some(idle_old)));
        assert!(!policy.is_expired(now, Some(now)));
    }
}
