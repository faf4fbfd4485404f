//! # leasepool
//!
//! Lease-based resource pool: a bounded set of expensive-to-create handles,
//! handed out under a lease contract and reclaimed on release.
//!
//! ## Features
//!
//! - Thread-safe lease tracking: no handle is ever leased to two callers
//! - Lazy handle materialization through a pluggable factory, off the lock
//! - Proactive top-off once the available queue drains
//! - Configurable blocking retry when the pool is exhausted (async variant
//!   available)
//! - Lease proxies that go dark on release, so stale references fail loudly
//! - Lazy max-age and max-idle eviction, checked at acquisition time
//! - Optional flush hook before a handle returns to the pool
//! - JSON-backed configuration sources
//! - Health snapshots and Prometheus-format metrics export
//!
//! ## Quick Start
//!
//! ```rust
//! use leasepool::{ConnectionParams, Handle, HandleError, Pool, PoolConfig};
//!
//! struct Conn;
//! impl Handle for Conn {}
//!
//! let pool = Pool::new(
//!     |_: &ConnectionParams| Ok::<_, HandleError>(Conn),
//!     ConnectionParams::new("db://localhost"),
//!     PoolConfig::new().with_max_pool_size(4),
//! )
//! .unwrap();
//!
//! let lease = pool.acquire().unwrap().expect("pool exhausted");
//! let _conn = lease.handle().unwrap();
//! drop(_conn);
//! pool.release(&lease).unwrap();
//! assert!(!lease.is_valid());
//! ```

mod config;
mod errors;
mod eviction;
mod factory;
mod health;
mod metrics;
mod pool;

pub use config::{ConfigError, ConnectionParams, PoolConfig};
pub use errors::{HandleError, PoolError, PoolResult};
pub use eviction::EvictionPolicy;
pub use factory::{Handle, HandleFactory};
pub use health::PoolHealth;
pub use metrics::{MetricsExporter, PoolMetrics};
pub use pool::{DirectPool, HandleGuard, LeaseProxy, Pool};
