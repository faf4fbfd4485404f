//! Core lease pool engine

use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::{ConnectionParams, PoolConfig};
use crate::errors::{PoolError, PoolResult};
use crate::eviction::EvictionPolicy;
use crate::factory::{Handle, HandleFactory};
use crate::health::PoolHealth;
use crate::metrics::{MetricsExporter, MetricsTracker, PoolMetrics};

/// One slot's worth of pooled resource: the handle plus its lease metadata.
struct PoolEntry<H> {
    id: Uuid,
    /// Absent until lazily materialized; created at most once per entry.
    handle: Option<Arc<Mutex<H>>>,
    leased: bool,
    created_at: Instant,
    leased_at: Option<Instant>,
    /// Set when the entry enters the available queue; the idle clock for
    /// eviction starts at release, not at last use.
    idle_since: Option<Instant>,
    /// Validity flag of the currently outstanding lease, if any.
    lease_flag: Option<Arc<AtomicBool>>,
}

impl<H> PoolEntry<H> {
    fn new(leased: bool) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            handle: None,
            leased,
            created_at: now,
            leased_at: leased.then_some(now),
            idle_since: (!leased).then_some(now),
            lease_flag: None,
        }
    }
}

/// Entry table and available queue. All transitions between "available" and
/// "leased" happen atomically under the pool's single mutex; this is the sole
/// guarantee that no handle is ever leased to two callers at once.
struct PoolState<H> {
    entries: HashMap<Uuid, PoolEntry<H>>,
    available: VecDeque<Uuid>,
    shutdown: bool,
}

/// Lease-based pool of expensive-to-create handles.
///
/// Handles are materialized lazily through a [`HandleFactory`], handed out
/// wrapped in a [`LeaseProxy`], and reclaimed on [`release`](Pool::release).
/// The factory call and the retry wait run outside the state lock, so slow
/// handle creation never blocks unrelated acquire/release traffic.
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
///     ConnectionParams::new("db://localhost"),
///     PoolConfig::new().with_max_pool_size(4),
/// )
/// .unwrap();
///
/// let lease = pool.acquire().unwrap().expect("pool exhausted");
/// assert!(lease.is_valid());
/// pool.release(&lease).unwrap();
/// assert!(!lease.is_valid());
/// ```
pub struct Pool<F: HandleFactory> {
    factory: F,
    params: ConnectionParams,
    config: PoolConfig,
    policy: EvictionPolicy,
    guid: Uuid,
    state: Mutex<PoolState<F::Handle>>,
    metrics: MetricsTracker,
}

impl<F: HandleFactory> Pool<F> {
    /// Create a pool. With `initial_pool_size > 0` the warm-up handles are
    /// fully materialized before this returns; a factory failure during
    /// warm-up aborts construction.
    pub fn new(factory: F, params: ConnectionParams, config: PoolConfig) -> PoolResult<Self> {
        let policy = EvictionPolicy::from_config(&config);
        let pool = Self {
            factory,
            params,
            policy,
            guid: Uuid::new_v4(),
            state: Mutex::new(PoolState {
                entries: HashMap::new(),
                available: VecDeque::new(),
                shutdown: false,
            }),
            metrics: MetricsTracker::new(),
            config,
        };

        let warmup = pool.config.initial_pool_size.min(pool.config.max_pool_size);
        for _ in 0..warmup {
            let id = {
                let mut state = pool.state.lock();
                register_entry(&mut state, false)
            };
            pool.materialize(id, false)?;
        }

        Ok(pool)
    }

    /// Acquire a lease on a handle.
    ///
    /// Returns `Ok(None)` when the pool stays exhausted through all configured
    /// retry rounds; exhaustion is an expected outcome, not an error. The wait
    /// between rounds is a blocking `thread::sleep` of the calling thread with
    /// no cancellation; see [`PoolConfig::retry_wait`]. Use
    /// [`acquire_async`](Pool::acquire_async) from async contexts.
    pub fn acquire(&self) -> PoolResult<Option<LeaseProxy<F::Handle>>> {
        if let Some(proxy) = self.try_acquire_once()? {
            return Ok(Some(proxy));
        }
        for _ in 0..self.config.retry_attempts {
            std::thread::sleep(self.config.retry_wait);
            MetricsTracker::incr(&self.metrics.retry_rounds);
            if let Some(proxy) = self.try_acquire_once()? {
                return Ok(Some(proxy));
            }
        }
        MetricsTracker::incr(&self.metrics.exhaustion_events);
        debug!("pool exhausted after retries, returning no handle");
        Ok(None)
    }

    /// Async variant of [`acquire`](Pool::acquire) with identical semantics;
    /// the retry wait yields to the runtime instead of blocking the thread.
    pub async fn acquire_async(&self) -> PoolResult<Option<LeaseProxy<F::Handle>>> {
        if let Some(proxy) = self.try_acquire_once()? {
            return Ok(Some(proxy));
        }
        for _ in 0..self.config.retry_attempts {
            tokio::time::sleep(self.config.retry_wait).await;
            MetricsTracker::incr(&self.metrics.retry_rounds);
            if let Some(proxy) = self.try_acquire_once()? {
                return Ok(Some(proxy));
            }
        }
        MetricsTracker::incr(&self.metrics.exhaustion_events);
        Ok(None)
    }

    /// Return a leased handle to the pool.
    ///
    /// The proxy is invalidated; every later call through it fails. Releasing
    /// a proxy from another pool or releasing twice is a caller error and
    /// leaves this pool's state untouched. A proxy the caller has already
    /// [`invalidate`](LeaseProxy::invalidate)d still owns its lease and is
    /// reclaimed normally. Any [`HandleGuard`] taken from the proxy must be
    /// dropped first: with auto-flush enabled the flush hook needs the handle.
    pub fn release(&self, proxy: &LeaseProxy<F::Handle>) -> PoolResult<()> {
        if proxy.pool_guid != self.guid {
            error!(
                expected = %self.guid,
                actual = %proxy.pool_guid,
                "refusing to release handle from another pool"
            );
            return Err(PoolError::ForeignPool {
                expected: self.guid,
                actual: proxy.pool_guid,
            });
        }

        let mut state = self.state.lock();
        if state.shutdown {
            return Err(PoolError::Shutdown);
        }
        // Ownership, not the validity bit, decides whether this proxy may
        // reclaim the entry: a stale proxy's flag is no longer the one
        // recorded on the entry, while a manually invalidated proxy's is.
        let owns_lease = state
            .entries
            .get(&proxy.entry_id)
            .and_then(|entry| entry.lease_flag.as_ref())
            .is_some_and(|flag| Arc::ptr_eq(flag, &proxy.valid));
        if !owns_lease {
            return Err(PoolError::AlreadyReleased { id: proxy.entry_id });
        }
        self.reclaim(&mut state, proxy.entry_id, &proxy.valid, &proxy.handle)
    }

    /// Shut down the pool: force-release every outstanding lease (flushing if
    /// configured), close every materialized handle once, and refuse all
    /// further operations. Idempotent; a second call is a no-op.
    pub fn shutdown(&self) -> PoolResult<()> {
        let mut state = self.state.lock();
        if state.shutdown {
            return Ok(());
        }

        let leased: Vec<Uuid> = state
            .entries
            .values()
            .filter(|entry| entry.leased)
            .map(|entry| entry.id)
            .collect();

        let mut first_flush_error = None;
        for id in leased {
            let Some(entry) = state.entries.get(&id) else {
                continue;
            };
            match (entry.lease_flag.clone(), entry.handle.clone()) {
                (Some(flag), Some(handle)) => {
                    if let Err(err) = self.reclaim(&mut state, id, &flag, &handle) {
                        first_flush_error.get_or_insert(err);
                    }
                }
                _ => {
                    // leased but never proxied or materialized; just unlease
                    if let Some(entry) = state.entries.get_mut(&id) {
                        entry.leased = false;
                        entry.leased_at = None;
                        if let Some(flag) = entry.lease_flag.take() {
                            flag.store(false, Ordering::Release);
                        }
                    }
                }
            }
        }

        let drained: Vec<PoolEntry<F::Handle>> =
            state.entries.drain().map(|(_, entry)| entry).collect();
        state.available.clear();
        state.shutdown = true;
        drop(state);

        for entry in drained {
            if let Some(handle) = entry.handle {
                handle.lock().close();
            }
        }
        debug!(pool = %self.guid, "pool shut down");

        match first_flush_error {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Identifier distinguishing this pool instance from any other.
    pub fn guid(&self) -> Uuid {
        self.guid
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Pre-built handles sitting ready to lease. Leased plus available does
    /// not necessarily add up to the pool size.
    pub fn available_count(&self) -> usize {
        self.state.lock().available.len()
    }

    /// Handles currently leased out.
    pub fn leased_count(&self) -> usize {
        let state = self.state.lock();
        state.entries.values().filter(|entry| entry.leased).count()
    }

    /// Entries that exist, leased or not. This is the number compared against
    /// the configured maximum.
    pub fn size(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Point-in-time health snapshot.
    pub fn health(&self) -> PoolHealth {
        let state = self.state.lock();
        let leased = state.entries.values().filter(|entry| entry.leased).count();
        PoolHealth::new(
            state.available.len(),
            leased,
            state.entries.len(),
            self.config.max_pool_size,
            state.shutdown,
        )
    }

    /// Counter and gauge snapshot.
    pub fn metrics(&self) -> PoolMetrics {
        let state = self.state.lock();
        let leased = state.entries.values().filter(|entry| entry.leased).count();
        self.metrics
            .snapshot(leased, state.available.len(), self.config.max_pool_size)
    }

    /// Export metrics as a string map.
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.metrics().export()
    }

    /// Export metrics in Prometheus exposition format.
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        MetricsExporter::export_prometheus(&self.metrics(), pool_name, tags)
    }

    /// One full acquisition pass without any waiting: checkout (or register),
    /// materialize, top off spares, wrap in a fresh proxy.
    fn try_acquire_once(&self) -> PoolResult<Option<LeaseProxy<F::Handle>>> {
        let Some(id) = self.checkout()? else {
            return Ok(None);
        };
        self.materialize(id, true)?;
        self.top_off();
        self.build_proxy(id).map(Some)
    }

    /// Steps 1-3 of acquisition under the lock: pop an available entry
    /// (discarding expired ones along the way) or register a new one if the
    /// pool is below capacity. Returns `None` on exhaustion. Evicted handles
    /// are closed after the lock is dropped.
    fn checkout(&self) -> PoolResult<Option<Uuid>> {
        let mut to_close: Vec<Arc<Mutex<F::Handle>>> = Vec::new();

        let granted = {
            let mut state = self.state.lock();
            if state.shutdown {
                return Err(PoolError::Shutdown);
            }
            loop {
                if let Some(id) = state.available.pop_front() {
                    let expired = state
                        .entries
                        .get(&id)
                        .map(|entry| self.policy.is_expired(entry.created_at, entry.idle_since));
                    match expired {
                        None => continue,
                        Some(true) => {
                            debug!(handle = %id, "discarding expired handle");
                            if let Some(entry) = state.entries.remove(&id) {
                                if let Some(handle) = entry.handle {
                                    to_close.push(handle);
                                }
                            }
                            MetricsTracker::incr(&self.metrics.handles_evicted);
                            continue;
                        }
                        Some(false) => {
                            if let Some(entry) = state.entries.get_mut(&id) {
                                entry.leased = true;
                                entry.leased_at = Some(Instant::now());
                                entry.idle_since = None;
                            }
                            debug!(handle = %id, "providing pre-created handle from pool");
                            break Some(id);
                        }
                    }
                } else if state.entries.len() < self.config.max_pool_size {
                    let id = register_entry(&mut state, true);
                    debug!(handle = %id, "pool below capacity, registering new entry");
                    break Some(id);
                } else {
                    debug!("all handles leased, none available");
                    break None;
                }
            }
        };

        for handle in to_close {
            handle.lock().close();
        }
        Ok(granted)
    }

    /// Ensure the entry has a handle, invoking the factory outside the lock.
    /// On factory failure the entry registration is rolled back so the slot
    /// is not permanently wedged. `owns_lease` marks the caller as the holder
    /// of the entry's lease: without it, the rollback skips entries a
    /// concurrent acquirer has leased in the meantime, leaving that
    /// acquirer's own materialization to decide the entry's fate.
    fn materialize(&self, id: Uuid, owns_lease: bool) -> PoolResult<()> {
        {
            let state = self.state.lock();
            match state.entries.get(&id) {
                Some(entry) if entry.handle.is_none() => {}
                // already materialized, or gone; nothing to do
                _ => return Ok(()),
            }
        }

        match self.factory.create(&self.params) {
            Ok(created) => {
                let mut surplus = Some(created);
                {
                    let mut state = self.state.lock();
                    if let Some(entry) = state.entries.get_mut(&id) {
                        if entry.handle.is_none() {
                            if let Some(handle) = surplus.take() {
                                entry.handle = Some(Arc::new(Mutex::new(handle)));
                                MetricsTracker::incr(&self.metrics.handles_created);
                            }
                        }
                    }
                }
                // lost a materialization race or the entry is gone; discard
                // the surplus outside the lock
                if let Some(mut extra) = surplus {
                    extra.close();
                }
                Ok(())
            }
            Err(source) => {
                let mut state = self.state.lock();
                let reclaimable = state
                    .entries
                    .get(&id)
                    .is_some_and(|entry| owns_lease || !entry.leased);
                if reclaimable && state.entries.remove(&id).is_some() {
                    state.available.retain(|queued| *queued != id);
                }
                error!(handle = %id, "handle creation failed");
                Err(PoolError::Creation(source))
            }
        }
    }

    /// Proactive top-off: once the available queue drains, register up to
    /// `acquire_increment` spare entries without exceeding the maximum size,
    /// then materialize them outside the lock. Best-effort; a factory failure
    /// here rolls back that entry and is logged, never surfaced to the caller
    /// whose acquisition triggered it.
    fn top_off(&self) {
        if self.config.acquire_increment == 0 {
            return;
        }

        let mut fresh = Vec::new();
        {
            let mut state = self.state.lock();
            if state.shutdown || !state.available.is_empty() {
                return;
            }
            while state.entries.len() < self.config.max_pool_size
                && state.available.len() < self.config.acquire_increment
            {
                fresh.push(register_entry(&mut state, false));
            }
        }

        if !fresh.is_empty() {
            debug!(count = fresh.len(), "proactively provisioning spare handles");
        }
        for id in fresh {
            if let Err(err) = self.materialize(id, false) {
                warn!(handle = %id, error = %err, "proactive handle creation failed");
            }
        }
    }

    /// Wrap a leased, materialized entry in a fresh proxy and record its
    /// validity flag so release and shutdown can disconnect it.
    fn build_proxy(&self, id: Uuid) -> PoolResult<LeaseProxy<F::Handle>> {
        let mut state = self.state.lock();
        if state.shutdown {
            return Err(PoolError::Shutdown);
        }
        let Some(entry) = state.entries.get_mut(&id) else {
            return Err(PoolError::LeaseInvalid { id });
        };
        let Some(handle) = entry.handle.clone() else {
            return Err(PoolError::LeaseInvalid { id });
        };

        let valid = Arc::new(AtomicBool::new(true));
        entry.lease_flag = Some(Arc::clone(&valid));
        MetricsTracker::incr(&self.metrics.total_acquired);

        Ok(LeaseProxy {
            handle,
            entry_id: id,
            pool_guid: self.guid,
            valid,
            created_at: entry.created_at,
            leased_at: entry.leased_at.unwrap_or_else(Instant::now),
        })
    }

    /// Shared release path: flush if configured (while the lease is still
    /// valid), invalidate the lease, mark the entry unleased, and requeue it.
    /// A flush failure still completes the bookkeeping so the entry never
    /// stays wedged in a leased state.
    fn reclaim(
        &self,
        state: &mut PoolState<F::Handle>,
        id: Uuid,
        valid: &AtomicBool,
        handle: &Arc<Mutex<F::Handle>>,
    ) -> PoolResult<()> {
        let flush_result = if self.config.auto_flush_on_release {
            handle.lock().flush()
        } else {
            Ok(())
        };

        valid.store(false, Ordering::Release);

        let PoolState {
            entries, available, ..
        } = state;
        if let Some(entry) = entries.get_mut(&id) {
            entry.leased = false;
            entry.leased_at = None;
            entry.idle_since = Some(Instant::now());
            entry.lease_flag = None;
            if !available.contains(&id) {
                available.push_back(id);
            }
        }
        MetricsTracker::incr(&self.metrics.total_released);

        match flush_result {
            Ok(()) => Ok(()),
            Err(source) => {
                MetricsTracker::incr(&self.metrics.flush_failures);
                warn!(handle = %id, "flush before release failed");
                Err(PoolError::Flush { id, source })
            }
        }
    }
}

fn register_entry<H>(state: &mut PoolState<H>, leased: bool) -> Uuid {
    let entry = PoolEntry::new(leased);
    let id = entry.id;
    if !leased {
        state.available.push_back(id);
    }
    state.entries.insert(id, entry);
    id
}

/// Caller-facing wrapper around a leased handle.
///
/// A fresh proxy is created on every successful acquisition, even when the
/// underlying handle has been leased before. Access to the handle goes
/// through [`handle`](LeaseProxy::handle), which fails once the lease has
/// been invalidated by release, shutdown, or [`invalidate`](LeaseProxy::invalidate).
/// Invalidation is one-way. Lease metadata (id, pool guid, validity,
/// timestamps) is served from the proxy itself and never touches the handle.
pub struct LeaseProxy<H> {
    handle: Arc<Mutex<H>>,
    entry_id: Uuid,
    pool_guid: Uuid,
    valid: Arc<AtomicBool>,
    created_at: Instant,
    leased_at: Instant,
}

impl<H> LeaseProxy<H> {
    /// Borrow the underlying handle.
    ///
    /// The lease validity check happens here, when the guard is taken; a
    /// guard already held stays usable until dropped.
    pub fn handle(&self) -> PoolResult<HandleGuard<'_, H>> {
        if !self.is_valid() {
            return Err(PoolError::LeaseInvalid { id: self.entry_id });
        }
        Ok(HandleGuard {
            inner: self.handle.lock(),
        })
    }

    /// Whether this proxy is still connected to its handle. False after
    /// release, shutdown, or explicit invalidation, and never true again.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Disconnect this proxy from the handle without returning the handle to
    /// the pool. The entry stays leased until [`Pool::release`], which still
    /// accepts the invalidated proxy and reclaims the slot.
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    /// Identity of the underlying pool entry. Stable across leases of the
    /// same handle; not unique to this proxy.
    pub fn entry_id(&self) -> Uuid {
        self.entry_id
    }

    /// Identifier of the pool this lease came from.
    pub fn pool_guid(&self) -> Uuid {
        self.pool_guid
    }

    /// When the underlying handle's entry was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When this lease was granted.
    pub fn leased_at(&self) -> Instant {
        self.leased_at
    }
}

impl<H> std::fmt::Debug for LeaseProxy<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseProxy")
            .field("entry_id", &self.entry_id)
            .field("pool_guid", &self.pool_guid)
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}

/// Exclusive borrow of a leased handle, taken through [`LeaseProxy::handle`].
pub struct HandleGuard<'a, H> {
    inner: parking_lot::MutexGuard<'a, H>,
}

impl<H> Deref for HandleGuard<'_, H> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.inner
    }
}

impl<H> DerefMut for HandleGuard<'_, H> {
    fn deref_mut(&mut self) -> &mut H {
        &mut self.inner
    }
}

/// Pass-through pool: creates a fresh handle on every acquire and closes it
/// on release. No leasing, no reuse. Useful as a baseline and in tests that
/// want pooling out of the picture.
pub struct DirectPool<F: HandleFactory> {
    factory: F,
    params: ConnectionParams,
}

impl<F: HandleFactory> DirectPool<F> {
    pub fn new(factory: F, params: ConnectionParams) -> Self {
        Self { factory, params }
    }

    pub fn acquire(&self) -> PoolResult<F::Handle> {
        self.factory.create(&self.params).map_err(PoolError::Creation)
    }

    pub fn release(&self, mut handle: F::Handle) {
        handle.close();
    }
}
