//! Handle and factory traits at the pool boundary

use crate::config::ConnectionParams;
use crate::errors::HandleError;

/// Capability surface the pool needs from a pooled resource.
///
/// Both hooks default to no-ops so plain value types can be pooled without
/// ceremony. `flush` runs before a handle returns to the pool when
/// [`PoolConfig::auto_flush_on_release`](crate::PoolConfig) is set; `close`
/// runs when the entry is evicted or the pool shuts down.
pub trait Handle: Send + 'static {
    fn flush(&mut self) -> Result<(), HandleError> {
        Ok(())
    }

    fn close(&mut self) {}
}

/// Materializes raw handles for the pool.
///
/// Implementations should return raw resources, never proxies; the pool does
/// its own wrapping. Broken out as a trait primarily so tests can substitute
/// mock factories for the real thing.
///
/// # Examples
///
/// ```
/// use leasepool::{ConnectionParams, Handle, HandleError, HandleFactory};
///
/// struct TcpEcho(String);
/// impl Handle for TcpEcho {}
///
/// struct EchoFactory;
/// impl HandleFactory for EchoFactory {
///     type Handle = TcpEcho;
///
///     fn create(&self, params: &ConnectionParams) -> Result<TcpEcho, HandleError> {
///         Ok(TcpEcho(params.url.clone()))
///     }
/// }
/// ```
pub trait HandleFactory: Send + Sync {
    type Handle: Handle;

    /// Create a new raw handle from the given connection parameters.
    fn create(&self, params: &ConnectionParams) -> Result<Self::Handle, HandleError>;
}

/// Plain closures work as factories.
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
///     |_params: &ConnectionParams| Ok::<_, HandleError>(Conn),
///     ConnectionParams::default(),
///     PoolConfig::default(),
/// )
/// .unwrap();
/// assert_eq!(pool.size(), 0);
/// ```
impl<H, F> HandleFactory for F
where
    H: Handle,
    F: Fn(&ConnectionParams) -> Result<H, HandleError> + Send + Sync,
{
    type Handle = H;

    fn create(&self, params: &ConnectionParams) -> Result<H, HandleError> {
        self(params)
    }
}
