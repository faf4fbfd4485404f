//! Error types for the lease pool

use thiserror::Error;
use uuid::Uuid;

/// Failure produced by a [`HandleFactory`](crate::HandleFactory) or by a
/// handle's own flush/close hooks. Opaque to the pool; surfaced unchanged.
pub type HandleError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum PoolError {
    /// The factory could not produce a handle. The entry registered for the
    /// failed materialization has been rolled back.
    #[error("handle creation failed")]
    Creation(#[source] HandleError),

    /// A call went through a proxy whose lease has been invalidated.
    #[error("lease on handle {id} no longer valid")]
    LeaseInvalid { id: Uuid },

    /// A proxy from a different pool instance was handed to this pool.
    #[error("cannot release handle from another pool: this pool is {expected}, the proxy came from {actual}")]
    ForeignPool { expected: Uuid, actual: Uuid },

    /// The proxy was already released back to the pool.
    #[error("handle {id} was already released")]
    AlreadyReleased { id: Uuid },

    /// The flush hook failed while a handle was being released. The entry is
    /// back in the pool's bookkeeping as unleased regardless.
    #[error("flush before release of handle {id} failed")]
    Flush {
        id: Uuid,
        #[source]
        source: HandleError,
    },

    /// The pool has been shut down; no further operations are served.
    #[error("pool is shut down")]
    Shutdown,
}

pub type PoolResult<T> = Result<T, PoolError>;
