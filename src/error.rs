//! Error type shared by the condition-variable and pool-facade modules.

/// Failure modes returned by this crate's synchronization primitives.
///
/// Variant names mirror the small, closed error-code set a C-shaped ULT
/// runtime would return across an FFI boundary; callers embedding this crate
/// should not need more than these five outcomes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("allocation failed enqueuing a waiter")]
    NoMemory,

    #[error("invalid or null handle")]
    InvalidHandle,

    #[error("condition variable is already associated with a different mutex")]
    InvalidMutex,

    #[error("caller is not the pool's registered producer/consumer")]
    InvalidPoolAccess,

    #[error("condition variable internal invariant violated: {0}")]
    CondFault(&'static str),

    #[error("invalid pool configuration: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
