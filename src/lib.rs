//! Synchronization core for a hybrid user-level-thread (ULT) runtime.
//!
//! # Architecture
//!
//! Two pieces compose the core:
//!
//! - [`condvar::CondVar`] — a condition variable whose FIFO waiter queue
//!   mixes cooperative ULTs and plain OS threads, with lost-wakeup avoidance
//!   enforced by a single short-held internal lock around enqueue and wake
//!   delivery.
//! - [`pool::PoolFacade`] — accounting (blocked/migrating/attached-scheduler
//!   counts) and an optional producer/consumer identity gate wrapped around
//!   a pluggable [`pool::PoolOps`] queue implementation.
//!
//! The mutex and cooperative-scheduler collaborators these depend on are
//! out of scope for a real runtime embedding this crate; [`mutex`] and
//! [`scheduler`] provide minimal stand-ins so the core is directly testable.
//!
//! # Thread Safety
//!
//! Both [`condvar::CondVar`] and [`pool::PoolFacade`] are `Sync` and are
//! designed to be shared behind an `Arc` across the threads/ULTs that use
//! them; none of their public operations require external synchronization
//! beyond what each documents.

pub mod condvar;
pub mod error;
pub mod mutex;
pub mod pool;
pub mod scheduler;

pub use condvar::{CondVar, WaitResult};
pub use error::{Error, Result};
pub use mutex::{Mutex, MutexGuard};
pub use pool::{AccessType, PoolConfig, PoolFacade, PoolOps, PoolStats, Unit, VecDequePool};
pub use scheduler::{current_ult, enter_ult_context, Ult, UltState};
