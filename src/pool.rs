//! Work-pool facade: accounting, producer/consumer identity gating, and
//! dispatch over a pluggable queue implementation.
//!
//! # Reference
//! The default queue (`VecDequePool`) follows the same shape as a draw
//! command queue elsewhere in this codebase's lineage: an `Arc<Mutex<Inner>>`
//! guarding the data, paired with a `Condvar` for the blocking-with-deadline
//! operation, and a `Config` value type with named presets plus a
//! `validate()` method rather than scattered constructor arguments.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex as StdMutex};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use log::debug;

use crate::error::Error;
use crate::scheduler::Ult;

/// A runnable unit handed between a pool and its scheduler.
///
/// Modeled as an opaque handle carrying the `Ult` it represents; pools that
/// need richer payloads can wrap this.
#[derive(Clone)]
pub struct Unit(pub Arc<Ult>);

impl fmt::Debug for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unit(@{:p})", Arc::as_ptr(&self.0))
    }
}

/// Polymorphic dispatch surface a concrete pool implementation provides.
///
/// [`PoolFacade`] wraps any `Arc<dyn PoolOps>` with accounting and the
/// producer/consumer gate; the dispatched operations themselves carry no
/// bookkeeping responsibility.
pub trait PoolOps: Send + Sync {
    fn push(&self, unit: Unit);
    fn pop(&self) -> Option<Unit>;
    fn pop_timedwait(&self, deadline: Instant) -> Option<Unit>;
    fn remove(&self, unit: &Unit) -> bool;
    fn get_size(&self) -> usize;
}

/// Whether a pool enforces a single fixed producer/consumer identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    /// Any thread may push/pop.
    Shared,
    /// The first caller to push/pop installs its identity; later callers
    /// with a different identity are rejected.
    Private,
}

/// Pool configuration.
///
/// `capacity_hint` is `None` for [`PoolConfig::unbounded`] ("no hint, grow as
/// needed") and `Some(n)` for [`PoolConfig::bounded`] ("pre-size the default
/// queue for `n` units"); the two are not the same value, so a zero-capacity
/// bounded pool (`Some(0)`, a pool that could never hold anything) is
/// distinguishable from an unbounded one and rejected by [`PoolConfig::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub access_type: AccessType,
    pub capacity_hint: Option<usize>,
}

impl PoolConfig {
    pub const fn unbounded() -> Self {
        Self {
            access_type: AccessType::Shared,
            capacity_hint: None,
        }
    }

    pub const fn bounded(capacity_hint: usize) -> Self {
        Self {
            access_type: AccessType::Shared,
            capacity_hint: Some(capacity_hint),
        }
    }

    pub const fn private(mut self) -> Self {
        self.access_type = AccessType::Private;
        self
    }

    /// Rejects a `bounded(0)` config, mirroring the teacher's own
    /// `DcqConfig::validate` (invalid if its size bound is zero). Called by
    /// [`PoolFacade::new`] at construction time.
    pub fn validate(&self) -> Result<(), Error> {
        if self.capacity_hint == Some(0) {
            return Err(Error::InvalidConfig(
                "bounded(0): a pool with zero capacity can never hold a unit",
            ));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Point-in-time accounting snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub queued: usize,
    pub blocked: u64,
    pub migrations: u64,
    pub scheds: u64,
}

impl PoolStats {
    pub fn total(&self) -> u64 {
        self.queued as u64 + self.blocked + self.migrations
    }
}

struct Inner {
    items: VecDeque<Unit>,
}

/// Default FIFO pool backed by an `Arc<Mutex<Inner>>` + `Condvar`, the same
/// wrapper shape used for this codebase's other blocking queues.
pub struct VecDequePool {
    inner: StdMutex<Inner>,
    condvar: Condvar,
}

impl VecDequePool {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(0)
    }

    /// Pre-sizes the backing `VecDeque` for `capacity` units, per a
    /// [`PoolConfig::bounded`] hint.
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: StdMutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
            }),
            condvar: Condvar::new(),
        })
    }
}

impl PoolOps for VecDequePool {
    fn push(&self, unit: Unit) {
        let mut inner = self.inner.lock().unwrap();
        inner.items.push_back(unit);
        self.condvar.notify_one();
    }

    fn pop(&self) -> Option<Unit> {
        self.inner.lock().unwrap().items.pop_front()
    }

    fn pop_timedwait(&self, deadline: Instant) -> Option<Unit> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(unit) = inner.items.pop_front() {
                return Some(unit);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (next, timeout_result) = self
                .condvar
                .wait_timeout(inner, deadline - now)
                .unwrap();
            inner = next;
            if timeout_result.timed_out() && inner.items.is_empty() {
                return None;
            }
        }
    }

    fn remove(&self, unit: &Unit) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if let Some(pos) = inner.items.iter().position(|u| Arc::ptr_eq(&u.0, &unit.0)) {
            inner.items.remove(pos);
            true
        } else {
            false
        }
    }

    fn get_size(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }
}

/// Wraps a pluggable [`PoolOps`] implementation with atomic blocked/
/// migration/scheduler-attachment accounting and an optional producer/
/// consumer identity gate.
pub struct PoolFacade {
    ops: Arc<dyn PoolOps>,
    config: PoolConfig,
    num_blocked: AtomicI64,
    num_migrations: AtomicI64,
    num_scheds: AtomicU64,
    producer_id: StdMutex<Option<ThreadId>>,
    consumer_id: StdMutex<Option<ThreadId>>,
}

impl PoolFacade {
    /// Panics if `config` is invalid (the teacher's own `DrawCommandQueue::with_config`
    /// does the same via `config.validate().expect(...)` — an invalid config is a
    /// caller bug at construction time, not a runtime condition callers recover from).
    pub fn new(ops: Arc<dyn PoolOps>, config: PoolConfig) -> Self {
        config.validate().expect("invalid pool config");
        Self {
            ops,
            config,
            num_blocked: AtomicI64::new(0),
            num_migrations: AtomicI64::new(0),
            num_scheds: AtomicU64::new(0),
            producer_id: StdMutex::new(None),
            consumer_id: StdMutex::new(None),
        }
    }

    /// Builds a [`PoolFacade`] over the default [`VecDequePool`], pre-sized
    /// from `config.capacity_hint` when one is given.
    pub fn with_default_pool(config: PoolConfig) -> Self {
        let ops = match config.capacity_hint {
            Some(capacity) => VecDequePool::with_capacity(capacity),
            None => VecDequePool::new(),
        };
        Self::new(ops, config)
    }

    fn check_identity(slot: &StdMutex<Option<ThreadId>>) -> Result<(), Error> {
        let this_thread = std::thread::current().id();
        let mut guard = slot.lock().unwrap();
        match *guard {
            None => {
                *guard = Some(this_thread);
                Ok(())
            }
            Some(id) if id == this_thread => Ok(()),
            Some(_) => Err(Error::InvalidPoolAccess),
        }
    }

    pub fn push(&self, unit: Unit) -> Result<(), Error> {
        if self.config.access_type == AccessType::Private {
            Self::check_identity(&self.producer_id)?;
        }
        debug!("POOL_PUSH unit={unit:?}");
        self.ops.push(unit);
        Ok(())
    }

    pub fn pop(&self) -> Result<Option<Unit>, Error> {
        if self.config.access_type == AccessType::Private {
            Self::check_identity(&self.consumer_id)?;
        }
        let unit = self.ops.pop();
        debug!("POOL_POP unit={unit:?}");
        Ok(unit)
    }

    pub fn pop_timedwait(&self, timeout: Duration) -> Result<Option<Unit>, Error> {
        if self.config.access_type == AccessType::Private {
            Self::check_identity(&self.consumer_id)?;
        }
        let unit = self.ops.pop_timedwait(Instant::now() + timeout);
        debug!("POOL_POP (timedwait) unit={unit:?}");
        Ok(unit)
    }

    pub fn remove(&self, unit: &Unit) -> Result<bool, Error> {
        if self.config.access_type == AccessType::Private {
            Self::check_identity(&self.consumer_id)?;
        }
        let removed = self.ops.remove(unit);
        debug!("POOL_REMOVE unit={unit:?} removed={removed}");
        Ok(removed)
    }

    /// Size reported by the underlying queue implementation alone, not
    /// counting blocked or in-flight-migration units.
    pub fn get_size(&self) -> usize {
        self.ops.get_size()
    }

    /// `get_size()` plus units that are logically owned by this pool but
    /// currently blocked on a synchronization primitive or mid-migration.
    pub fn get_total_size(&self) -> u64 {
        self.ops.get_size() as u64
            + self.num_blocked.load(Ordering::Acquire).max(0) as u64
            + self.num_migrations.load(Ordering::Acquire).max(0) as u64
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            queued: self.ops.get_size(),
            blocked: self.num_blocked.load(Ordering::Acquire).max(0) as u64,
            migrations: self.num_migrations.load(Ordering::Acquire).max(0) as u64,
            scheds: self.num_scheds.load(Ordering::Acquire),
        }
    }

    pub fn inc_num_blocked(&self) {
        self.num_blocked.fetch_add(1, Ordering::AcqRel);
    }

    pub fn dec_num_blocked(&self) {
        self.num_blocked.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn inc_num_migrations(&self) {
        self.num_migrations.fetch_add(1, Ordering::AcqRel);
    }

    pub fn dec_num_migrations(&self) {
        self.num_migrations.fetch_sub(1, Ordering::AcqRel);
    }

    /// Registers a scheduler attachment; returns the new attachment count.
    pub fn retain(&self) -> u64 {
        self.num_scheds.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Releases a scheduler attachment; returns the new attachment count.
    ///
    /// Precondition: at least one attachment is currently held.
    pub fn release(&self) -> u64 {
        let previous = self.num_scheds.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "release() called with no attached schedulers");
        previous.saturating_sub(1)
    }

    /// True once every attached scheduler has released and the pool holds
    /// no queued, blocked, or migrating units.
    pub fn is_quiescent(&self) -> bool {
        self.num_scheds.load(Ordering::Acquire) == 0 && self.get_total_size() == 0
    }

    /// Marks `ult` ready and pushes its unit handle into this pool.
    pub fn add_thread(&self, ult: Arc<Ult>) -> Result<(), Error> {
        ult.set_ready();
        self.push(Unit(ult))
    }
}
