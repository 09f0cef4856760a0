//! Condition variable with a FIFO waiter queue mixing cooperative (ULT) and
//! external OS-thread waiters.
//!
//! # Design Notes
//!
//! A from-scratch ULT runtime's condvar keeps one pre-allocated "sentinel"
//! waiter node around so the common single-waiter case never allocates.
//! This implementation drops that optimization in favor of a plain
//! `VecDeque<Waiter>` — a cold-path allocation per `wait` call is a small
//! price for not hand-rolling an intrusive linked list in safe Rust.
//!
//! # Reference
//! Modeled on the lost-wakeup-avoidance discipline of a monitor-style
//! condition variable: all queue mutation and wake delivery happen while
//! holding a single short-held internal lock (`guard`), so a waiter can
//! never be signaled before it is actually enqueued.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::utils::Backoff;
use log::debug;
use parking_lot::Mutex as InnerLock;

use crate::error::{Error, Result};
use crate::mutex::MutexGuard;
#[cfg(test)]
use crate::mutex::Mutex;
use crate::scheduler::{current_ult, Ult};

/// Result of [`CondVar::wait`]. On the error path the caller's `MutexGuard`
/// travels alongside the [`Error`] rather than being dropped, so a failed
/// wait never silently releases `user_mutex` — the same shape as
/// `std::sync::Condvar::wait`'s `LockResult<MutexGuard<T>>`.
pub type WaitResult<'a, T> = std::result::Result<MutexGuard<'a, T>, (Error, MutexGuard<'a, T>)>;

enum Waiter {
    Ult(Arc<Ult>),
    External(Arc<AtomicBool>),
}

struct Inner {
    assoc_mutex: Option<usize>,
    queue: VecDeque<Waiter>,
}

impl Inner {
    const fn new() -> Self {
        Self {
            assoc_mutex: None,
            queue: VecDeque::new(),
        }
    }
}

/// A condition variable usable from both cooperative ULTs and plain OS
/// threads.
pub struct CondVar {
    guard: InnerLock<Inner>,
}

impl Default for CondVar {
    fn default() -> Self {
        Self::create()
    }
}

impl CondVar {
    #[cfg(test)]
    fn push_test_waiter(&self) {
        let mut inner = self.guard.lock();
        inner.assoc_mutex = Some(1);
        inner.queue.push_back(Waiter::External(Arc::new(AtomicBool::new(false))));
    }

    /// Allocates a condition variable with no associated mutex and an empty
    /// waiter queue.
    pub fn create() -> Self {
        debug!("COND_CREATE");
        Self {
            guard: InnerLock::new(Inner::new()),
        }
    }

    /// Current number of queued waiters.
    pub fn num_waiters(&self) -> usize {
        self.guard.lock().queue.len()
    }

    /// Consumes the condition variable, failing if waiters remain queued.
    ///
    /// Ordinary `Drop` already reclaims the condvar's storage; this method
    /// exists for callers that want the destroy-time precondition checked
    /// explicitly rather than relying on process teardown order.
    pub fn destroy(self) -> Result<()> {
        if !self.guard.lock().queue.is_empty() {
            log::error!("COND_DESTROY on a condvar with waiters still queued");
            return Err(Error::CondFault("destroy called with waiters still queued"));
        }
        Ok(())
    }

    /// Releases `guard`'s mutex, blocks the caller until woken by
    /// [`CondVar::signal`] or [`CondVar::broadcast`], then reacquires the
    /// same mutex before returning.
    ///
    /// Fails with [`Error::InvalidMutex`] if a different mutex is currently
    /// associated with this condition variable (all waiters on one instance
    /// must present the same mutex), or with [`Error::NoMemory`] if the
    /// waiter queue cannot grow. On either failure path `user_mutex` is
    /// returned alongside the error rather than dropped — the caller never
    /// loses the lock it came in holding, mirroring `std::sync::Condvar::wait`'s
    /// `LockResult<MutexGuard<T>>` (guard travels with the `Result` on both
    /// branches) and the argobots original, which only ever unlocks its own
    /// internal `cond.mutex` on these paths, never the caller's `mutex`.
    pub fn wait<'a, T>(&self, mutex_guard: MutexGuard<'a, T>) -> WaitResult<'a, T> {
        let mutex = mutex_guard.mutex();
        let identity = mutex_guard.mutex_identity();
        let current = current_ult();

        let waiter = {
            let mut inner = self.guard.lock();
            match inner.assoc_mutex {
                None => inner.assoc_mutex = Some(identity),
                Some(existing) if existing == identity => {}
                Some(_) => return Err((Error::InvalidMutex, mutex_guard)),
            }
            if inner.queue.try_reserve(1).is_err() {
                return Err((Error::NoMemory, mutex_guard));
            }
            let waiter = match &current {
                Some(ult) => {
                    ult.set_blocked();
                    Waiter::Ult(Arc::clone(ult))
                }
                None => Waiter::External(Arc::new(AtomicBool::new(false))),
            };
            let flag = match &waiter {
                Waiter::Ult(_) => None,
                Waiter::External(flag) => Some(Arc::clone(flag)),
            };
            inner.queue.push_back(waiter);
            flag
        };

        drop(mutex_guard);

        match current {
            Some(ult) => ult.suspend(),
            None => {
                let flag = waiter.expect("external waiter always carries a flag");
                let backoff = Backoff::new();
                while !flag.load(Ordering::Acquire) {
                    backoff.snooze();
                }
            }
        }

        Ok(mutex.lock())
    }

    /// Wakes the longest-waiting waiter, if any. No-op if the queue is
    /// empty.
    pub fn signal(&self) {
        let mut inner = self.guard.lock();
        let Some(front) = inner.queue.pop_front() else {
            return;
        };
        if inner.queue.is_empty() {
            inner.assoc_mutex = None;
        }
        drop(inner);
        debug!("COND_SIGNAL");
        wake(front);
    }

    /// Wakes every queued waiter, in FIFO order, and empties the queue.
    pub fn broadcast(&self) {
        let mut inner = self.guard.lock();
        let waiters: Vec<Waiter> = inner.queue.drain(..).collect();
        inner.assoc_mutex = None;
        drop(inner);
        debug!("COND_BROADCAST count={}", waiters.len());
        for waiter in waiters {
            wake(waiter);
        }
    }
}

fn wake(waiter: Waiter) {
    match waiter {
        Waiter::Ult(ult) => ult.set_ready(),
        Waiter::External(flag) => flag.store(true, Ordering::Release),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{enter_ult_context, Ult};
    use rstest::rstest;
    use serial_test::serial;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn signal_and_broadcast_on_empty_queue_are_no_ops() {
        let cv = CondVar::create();
        cv.signal();
        cv.broadcast();
        assert_eq!(cv.num_waiters(), 0);
        cv.destroy().unwrap();
    }

    /// The small wait/wake scenario matrix from the testable-properties
    /// section: N waiters enqueued, then either `signal`-ed one at a time or
    /// `broadcast`-ed, always draining in FIFO order with `num_waiters`
    /// landing at zero.
    #[rstest]
    #[case::one_waiter_one_signal(1, false)]
    #[case::two_waiters_two_signals(2, false)]
    #[case::three_waiters_one_broadcast(3, true)]
    #[case::five_waiters_one_broadcast(5, true)]
    fn wait_signal_broadcast_matrix(#[case] waiter_count: u32, #[case] use_broadcast: bool) {
        let cv = Arc::new(CondVar::create());
        let m = Arc::new(Mutex::new(Vec::<u32>::new()));
        let mut handles = Vec::new();
        for id in 0..waiter_count {
            let cv2 = Arc::clone(&cv);
            let m2 = Arc::clone(&m);
            handles.push(thread::spawn(move || {
                let guard = m2.lock();
                let mut guard = cv2.wait(guard).unwrap();
                guard.push(id);
            }));
            while cv.num_waiters() <= id as usize {
                thread::yield_now();
            }
        }
        assert_eq!(cv.num_waiters(), waiter_count as usize);

        if use_broadcast {
            cv.broadcast();
        } else {
            for _ in 0..waiter_count {
                cv.signal();
            }
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(m.lock().len(), waiter_count as usize);
        assert_eq!(cv.num_waiters(), 0);
    }

    #[test]
    fn destroy_with_waiters_queued_fails() {
        let cv = CondVar::create();
        cv.push_test_waiter();
        assert_eq!(cv.num_waiters(), 1);
        assert!(matches!(cv.destroy(), Err(Error::CondFault(_))));
    }

    #[test]
    fn external_wait_wakes_on_signal() {
        let cv = Arc::new(CondVar::create());
        let m = Arc::new(Mutex::new(0u32));

        let cv2 = Arc::clone(&cv);
        let m2 = Arc::clone(&m);
        let waiter = thread::spawn(move || {
            let guard = m2.lock();
            let guard = cv2.wait(guard).unwrap();
            *guard
        });

        while cv.num_waiters() == 0 {
            thread::yield_now();
        }
        {
            let mut g = m.lock();
            *g = 42;
        }
        cv.signal();
        let result = waiter.join().unwrap();
        assert_eq!(result, 42);
    }

    #[test]
    fn mismatched_mutex_is_rejected() {
        let cv = Arc::new(CondVar::create());
        let m1 = Arc::new(Mutex::new(0u32));
        let m2 = Arc::new(Mutex::new(0u32));

        let cv2 = Arc::clone(&cv);
        let m1b = Arc::clone(&m1);
        let t1 = thread::spawn(move || {
            let guard = m1b.lock();
            let _ = cv2.wait(guard);
        });
        while cv.num_waiters() == 0 {
            thread::yield_now();
        }

        let guard2 = m2.lock();
        let (err, mut guard2) = cv.wait(guard2).unwrap_err();
        assert_eq!(err, Error::InvalidMutex);
        assert_eq!(cv.num_waiters(), 1);

        // InvalidMutex must not cost the caller its own lock: the returned
        // guard still holds m2, usably, exactly as if wait() had never been
        // called.
        *guard2 = 99;
        drop(guard2);
        assert_eq!(*m2.lock(), 99);

        cv.signal();
        t1.join().unwrap();
    }

    #[test]
    fn broadcast_wakes_all_waiters_in_order() {
        let cv = Arc::new(CondVar::create());
        let m = Arc::new(Mutex::new(Vec::<u32>::new()));
        let mut handles = Vec::new();
        for id in 0..3u32 {
            let cv2 = Arc::clone(&cv);
            let m2 = Arc::clone(&m);
            handles.push(thread::spawn(move || {
                let guard = m2.lock();
                let mut guard = cv2.wait(guard).unwrap();
                guard.push(id);
            }));
            thread::sleep(Duration::from_millis(5));
        }
        while cv.num_waiters() < 3 {
            thread::yield_now();
        }
        cv.broadcast();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(m.lock().len(), 3);
        assert_eq!(cv.num_waiters(), 0);
    }

    #[test]
    #[serial]
    fn ult_waiter_is_recognized_via_thread_local_context() {
        let ult = Ult::current();
        enter_ult_context(ult, || {
            // Calling current_ult() inside the context confirms the condvar
            // core would classify a wait from here as a ULT, not external.
            assert!(current_ult().is_some());
        });
    }

    /// Drives `wait` all the way through the cooperative branch: the waiting
    /// thread installs a ULT context before calling `wait`, so it takes the
    /// `Waiter::Ult` arm (`set_blocked` then `suspend`), and the signaling
    /// side wakes it through `Ult::set_ready` rather than the external
    /// busy-spin flag every other multi-thread test here exercises.
    #[test]
    #[serial]
    fn ult_wait_is_woken_via_set_ready() {
        let cv = Arc::new(CondVar::create());
        let m = Arc::new(Mutex::new(0u32));

        let cv2 = Arc::clone(&cv);
        let m2 = Arc::clone(&m);
        let waiter = thread::spawn(move || {
            let ult = Ult::current();
            enter_ult_context(ult, || {
                let guard = m2.lock();
                let guard = cv2.wait(guard).unwrap();
                *guard
            })
        });

        while cv.num_waiters() == 0 {
            thread::yield_now();
        }
        {
            let mut g = m.lock();
            *g = 7;
        }
        cv.signal();
        let result = waiter.join().unwrap();
        assert_eq!(result, 7);
    }
}
