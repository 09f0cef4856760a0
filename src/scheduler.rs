//! Stand-in ULT/scheduler collaborator.
//!
//! The real runtime's cooperative scheduler is out of scope; this module
//! supplies just enough of a `Ult` type and thread-local "current ULT"
//! context for [`crate::condvar::CondVar`] to tell a cooperative waiter from
//! an external OS thread and to transition it blocked/ready. `suspend`/
//! `set_ready` park/unpark the carrying OS thread rather than performing a
//! real userspace context switch.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};

/// Cooperative-thread run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UltState {
    Ready = 0,
    Running = 1,
    Blocked = 2,
}

impl UltState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => UltState::Ready,
            1 => UltState::Running,
            _ => UltState::Blocked,
        }
    }
}

/// A user-level thread handle.
///
/// Only the fields the condvar core needs are modeled: an atomic state and
/// the OS thread currently carrying it, used to park/unpark across the
/// suspend/ready transition.
pub struct Ult {
    state: AtomicU8,
    carrier: Thread,
}

impl Ult {
    /// Constructs a handle carried by the calling OS thread, running.
    ///
    /// This does not consult [`current_ult`] — it is how a caller creates
    /// the handle in the first place, typically once per cooperative thread
    /// before installing it with [`enter_ult_context`].
    pub fn current() -> Arc<Ult> {
        Arc::new(Ult {
            state: AtomicU8::new(UltState::Running as u8),
            carrier: thread::current(),
        })
    }

    pub fn state(&self) -> UltState {
        UltState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Transition to blocked. Must be called while the caller still holds
    /// whatever lock serializes this ULT's enqueue onto a wait queue.
    pub fn set_blocked(&self) {
        self.state.store(UltState::Blocked as u8, Ordering::Release);
    }

    /// Suspend the carrying OS thread until [`Ult::set_ready`] is called.
    pub fn suspend(&self) {
        while self.state() == UltState::Blocked {
            thread::park();
        }
    }

    /// Transition to ready and wake the carrying OS thread. Safe to call
    /// from any thread, including ones that do not own a `current()` ULT.
    pub fn set_ready(&self) {
        self.state.store(UltState::Ready as u8, Ordering::Release);
        self.carrier.unpark();
    }
}

thread_local! {
    static CURRENT_ULT: RefCell<Option<Arc<Ult>>> = const { RefCell::new(None) };
}

/// Returns the calling OS thread's current ULT, if one has been installed
/// via [`enter_ult_context`]. Absence means the caller is an external thread.
pub fn current_ult() -> Option<Arc<Ult>> {
    CURRENT_ULT.with(|c| c.borrow().clone())
}

/// Installs `ult` as the calling thread's current ULT for the duration of
/// `f`, restoring the previous value (if any) afterward.
pub fn enter_ult_context<R>(ult: Arc<Ult>, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT_ULT.with(|c| c.borrow_mut().replace(ult));
    let result = f();
    CURRENT_ULT.with(|c| *c.borrow_mut() = previous);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    // CURRENT_ULT is thread-local, but the test harness may still reuse OS
    // threads across cases; #[serial] keeps these from interleaving on a
    // shared thread the way the teacher guards its own FFI-global tests.
    #[test]
    #[serial]
    fn no_context_means_external() {
        assert!(current_ult().is_none());
    }

    #[test]
    #[serial]
    fn entering_context_installs_current_ult() {
        let ult = Ult::current();
        enter_ult_context(Arc::clone(&ult), || {
            assert!(current_ult().is_some());
        });
        assert!(current_ult().is_none());
    }

    #[test]
    fn blocked_then_ready_round_trips() {
        let ult = Ult::current();
        ult.set_blocked();
        assert_eq!(ult.state(), UltState::Blocked);
        ult.set_ready();
        assert_eq!(ult.state(), UltState::Ready);
    }
}
