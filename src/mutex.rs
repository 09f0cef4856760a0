//! Stand-in mutex primitive.
//!
//! The condition variable in [`crate::condvar`] is written against a mutex
//! that exposes `lock`, `try_lock` ("spinlock" in the terminology this crate
//! was modeled on) and identity comparison (`equal`). A real ULT runtime
//! supplies its own mutex with those same operations; this type lets the
//! core compile and be exercised standalone.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// A mutex whose identity (not its contents) is what [`CondVar`](crate::condvar::CondVar)
/// needs to compare across waiters.
pub struct Mutex<T> {
    inner: Arc<parking_lot::Mutex<T>>,
}

impl<T> Clone for Mutex<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(parking_lot::Mutex::new(value)),
        }
    }

    /// Blocking acquire.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        MutexGuard {
            mutex: self,
            guard: Some(self.inner.lock()),
        }
    }

    /// Non-blocking acquire ("spinlock" in the source terminology: a single
    /// attempt, not a spin loop).
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.inner.try_lock().map(|g| MutexGuard {
            mutex: self,
            guard: Some(g),
        })
    }

    /// Identity comparison: two handles refer to the same underlying mutex.
    pub fn equal(a: &Mutex<T>, b: &Mutex<T>) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Stable identity token, usable as a map/comparison key independent of `T`.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

/// RAII guard returned by [`Mutex::lock`] / [`Mutex::try_lock`].
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
    guard: Option<parking_lot::MutexGuard<'a, T>>,
}

impl<'a, T> MutexGuard<'a, T> {
    /// Identity of the mutex this guard was acquired from.
    pub fn mutex_identity(&self) -> usize {
        self.mutex.identity()
    }

    pub fn mutex(&self) -> &'a Mutex<T> {
        self.mutex
    }
}

impl<'a, T> Deref for MutexGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.guard.as_ref().expect("guard taken")
    }
}

impl<'a, T> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.as_mut().expect("guard taken")
    }
}

impl<'a, T: std::fmt::Debug> std::fmt::Debug for MutexGuard<'a, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&**self, f)
    }
}
