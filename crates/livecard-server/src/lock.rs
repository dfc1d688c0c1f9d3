//! Mutation lock guarding a live document.
//!
//! A thin layer over `tokio::sync::Mutex`, which grants waiters in the
//! order they asked (FIFO). The guard is the ticket: dropping it releases
//! the lock on every path, unwinding included.
//!
//! The lock is not reentrant. Acquiring it again while holding a guard on
//! the same task deadlocks.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, MutexGuard};
use tracing::trace;

pub struct MutationLock<T> {
    inner: Mutex<T>,
    next_ticket: AtomicU64,
}

/// Exclusive access to the guarded value, held until dropped.
pub struct MutationGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    ticket: u64,
}

impl<T> MutationLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Wait for exclusive access. Waiters are served first come, first served.
    pub async fn acquire(&self) -> MutationGuard<'_, T> {
        let guard = self.inner.lock().await;
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        trace!(ticket, "mutation lock granted");
        MutationGuard { guard, ticket }
    }

    /// Take the lock only if nobody holds it.
    pub fn try_acquire(&self) -> Option<MutationGuard<'_, T>> {
        let guard = self.inner.try_lock().ok()?;
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        Some(MutationGuard { guard, ticket })
    }

    /// Give the lock back. Same as dropping the guard.
    pub fn release(guard: MutationGuard<'_, T>) {
        drop(guard);
    }

    /// Run a synchronous section under the lock.
    pub async fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.acquire().await;
        f(&mut guard)
    }

    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

impl<T> MutationGuard<'_, T> {
    /// Grant number; increases by one with every acquisition.
    pub fn ticket(&self) -> u64 {
        self.ticket
    }
}

impl<T> Deref for MutationGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for MutationGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for MutationGuard<'_, T> {
    fn drop(&mut self) {
        trace!(ticket = self.ticket, "mutation lock released");
    }
}
