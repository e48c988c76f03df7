//! # Locks
//!
//! A sleeping lock for kernel code, backed by the global scheduler's lock
//! table. Contending for a [`Lock`] blocks the caller and donates its
//! priority to the holder; see [`donation`](crate::donation).

use crate::donation::LockId;
use crate::global::{self, with_loom};
use crate::thread::ThreadId;

/// A non-recursive sleeping lock.
#[derive(Debug)]
pub struct Lock {
    id: LockId,
}

impl Lock {
    pub fn new() -> Self {
        Self {
            id: global::lock_create(),
        }
    }

    pub fn id(&self) -> LockId {
        self.id
    }

    /// Block until the lock is ours.
    pub fn acquire(&self) {
        with_loom(|s| s.lock_acquire(self.id));
    }

    pub fn try_acquire(&self) -> bool {
        with_loom(|s| s.lock_try_acquire(self.id))
    }

    pub fn release(&self) {
        with_loom(|s| s.lock_release(self.id));
    }

    /// Acquire and return a guard that releases on drop.
    pub fn lock(&self) -> LockGuard<'_> {
        self.acquire();
        LockGuard { lock: self }
    }

    pub fn holder(&self) -> Option<ThreadId> {
        with_loom(|s| s.lock_holder(self.id))
    }

    pub fn held_by_current_thread(&self) -> bool {
        with_loom(|s| s.lock_held_by_current(self.id))
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if global::is_initialized() {
            with_loom(|s| s.lock_destroy(self.id));
        }
    }
}

pub struct LockGuard<'a> {
    lock: &'a Lock,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
