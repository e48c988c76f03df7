//! # Interrupt-Safe Locking
//!
//! The lock around the process-wide scheduler. It masks interrupts before
//! spinning, so a tick that arrives while the lock is held cannot re-enter
//! it, and restores the previous interrupt state on release.
//!
//! A context switch happens while the lock is held. The thread switched to
//! resumes inside its own critical section and releases the lock on its
//! way out; a thread that has never run before has no such section and calls
//! [`InterruptSafeLock::force_unlock`] from its entry trampoline.

use core::ops::{Deref, DerefMut};
use spin::{Mutex, MutexGuard};

use crate::interrupts;

/// A spinlock that disables interrupts while held
pub struct InterruptSafeLock<T> {
    inner: Mutex<T>,
    /// Debug name for identifying which lock is involved in deadlocks
    debug_name: &'static str,
}

impl<T> InterruptSafeLock<T> {
    pub const fn new(data: T, debug_name: &'static str) -> Self {
        Self {
            inner: Mutex::new(data),
            debug_name,
        }
    }

    /// Acquire the lock, returning a guard that restores interrupt state on drop
    pub fn lock(&self) -> InterruptSafeLockGuard<'_, T> {
        // Mask first: a tick between the check and the acquire would deadlock.
        let interrupts_enabled = interrupts::are_enabled();
        interrupts::disable();

        InterruptSafeLockGuard {
            guard: Some(self.inner.lock()),
            restore_interrupts: interrupts_enabled,
        }
    }

    /// Force unlock (unsafe - only use if you know the lock is held)
    ///
    /// # Safety
    /// Only call this if you know for certain the lock is currently held and
    /// that its holder's guard will never be dropped.
    pub unsafe fn force_unlock(&self) {
        self.inner.force_unlock();
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn name(&self) -> &'static str {
        self.debug_name
    }
}

pub struct InterruptSafeLockGuard<'a, T> {
    guard: Option<MutexGuard<'a, T>>,
    restore_interrupts: bool,
}

impl<'a, T> Drop for InterruptSafeLockGuard<'a, T> {
    fn drop(&mut self) {
        // Release before unmasking.
        drop(self.guard.take());

        if self.restore_interrupts {
            interrupts::enable();
        }
    }
}

impl<'a, T> Deref for InterruptSafeLockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl<'a, T> DerefMut for InterruptSafeLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.as_deref_mut().unwrap_or_else(|| unreachable!())
    }
}
