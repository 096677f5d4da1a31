#![cfg_attr(not(feature = "std"), no_std)]

//! The buddy-system physical page allocator core.
//!
//! [`allocator`] is the whole of this crate's reason to exist: the
//! per-order free lists, the deferred-merge bitmap, the free-page overlay
//! and the optional recent-free cache. [`memory`] wraps the engine in a
//! single big lock and exposes it as a capability trait, the shape a host
//! kernel actually depends on.

extern crate alloc;

pub mod allocator;
pub mod memory;
mod interrupts;

use core::mem::ManuallyDrop;
use los_utils::{Mutex, MutexGuard};

/// IRQ-safe lock that disables interrupts while held.
///
/// `spec.md` §5 specifies no concurrency inside one allocator instance
/// beyond a single big lock; this is that lock. This workspace carries no
/// architecture backend, so [`interrupts::disable`]/[`interrupts::restore`]
/// track enable state as plain process-wide state rather than a real CPU
/// flag register — enough to demonstrate the locking discipline without
/// committing to a target.
pub struct IrqSafeLock<T> {
    inner: Mutex<T>,
}

impl<T> IrqSafeLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            inner: Mutex::new(data),
        }
    }

    pub fn lock(&self) -> IrqSafeLockGuard<'_, T> {
        let state = interrupts::disable();
        let guard = self.inner.lock();
        IrqSafeLockGuard {
            guard: ManuallyDrop::new(guard),
            state,
        }
    }

    /// Try to acquire the lock without blocking. Returns `None` if the
    /// lock is already held, restoring interrupts before returning.
    pub fn try_lock(&self) -> Option<IrqSafeLockGuard<'_, T>> {
        let state = interrupts::disable();
        if let Some(guard) = self.inner.try_lock() {
            Some(IrqSafeLockGuard {
                guard: ManuallyDrop::new(guard),
                state,
            })
        } else {
            interrupts::restore(state);
            None
        }
    }
}

pub struct IrqSafeLockGuard<'a, T> {
    guard: ManuallyDrop<MutexGuard<'a, T>>,
    state: u64,
}

impl<T> core::ops::Deref for IrqSafeLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> core::ops::DerefMut for IrqSafeLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for IrqSafeLockGuard<'_, T> {
    fn drop(&mut self) {
        // SAFETY: guard is only ever dropped once, here, before restoring
        // the pre-lock interrupt state.
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        interrupts::restore(self.state);
    }
}
