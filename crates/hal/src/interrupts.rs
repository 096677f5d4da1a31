//! Generic interrupt-enable tracking.
//!
//! The teacher workspace dispatches this to an architecture-specific GIC
//! or APIC backend; this workspace carries none (`spec.md` §1 scopes
//! those out), so it keeps only the target-independent fallback path:
//! plain process-wide state tracked with an atomic, sufficient to back
//! [`crate::IrqSafeLock`]'s disable/restore discipline without committing
//! to real hardware.

use core::sync::atomic::{AtomicBool, Ordering};

static ENABLED: AtomicBool = AtomicBool::new(true);

/// Disable interrupts, returning the previous state for [`restore`].
#[inline]
pub fn disable() -> u64 {
    u64::from(ENABLED.swap(false, Ordering::AcqRel))
}

/// Restore a state previously returned by [`disable`].
#[inline]
pub fn restore(state: u64) {
    ENABLED.store(state != 0, Ordering::Release);
}

#[must_use]
#[inline]
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Acquire)
}
