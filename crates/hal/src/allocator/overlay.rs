//! Free-page metadata overlay.
//!
//! The only persistent state the allocator keeps inside a free page is a
//! single forward link, stored at the page's base address. Only the
//! block-leader page of a multi-page block carries the link; the rest of
//! the block is untouched while free. Reading or writing this overlay on
//! an allocated page is a memory-safety violation — the caller (the
//! buddy engine) must never do so.
//!
//! Grounded on the same pattern `frame_allocator`'s `FreeBlock` uses:
//! write a small header directly into the free page's own bytes instead
//! of keeping it out-of-line.

use super::page::Pfn;

/// Sentinel encoding for "no next free block" — `u64::MAX` is never a
/// valid PFN in a managed region (PFNs are dense from 0).
const EMPTY: u64 = u64::MAX;

/// Write the `next_free` link into the page at `base_address`.
///
/// # Safety
/// `base_address` must point to a page that is currently free and large
/// enough to hold one `u64`. The caller must not call this for a page
/// that any in-flight reader might be treating as allocated.
pub unsafe fn write_next_free(base_address: usize, next: Option<Pfn>) {
    let value = next.map_or(EMPTY, |pfn| pfn.0);
    // SAFETY: caller guarantees base_address is a free page's base.
    unsafe {
        core::ptr::write_unaligned(base_address as *mut u64, value);
    }
}

/// Read the `next_free` link from the page at `base_address`.
///
/// # Safety
/// `base_address` must point to a page that is currently free (i.e. one
/// whose overlay was previously written by [`write_next_free`] and has
/// not since been allocated).
pub unsafe fn read_next_free(base_address: usize) -> Option<Pfn> {
    // SAFETY: caller guarantees base_address is a free page's base.
    let value = unsafe { core::ptr::read_unaligned(base_address as *const u64) };
    if value == EMPTY {
        None
    } else {
        Some(Pfn(value))
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_a_buffer() {
        let mut buf: u64 = 0xdead_beef;
        let addr = core::ptr::addr_of_mut!(buf) as usize;

        unsafe {
            write_next_free(addr, Some(Pfn(42)));
            assert_eq!(read_next_free(addr), Some(Pfn(42)));

            write_next_free(addr, None);
            assert_eq!(read_next_free(addr), None);
        }
    }
}
