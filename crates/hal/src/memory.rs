//! Global frame allocator: the buddy engine behind a single big lock.
//!
//! `spec.md`'s Design Notes ask for a "polymorphic allocator surface":
//! source uses inheritance to expose `page_allocator` with a buddy
//! implementation underneath. This workspace maps that onto a trait —
//! [`PageAllocator`] — with [`FrameAllocator`] as the one implementation a
//! host depends on through the trait, never the concrete type.

use crate::allocator::{AllocError, AllocFlags, BuddyAllocator, PageIndex, PageRef, Pfn};
use crate::IrqSafeLock;

/// Capability surface a host depends on. Mirrors `spec.md` §6's public
/// operation table exactly; `dump` is diagnostic-only and never load-
/// bearing, as the spec requires.
pub trait PageAllocator {
    fn insert_free_pages(&self, start: Pfn, count: u64);
    fn allocate_pages(&self, order: u32, flags: AllocFlags) -> Result<PageRef, AllocError>;
    fn free_pages(&self, start: Pfn, order: u32);
    fn total_free(&self) -> u64;
    fn dump(&self);
}

/// Global frame allocator: [`BuddyAllocator`] behind an [`IrqSafeLock`].
///
/// Two-phase construction, matching the engine it wraps: `new()` is
/// `const` so this can sit in a `static`, and `init()` supplies the
/// host's page index once the kernel has one to give (`spec.md` §6's
/// `new(manager)`).
pub struct FrameAllocator(IrqSafeLock<BuddyAllocator>);

// SAFETY: all access to the inner `BuddyAllocator` goes through
// `IrqSafeLock`, which serializes it; the allocator itself holds no
// thread-local state.
unsafe impl Send for FrameAllocator {}
unsafe impl Sync for FrameAllocator {}

impl FrameAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self(IrqSafeLock::new(BuddyAllocator::new()))
    }

    /// Bind the host's page index. Must be called exactly once before any
    /// other method, per `spec.md` §6's `new(manager)` contract.
    pub fn init(&self, page_index: &'static dyn PageIndex) {
        self.0.lock().init(page_index);
    }
}

impl Default for FrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PageAllocator for FrameAllocator {
    fn insert_free_pages(&self, start: Pfn, count: u64) {
        self.0.lock().insert_free_pages(start, count);
    }

    fn allocate_pages(&self, order: u32, flags: AllocFlags) -> Result<PageRef, AllocError> {
        self.0.lock().allocate_pages(order, flags)
    }

    fn free_pages(&self, start: Pfn, order: u32) {
        self.0.lock().free_pages(start, order);
    }

    fn total_free(&self) -> u64 {
        self.0.lock().total_free()
    }

    fn dump(&self) {
        self.0.lock().dump();
    }
}

/// Global frame allocator instance. A host binds it to a concrete
/// [`PageIndex`] at boot with [`FrameAllocator::init`]; every allocation
/// thereafter flows through the single lock this type holds.
pub static FRAME_ALLOCATOR: FrameAllocator = FrameAllocator::new();

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::allocator::{VecPageIndex, PAGE_SIZE};
    use alloc::boxed::Box;

    fn leaked_index(count: u64) -> &'static VecPageIndex {
        Box::leak(Box::new(VecPageIndex::new(0x1000, PAGE_SIZE, count)))
    }

    #[test]
    fn trait_surface_round_trips_through_the_lock() {
        let fa = FrameAllocator::new();
        fa.init(leaked_index(8));
        fa.insert_free_pages(Pfn(0), 8);
        assert_eq!(fa.total_free(), 8);

        let block = fa.allocate_pages(1, AllocFlags::empty()).unwrap();
        assert_eq!(fa.total_free(), 6);
        fa.free_pages(block.pfn, block.order);
        assert_eq!(fa.total_free(), 8);
    }

    #[test]
    fn out_of_memory_surfaces_through_the_trait() {
        let fa = FrameAllocator::new();
        fa.init(leaked_index(1));
        fa.insert_free_pages(Pfn(0), 1);
        fa.allocate_pages(0, AllocFlags::empty()).unwrap();
        assert_eq!(
            fa.allocate_pages(0, AllocFlags::empty()),
            Err(AllocError::OutOfMemory)
        );
    }
}
