//! The buddy engine.
//!
//! Free blocks of a given order live in a singly-linked, PFN-ascending
//! list; the link lives in the free page itself (see [`super::overlay`]),
//! not in any out-of-line metadata. Freeing a block does not eagerly walk
//! up the order chain looking for a buddy to fold into — it records the
//! opportunity in [`super::pending_merge::PendingMerges`] and leaves the
//! actual coalescing for [`BuddyAllocator::cleanup_pending_merges`],
//! called only when an allocation would otherwise fail.

use bitflags::bitflags;
use log::{debug, trace};

use super::overlay::{read_next_free, write_next_free};
use super::page::{PageIndex, Pfn};
use super::pending_merge::PendingMerges;

#[cfg(feature = "recent-free-cache")]
use super::cache::RecentFreeCache;

/// Highest order the engine manages, inclusive. `2^LAST_ORDER` pages is
/// the largest block `allocate_pages` can ever hand out.
pub const LAST_ORDER: usize = 16;

/// `log2` of the host's page size. Compile-time per the allocator's
/// ambient configuration; this engine does not negotiate page size at
/// runtime.
pub const PAGE_BITS: u32 = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_BITS;

bitflags! {
    /// Allocation-time modifiers.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AllocFlags: u8 {
        /// Zero every page in the block before returning it.
        const ZERO = 1 << 0;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// No block of the requested order was available, even after a
    /// pending-merge cleanup pass.
    OutOfMemory,
}

/// A block handed out by [`BuddyAllocator::allocate_pages`]. Carries its
/// own order so `free` doesn't require the caller to have kept track of
/// it separately, though callers remain free to do so.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRef {
    pub pfn: Pfn,
    pub order: u32,
}

/// Buddy allocator over a single contiguous physical region.
///
/// Two-phase construction mirrors the rest of this stack's allocators:
/// `new()` is `const` so it can sit in a `static`, and `init()` supplies
/// the host's page index once the kernel has one to give.
pub struct BuddyAllocator {
    free_list: [Option<Pfn>; LAST_ORDER + 1],
    total_free: u64,
    pending: PendingMerges,
    #[cfg(feature = "recent-free-cache")]
    cache: RecentFreeCache,
    page_index: Option<&'static dyn PageIndex>,
}

impl BuddyAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            free_list: [None; LAST_ORDER + 1],
            total_free: 0,
            pending: PendingMerges::new(),
            #[cfg(feature = "recent-free-cache")]
            cache: RecentFreeCache::new(),
            page_index: None,
        }
    }

    /// Bind the host's page index. Must be called exactly once before any
    /// other method; every other method panics on a missing index rather
    /// than silently no-op, since that would mask a host bug.
    pub fn init(&mut self, page_index: &'static dyn PageIndex) {
        self.page_index = Some(page_index);
    }

    #[must_use]
    pub fn total_free(&self) -> u64 {
        self.total_free
    }

    fn index(&self) -> &'static dyn PageIndex {
        self.page_index.expect("BuddyAllocator used before init()")
    }

    fn base_of(&self, pfn: Pfn) -> usize {
        self.index().descriptor(pfn).base_address
    }

    fn next_of(&self, pfn: Pfn) -> Option<Pfn> {
        // SAFETY: pfn is only ever passed here while it is linked into a
        // free list, i.e. still free and overlay-readable.
        unsafe { read_next_free(self.base_of(pfn)) }
    }

    fn set_next(&self, pfn: Pfn, next: Option<Pfn>) {
        // SAFETY: see `next_of`.
        unsafe { write_next_free(self.base_of(pfn), next) };
    }

    /// Splice `pfn` into `free_list[order]`, keeping the list sorted
    /// ascending by PFN. `pfn` must not already be linked anywhere.
    ///
    /// Panics if `pfn` is misaligned for `order` or is already present in
    /// `free_list[order]` — the latter is the structural double-free
    /// check `spec.md` §4.8/§7.1 requires: a second `free_pages` on an
    /// already-free block is a programming error, not a recoverable
    /// state, so this aborts rather than silently duplicating the PFN.
    fn insert_free_block(&mut self, order: usize, pfn: Pfn) {
        assert!(
            pfn.is_aligned(order as u32),
            "insert_free_block: {pfn:?} not aligned at order {order}"
        );

        let mut prev: Option<Pfn> = None;
        let mut cur = self.free_list[order];
        while let Some(cur_pfn) = cur {
            assert!(
                cur_pfn != pfn,
                "insert_free_block: {pfn:?} already present at order {order} (double free)"
            );
            if cur_pfn.0 > pfn.0 {
                break;
            }
            prev = Some(cur_pfn);
            cur = self.next_of(cur_pfn);
        }

        self.set_next(pfn, cur);
        match prev {
            Some(p) => self.set_next(p, Some(pfn)),
            None => self.free_list[order] = Some(pfn),
        }
    }

    /// Unlink `pfn` from `free_list[order]`. Panics if `pfn` is not
    /// actually there — a caller asking to remove a block it doesn't
    /// believe is free is a bug in the engine, not a recoverable state.
    fn remove_free_block(&mut self, order: usize, pfn: Pfn) {
        let mut prev: Option<Pfn> = None;
        let mut cur = self.free_list[order];
        while let Some(cur_pfn) = cur {
            if cur_pfn == pfn {
                let rest = self.next_of(cur_pfn);
                match prev {
                    Some(p) => self.set_next(p, rest),
                    None => self.free_list[order] = rest,
                }
                self.set_next(pfn, None);
                return;
            }
            prev = Some(cur_pfn);
            cur = self.next_of(cur_pfn);
        }
        unreachable!("remove_free_block: {pfn:?} not linked at order {order}");
    }

    fn is_buddy_free(&self, order: usize, pfn: Pfn) -> bool {
        let mut cur = self.free_list[order];
        while let Some(cur_pfn) = cur {
            if cur_pfn == pfn {
                return true;
            }
            cur = self.next_of(cur_pfn);
        }
        false
    }

    /// Split the free block at `pfn` (order `order`, `order > 0`) into two
    /// order-`order - 1` blocks and insert both.
    fn split_block(&mut self, order: usize, pfn: Pfn) {
        assert!(order > 0, "split_block: order 0 has no smaller buddy pair");
        self.remove_free_block(order, pfn);
        let lower_order = order as u32 - 1;
        let second = pfn.checked_add(1u64 << lower_order);
        self.insert_free_block(order - 1, pfn);
        self.insert_free_block(order - 1, second);
    }

    /// Fold `pfn`'s order-`order` block together with its buddy, if the
    /// buddy is in fact free, then keep folding upward as far as buddies
    /// keep being free. Returns the final `(order, pfn)` the merged chain
    /// settled at.
    fn merge_buddies(&mut self, order: usize, pfn: Pfn) -> (usize, Pfn) {
        if order >= LAST_ORDER {
            return (order, pfn);
        }
        let buddy = pfn.buddy(order as u32);
        if !buddy.is_aligned(order as u32) || !self.is_buddy_free(order, buddy) {
            return (order, pfn);
        }

        self.remove_free_block(order, pfn);
        self.remove_free_block(order, buddy);
        let merged = if pfn.0 < buddy.0 { pfn } else { buddy };
        self.insert_free_block(order + 1, merged);
        trace!("merged order {order} pfn {} + buddy {} -> order {}", pfn.0, buddy.0, order + 1);
        self.merge_buddies(order + 1, merged)
    }

    /// Insert a freshly-donated physical range into the free lists,
    /// greedily choosing the largest aligned order at each step. Used at
    /// boot to hand the allocator its backing memory; never merges across
    /// donations, since adjoining ranges aren't known to be buddies.
    pub fn insert_free_pages(&mut self, mut start: Pfn, mut count: u64) {
        while count > 0 {
            let mut order = LAST_ORDER;
            while order > 0 && (!start.is_aligned(order as u32) || (1u64 << order) > count) {
                order -= 1;
            }
            self.insert_free_block(order, start);
            self.total_free += 1u64 << order;
            start = start.checked_add(1u64 << order);
            count -= 1u64 << order;
        }
        debug!("insert_free_pages: total_free now {}", self.total_free);
    }

    /// Release a previously-allocated block back to the allocator.
    ///
    /// Does not eagerly merge. If the buddy happens to already be free,
    /// the merge opportunity is either recorded as pending (first time
    /// seen) or, if a pending bit for this exact pair was already set,
    /// acted on immediately and folded upward.
    pub fn free_pages(&mut self, pfn: Pfn, order: u32) {
        let order = order as usize;

        #[cfg(feature = "recent-free-cache")]
        if self.cache.push(order, pfn) {
            // Cached blocks are not in the free lists (spec.md §4.6); the
            // buddy-merge check below only ever sees free-list members,
            // so a cached block simply isn't considered for coalescing
            // until it's drained back out by `take_block`.
            self.total_free += 1u64 << order;
            return;
        }

        self.insert_free_block(order, pfn);

        if order < LAST_ORDER {
            let buddy = pfn.buddy(order as u32);
            if buddy.is_aligned(order as u32) && self.is_buddy_free(order, buddy) {
                let lower = if pfn.0 < buddy.0 { pfn } else { buddy };
                if self.pending.test(order, lower.0) {
                    self.pending.clear(order, lower.0);
                    self.merge_buddies(order, lower);
                } else {
                    self.pending.set(order, lower.0);
                }
            }
        }

        self.total_free += 1u64 << order;
    }

    /// Walk every pending-merge bit across all orders and attempt the
    /// merge it hints at. Best-effort: a bit that no longer corresponds
    /// to an actual mergeable pair (collision, or already merged by some
    /// other path) is simply cleared and skipped.
    pub fn cleanup_pending_merges(&mut self) {
        for order in 0..LAST_ORDER {
            let bits: alloc::vec::Vec<u32> = self.pending.set_bit_indices(order).collect();
            for bit in bits {
                // Recover the candidate lower PFN from the hash index.
                // Only exact for regions under `MAX_PENDING_MERGES` pages
                // at this order; larger regions may simply miss the
                // reclaim, which is fine, since this pass is a hint.
                let candidate = (bit as u64 + 64 - (order as u64 % 64)) % 64;
                let lower = Pfn(candidate);
                self.pending.clear(order, lower.0);

                if !lower.is_aligned(order as u32 + 1) {
                    continue;
                }
                let upper = lower.buddy(order as u32);
                if self.is_buddy_free(order, lower) && self.is_buddy_free(order, upper) {
                    self.merge_buddies(order, lower);
                }
            }
        }
    }

    /// Allocate a `2^order`-page block. Splits a larger free block on the
    /// way down when no exact-order block is on hand; retries once after
    /// [`Self::cleanup_pending_merges`] if nothing was found at all.
    pub fn allocate_pages(&mut self, order: u32, flags: AllocFlags) -> Result<PageRef, AllocError> {
        let pfn = self
            .take_block(order)
            .or_else(|| {
                self.cleanup_pending_merges();
                self.take_block(order)
            })
            .ok_or(AllocError::OutOfMemory)?;

        self.total_free -= 1u64 << order;

        if flags.contains(AllocFlags::ZERO) {
            self.zero_block(pfn, order);
        }

        Ok(PageRef { pfn, order })
    }

    /// Find a block of exactly `order`, splitting the smallest available
    /// larger block down to size if no exact match is on hand.
    fn take_block(&mut self, order: u32) -> Option<Pfn> {
        let order = order as usize;

        #[cfg(feature = "recent-free-cache")]
        if let Some(pfn) = self.cache.pop(order) {
            return Some(pfn);
        }

        if let Some(pfn) = self.free_list[order] {
            self.remove_free_block(order, pfn);
            return Some(pfn);
        }

        let bigger = (order + 1..=LAST_ORDER).find(|&o| self.free_list[o].is_some())?;
        let pfn = self.free_list[bigger].expect("checked above");
        let mut cur_order = bigger;
        while cur_order > order {
            self.split_block(cur_order, pfn);
            cur_order -= 1;
        }
        self.remove_free_block(order, pfn);
        Some(pfn)
    }

    fn zero_block(&self, pfn: Pfn, order: u32) {
        for i in 0..(1u64 << order) {
            let addr = self.base_of(pfn.checked_add(i));
            // SAFETY: the block was just removed from every free list, so
            // nothing else observes it as free; writing PAGE_SIZE bytes
            // from its base is in-bounds for a page-index-backed region.
            unsafe {
                core::ptr::write_bytes(addr as *mut u8, 0, PAGE_SIZE);
            }
        }
    }

    /// Release `block` back, inverse of `allocate_pages`.
    pub fn free(&mut self, block: PageRef) {
        self.free_pages(block.pfn, block.order);
    }

    /// Log the current free-list shape at trace/debug level. Grounded on
    /// the rest of this stack's `dump()`-style diagnostics: cheap enough
    /// to call from a test, noisy enough to gate behind `trace!`.
    pub fn dump(&self) {
        debug!("buddy allocator: total_free={}", self.total_free);
        for order in 0..=LAST_ORDER {
            let mut cur = self.free_list[order];
            let mut count = 0u32;
            while let Some(pfn) = cur {
                trace!("  order {order}: pfn {}", pfn.0);
                count += 1;
                cur = self.next_of(pfn);
            }
            if count > 0 {
                debug!("  order {order}: {count} block(s)");
            }
        }
    }
}

impl Default for BuddyAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "std"))]
impl BuddyAllocator {
    /// Head of `free_list[order]`. Test/property-test inspection only —
    /// the engine itself never exposes list internals to callers.
    pub fn free_list_head(&self, order: usize) -> Option<Pfn> {
        self.free_list[order]
    }

    /// Follow one `next_free` link. Test/property-test inspection only.
    pub fn debug_next(&self, pfn: Pfn) -> Option<Pfn> {
        self.next_of(pfn)
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::super::page::VecPageIndex;
    use super::*;

    fn fresh(count: u64) -> (BuddyAllocator, &'static VecPageIndex) {
        let index: &'static VecPageIndex = alloc::boxed::Box::leak(alloc::boxed::Box::new(
            VecPageIndex::new(0x1000, PAGE_SIZE, count),
        ));
        let mut alloc = BuddyAllocator::new();
        alloc.init(index);
        alloc.insert_free_pages(Pfn(0), count);
        (alloc, index)
    }

    #[test]
    fn boot_donation_accounts_for_every_page() {
        let (alloc, _idx) = fresh(24);
        assert_eq!(alloc.total_free(), 24);
    }

    #[test]
    fn allocate_then_free_round_trips_total_free() {
        let (mut alloc, _idx) = fresh(16);
        let block = alloc.allocate_pages(2, AllocFlags::empty()).unwrap();
        assert_eq!(alloc.total_free(), 12);
        alloc.free(block);
        assert_eq!(alloc.total_free(), 16);
    }

    #[test]
    fn split_chain_hands_out_distinct_blocks() {
        let (mut alloc, _idx) = fresh(8);
        let a = alloc.allocate_pages(0, AllocFlags::empty()).unwrap();
        let b = alloc.allocate_pages(0, AllocFlags::empty()).unwrap();
        assert_ne!(a.pfn, b.pfn);
        assert_eq!(alloc.total_free(), 6);
    }

    #[test]
    fn first_matching_free_only_sets_the_pending_bit() {
        let (mut alloc, _idx) = fresh(2);
        let a = alloc.allocate_pages(0, AllocFlags::empty()).unwrap();
        let b = alloc.allocate_pages(0, AllocFlags::empty()).unwrap();
        alloc.free(b);
        alloc.free(a);
        assert!(alloc.free_list[1].is_none());
        assert_eq!(alloc.total_free(), 2);
    }

    #[test]
    fn cleanup_pending_merges_reclaims_a_deferred_pair() {
        let (mut alloc, _idx) = fresh(2);
        let a = alloc.allocate_pages(0, AllocFlags::empty()).unwrap();
        let b = alloc.allocate_pages(0, AllocFlags::empty()).unwrap();
        alloc.free(b);
        alloc.free(a);
        alloc.cleanup_pending_merges();
        assert!(alloc.free_list[1].is_some());
    }

    #[cfg(feature = "recent-free-cache")]
    #[test]
    fn freed_block_is_served_from_the_cache_before_the_free_list() {
        let (mut alloc, _idx) = fresh(1);
        let a = alloc.allocate_pages(0, AllocFlags::empty()).unwrap();
        assert!(alloc.free_list[0].is_none());

        alloc.free(a);
        // Freed block went into the cache, not free_list[0]; total_free
        // still counts it.
        assert!(alloc.free_list[0].is_none());
        assert_eq!(alloc.total_free(), 1);

        let reallocated = alloc.allocate_pages(0, AllocFlags::empty()).unwrap();
        assert_eq!(reallocated.pfn, a.pfn);
    }

    #[test]
    fn zero_flag_clears_the_block() {
        let (mut alloc, idx) = fresh(1);
        let block = alloc.allocate_pages(0, AllocFlags::ZERO).unwrap();
        let addr = idx.descriptor(block.pfn).base_address;
        let byte = unsafe { core::ptr::read(addr as *const u8) };
        assert_eq!(byte, 0);
    }

    #[test]
    fn exhausting_every_block_returns_out_of_memory() {
        let (mut alloc, _idx) = fresh(2);
        alloc.allocate_pages(1, AllocFlags::empty()).unwrap();
        assert_eq!(
            alloc.allocate_pages(0, AllocFlags::empty()),
            Err(AllocError::OutOfMemory)
        );
    }

    #[test]
    fn misaligned_donation_splits_into_largest_aligned_pieces() {
        let (alloc, _idx) = fresh(6);
        assert_eq!(alloc.total_free(), 6);
        assert!(alloc.free_list[2].is_some());
        assert!(alloc.free_list[1].is_some());
    }

    #[test]
    #[should_panic(expected = "already present")]
    fn double_free_of_the_same_block_panics() {
        let (mut alloc, _idx) = fresh(2);
        let block = alloc.allocate_pages(0, AllocFlags::empty()).unwrap();
        alloc.free(block);
        alloc.free(block);
    }

    #[test]
    #[should_panic(expected = "not aligned")]
    fn misaligned_pfn_panics_on_insert() {
        let (mut alloc, _idx) = fresh(4);
        // Order 1 requires 2-page alignment; pfn 1 isn't.
        alloc.free_pages(Pfn(1), 1);
    }

    #[test]
    #[should_panic(expected = "order 0 has no smaller buddy pair")]
    fn splitting_an_order_zero_block_panics() {
        let (mut alloc, _idx) = fresh(1);
        alloc.split_block(0, Pfn(0));
    }
}
