//! The round-robin scheduler collaborator.
//!
//! `spec.md`'s Design Notes describe the whole of this module's contract
//! with the buddy allocator core: "its only interaction with this core
//! is that TCBs themselves live in pages obtained from the allocator."
//! Everything else a real scheduler needs — process state, signals, file
//! descriptors — belongs to a real kernel and is out of this spec's
//! scope.

pub mod scheduler;

use los_hal::allocator::PageRef;

/// Unique identifier for a thread control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

/// Minimal thread control block: an identity and the page(s) backing it,
/// obtained from `los_hal`'s buddy allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadControlBlock {
    pub id: TaskId,
    pub pages: Option<PageRef>,
}

impl ThreadControlBlock {
    #[must_use]
    pub const fn new(id: TaskId, pages: Option<PageRef>) -> Self {
        Self { id, pages }
    }
}

pub use scheduler::Scheduler;
