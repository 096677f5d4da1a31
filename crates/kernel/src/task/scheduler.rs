//! Round-robin scheduler: a FIFO ready queue under a single lock.
//!
//! Adapted from the teacher's `VecDeque`-backed `Scheduler`
//! (`yield_and_reschedule` combines add + pick in one lock acquisition).
//! `spec.md`'s Design Notes specify the contract as `add(tcb)`,
//! `remove(tcb)`, `pick_next(current) -> Option<tcb>`, rotating the FIFO
//! on every pick; the teacher's version has no `remove` since its design
//! never pre-empts a queued-but-not-running task, so this adds one for
//! the case of a thread blocking or exiting while still queued.

use alloc::collections::VecDeque;

use los_hal::IrqSafeLock;

use super::{TaskId, ThreadControlBlock};

pub struct Scheduler {
    ready: IrqSafeLock<VecDeque<ThreadControlBlock>>,
}

impl Scheduler {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ready: IrqSafeLock::new(VecDeque::new()),
        }
    }

    /// Add a thread to the back of the ready queue.
    pub fn add(&self, tcb: ThreadControlBlock) {
        self.ready.lock().push_back(tcb);
    }

    /// Remove a thread from the ready queue by id, if it is still queued.
    /// Returns the removed TCB, or `None` if it wasn't there (e.g. it was
    /// already running).
    pub fn remove(&self, id: TaskId) -> Option<ThreadControlBlock> {
        let mut ready = self.ready.lock();
        let pos = ready.iter().position(|tcb| tcb.id == id)?;
        ready.remove(pos)
    }

    /// Rotate the FIFO: if `current` is `Some`, push it to the back
    /// first, then pop the new head. One lock acquisition either way.
    pub fn pick_next(&self, current: Option<ThreadControlBlock>) -> Option<ThreadControlBlock> {
        let mut ready = self.ready.lock();
        if let Some(tcb) = current {
            ready.push_back(tcb);
        }
        ready.pop_front()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ready.lock().is_empty()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Global scheduler instance, one ready queue per CPU in a real kernel;
/// this workspace keeps a single instance since `spec.md` §5 notes the
/// scheduler collaborator "is independently single-threaded per CPU."
pub static SCHEDULER: Scheduler = Scheduler::new();

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    fn tcb(id: u64) -> ThreadControlBlock {
        ThreadControlBlock::new(TaskId(id), None)
    }

    #[test]
    fn pick_next_rotates_fifo_order() {
        let sched = Scheduler::new();
        sched.add(tcb(1));
        sched.add(tcb(2));
        sched.add(tcb(3));

        let first = sched.pick_next(None).unwrap();
        assert_eq!(first.id, TaskId(1));

        // Rotating the just-run thread back in puts it behind 2 and 3.
        let second = sched.pick_next(Some(first)).unwrap();
        assert_eq!(second.id, TaskId(2));

        let third = sched.pick_next(Some(second)).unwrap();
        assert_eq!(third.id, TaskId(3));

        let wrapped = sched.pick_next(Some(third)).unwrap();
        assert_eq!(wrapped.id, TaskId(1));
    }

    #[test]
    fn remove_takes_a_queued_thread_out_of_rotation() {
        let sched = Scheduler::new();
        sched.add(tcb(1));
        sched.add(tcb(2));

        let removed = sched.remove(TaskId(1));
        assert_eq!(removed.map(|t| t.id), Some(TaskId(1)));

        // Only task 2 remains.
        let next = sched.pick_next(None).unwrap();
        assert_eq!(next.id, TaskId(2));
        assert!(sched.is_empty() || sched.pick_next(Some(next)).unwrap().id == TaskId(2));
    }

    #[test]
    fn remove_of_an_unqueued_id_is_a_no_op() {
        let sched = Scheduler::new();
        sched.add(tcb(1));
        assert_eq!(sched.remove(TaskId(99)), None);
        assert_eq!(sched.pick_next(None).unwrap().id, TaskId(1));
    }

    #[test]
    fn pick_next_on_empty_queue_returns_none() {
        let sched = Scheduler::new();
        assert_eq!(sched.pick_next(None), None);
    }
}
