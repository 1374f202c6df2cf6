//! Per-worker deque supporting owner-side LIFO and cross-worker stealing.

use crate::task::Task;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Deque owned by exactly one worker.
///
/// The owner pushes and pops at the front, so it works depth-first through
/// its most recent submissions (cache-friendly for recursive splits).
/// Thieves take from the back, so a steal grabs the oldest outstanding work
/// and rarely races the owner for the same item. One mutex guards the whole
/// deque; contention is rare by construction, since at most the owner and
/// one winning thief touch it at a time.
#[derive(Default)]
pub struct StealQueue {
    tasks: Mutex<VecDeque<Task>>,
}

impl StealQueue {
    /// Create an empty deque.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert at the front. Owner only.
    pub fn push(&self, task: Task) {
        self.tasks.lock().push_front(task);
    }

    /// Remove from the front (most recently pushed first). Owner only.
    pub fn try_pop(&self) -> Option<Task> {
        self.tasks.lock().pop_front()
    }

    /// Remove from the back (oldest work first). Any worker may call this.
    pub fn try_steal(&self) -> Option<Task> {
        self.tasks.lock().pop_back()
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Whether the deque currently holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}
