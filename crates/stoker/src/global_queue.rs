//! Shared MPMC injection queue with a fine-grained two-lock discipline.
//!
//! The queue is a singly-linked chain of nodes that always ends in one empty
//! dummy node. `head` owns the chain; `tail` is a non-owning back-reference
//! to the dummy, guarded by its own mutex so a push and a pop can proceed
//! concurrently without touching the same lock. Emptiness is judged by
//! comparing the locked head against a tail snapshot taken under the tail's
//! own lock; the two locks are never held simultaneously on the push side,
//! and the pop side always takes head before tail, so there is no ordering
//! inversion.

use crate::task::Task;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

struct Node {
    task: Option<Task>,
    next: Option<Box<Node>>,
}

impl Node {
    fn dummy() -> Box<Node> {
        Box::new(Node {
            task: None,
            next: None,
        })
    }
}

/// Unbounded multi-producer/multi-consumer FIFO queue of [`Task`]s.
///
/// Used for submissions arriving from outside the pool's own workers, and as
/// the fallback the workers drain after their local deque runs dry.
pub struct GlobalQueue {
    /// Owns the node chain. The last node is always the dummy.
    head: Mutex<Box<Node>>,
    /// Non-owning back-reference to the trailing dummy node.
    tail: Mutex<*mut Node>,
    ready: Condvar,
    closed: AtomicBool,
}

// The tail pointer always names the dummy node, which is owned through the
// `head` chain and is never unlinked by a pop (a pop stops when head reaches
// the dummy). It is only dereferenced under the `tail` lock.
unsafe impl Send for GlobalQueue {}
unsafe impl Sync for GlobalQueue {}

impl GlobalQueue {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        let mut dummy = Node::dummy();
        let tail: *mut Node = &mut *dummy;
        Self {
            head: Mutex::new(dummy),
            tail: Mutex::new(tail),
            ready: Condvar::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Append a task at the tail and signal one waiter.
    ///
    /// O(1); takes only the tail lock, never head-side state.
    pub fn push(&self, task: Task) {
        let mut new_dummy = Node::dummy();
        let new_tail: *mut Node = &mut *new_dummy;
        {
            let mut tail = self.tail.lock();
            // Fill the current dummy in place and hang the fresh dummy
            // behind it; the filled node becomes reachable to poppers the
            // moment `next` is linked.
            unsafe {
                (**tail).task = Some(task);
                (**tail).next = Some(new_dummy);
            }
            *tail = new_tail;
        }
        self.ready.notify_one();
    }

    /// Remove the oldest task, or `None` if the queue is empty.
    pub fn try_pop(&self) -> Option<Task> {
        let mut head = self.head.lock();
        if ptr::eq(&**head as *const Node, self.tail_snapshot()) {
            return None;
        }
        Self::pop_head(&mut head)
    }

    /// Block until a task is available or the queue is closed.
    ///
    /// Returns `None` once [`close`](GlobalQueue::close) has been called,
    /// even if elements remain: a closed queue hands out no further work.
    pub fn wait_and_pop(&self) -> Option<Task> {
        let mut head = self.head.lock();
        loop {
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            if !ptr::eq(&**head as *const Node, self.tail_snapshot()) {
                break;
            }
            // A push signals without the head lock, so a wakeup can slip
            // past a waiter that is between its emptiness check and the
            // wait; re-check periodically instead of parking forever.
            let _ = self
                .ready
                .wait_for(&mut head, Duration::from_millis(10));
        }
        Self::pop_head(&mut head)
    }

    /// Mark the queue closed and wake every blocked waiter.
    ///
    /// Idempotent. Tasks still queued are retained until the queue is
    /// dropped, at which point they are discarded unexecuted (breaking
    /// their result channels).
    pub fn close(&self) {
        // Taking the head lock orders the store against a waiter's check,
        // so no waiter can park after missing the close signal.
        let head = self.head.lock();
        self.closed.store(true, Ordering::Release);
        drop(head);
        self.ready.notify_all();
    }

    /// Whether [`close`](GlobalQueue::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether the queue currently holds no tasks.
    pub fn is_empty(&self) -> bool {
        let head = self.head.lock();
        ptr::eq(&**head as *const Node, self.tail_snapshot())
    }

    /// Tail pointer read under the tail's own lock. The head lock may be
    /// held by the caller; the reverse order never occurs.
    fn tail_snapshot(&self) -> *const Node {
        *self.tail.lock() as *const Node
    }

    /// Splice the head node out of the chain. Caller has verified under the
    /// head lock that head is not the dummy, so a successor exists and the
    /// node carries a task.
    fn pop_head(head: &mut MutexGuard<'_, Box<Node>>) -> Option<Task> {
        let next = head.next.take()?;
        let mut old_head = mem::replace(&mut **head, next);
        old_head.task.take()
    }
}

impl Default for GlobalQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for GlobalQueue {
    fn drop(&mut self) {
        // Unlink iteratively so a deep backlog cannot overflow the stack
        // through recursive Box drops.
        let head = self.head.get_mut();
        let mut next = head.next.take();
        while let Some(mut node) = next {
            next = node.next.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    fn marker_task(id: usize, log: &Arc<Mutex<Vec<usize>>>) -> Task {
        let log = log.clone();
        Task::new(move || log.lock().push(id))
    }

    #[test]
    fn test_try_pop_empty_returns_none() {
        let queue = GlobalQueue::new();
        assert!(queue.is_empty());
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_fifo_order() {
        let queue = GlobalQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for id in 0..100 {
            queue.push(marker_task(id, &log));
        }
        while let Some(task) = queue.try_pop() {
            task.invoke();
        }

        let seen = log.lock();
        assert_eq!(*seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_concurrent_push_and_pop_loses_nothing() {
        let queue = Arc::new(GlobalQueue::new());
        let executed = Arc::new(AtomicUsize::new(0));
        let producers = 4;
        let per_producer = 500;

        let mut handles = Vec::new();
        for _ in 0..producers {
            let queue = queue.clone();
            let executed = executed.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..per_producer {
                    let executed = executed.clone();
                    queue.push(Task::new(move || {
                        executed.fetch_add(1, Ordering::SeqCst);
                    }));
                }
            }));
        }
        for _ in 0..producers {
            let queue = queue.clone();
            handles.push(thread::spawn(move || {
                while let Some(task) = queue.wait_and_pop() {
                    task.invoke();
                }
            }));
        }

        // Wait for producers (the first `producers` handles), then close to
        // release the consumers -- but only after the backlog drains.
        for handle in handles.drain(..producers) {
            handle.join().unwrap();
        }
        while executed.load(Ordering::SeqCst) < producers * per_producer {
            thread::yield_now();
        }
        queue.close();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(executed.load(Ordering::SeqCst), producers * per_producer);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_wait_and_pop_receives_later_push() {
        let queue = Arc::new(GlobalQueue::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.wait_and_pop())
        };
        thread::sleep(Duration::from_millis(50));
        queue.push(marker_task(7, &log));

        let task = consumer.join().unwrap().expect("a task was pushed");
        task.invoke();
        assert_eq!(*log.lock(), vec![7]);
    }

    #[test]
    fn test_close_wakes_blocked_waiter() {
        let queue = Arc::new(GlobalQueue::new());

        let waiter = {
            let queue = queue.clone();
            thread::spawn(move || queue.wait_and_pop())
        };
        thread::sleep(Duration::from_millis(50));
        queue.close();

        assert!(waiter.join().unwrap().is_none());
        assert!(queue.is_closed());
    }

    #[test]
    fn test_closed_queue_hands_out_no_work() {
        let queue = GlobalQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.push(marker_task(1, &log));

        queue.close();
        assert!(queue.wait_and_pop().is_none());
        // The element is retained (discarded only on drop), not executed.
        assert!(!queue.is_empty());
    }

    #[test]
    fn test_drop_discards_backlog_without_running_it() {
        let executed = Arc::new(AtomicUsize::new(0));
        {
            let queue = GlobalQueue::new();
            for _ in 0..10_000 {
                let executed = executed.clone();
                queue.push(Task::new(move || {
                    executed.fetch_add(1, Ordering::SeqCst);
                }));
            }
            // Deep backlog: drop must not recurse node-by-node.
        }
        assert_eq!(executed.load(Ordering::SeqCst), 0);
    }
}
