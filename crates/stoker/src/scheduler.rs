//! Work-stealing pool: N worker threads, one steal deque per worker, and a
//! shared injection queue for outside submissions.
//!
//! Each worker loops over a three-step lookup: pop its own deque (LIFO),
//! drain the global queue (FIFO), then steal round-robin from its peers
//! starting just after its own slot, yielding when all three come up empty.
//! [`Scheduler::run_pending_task`] exposes a single pass of the same lookup
//! so a caller blocked on a [`Consumer`] can drain queued work instead of
//! idling -- without that, a task awaiting a sub-task on a single-worker
//! pool would deadlock.

use crate::channel::{channel, Consumer, TaskError};
use crate::global_queue::GlobalQueue;
use crate::joiner::Joiner;
use crate::steal_queue::StealQueue;
use crate::task::Task;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Errors raised by pool infrastructure, never by submitted work.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Creating one of the worker threads failed. The constructor has
    /// already stopped and joined every worker that did start.
    #[error("failed to spawn worker thread {index}: {source}")]
    SpawnWorker {
        /// Index of the worker whose thread could not be created.
        index: usize,
        /// The underlying spawn failure.
        #[source]
        source: io::Error,
    },
}

/// Counters for work accepted and finished by the pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerStats {
    /// Tasks handed to `submit` since the pool was created.
    pub tasks_submitted: u64,
    /// Tasks whose invocation has finished (including ones that panicked).
    pub tasks_completed: u64,
}

/// State shared between the pool handle and its workers.
struct Shared {
    global: GlobalQueue,
    deques: Vec<StealQueue>,
    shutdown: AtomicBool,
    /// Worker slot -> thread id, filled in by each worker as it starts.
    worker_ids: RwLock<Vec<Option<ThreadId>>>,
    submitted: AtomicU64,
    completed: AtomicU64,
}

impl Shared {
    /// Bind the calling thread to its deque slot. Called exactly once per
    /// worker, at the top of its run loop; the binding never changes.
    fn register_worker(&self, index: usize) {
        self.worker_ids.write()[index] = Some(thread::current().id());
    }

    /// Deque slot bound to the calling thread, if it is one of the workers.
    fn current_worker(&self) -> Option<usize> {
        let me = thread::current().id();
        self.worker_ids.read().iter().position(|id| *id == Some(me))
    }

    /// One pass of the three-step lookup: own deque, then the global queue,
    /// then a round-robin steal starting just after the caller's own slot
    /// (so no victim is permanently favored). External callers start the
    /// steal scan at slot 0.
    fn find_task(&self, worker: Option<usize>) -> Option<Task> {
        if let Some(index) = worker {
            if let Some(task) = self.deques[index].try_pop() {
                return Some(task);
            }
        }
        if let Some(task) = self.global.try_pop() {
            return Some(task);
        }

        let count = self.deques.len();
        let start = worker.map_or(0, |index| index + 1);
        for offset in 0..count {
            let victim = (start + offset) % count;
            if Some(victim) == worker {
                continue;
            }
            if let Some(task) = self.deques[victim].try_steal() {
                trace!(victim, "stole a task");
                return Some(task);
            }
        }
        None
    }

    /// Drop every task still queued, in the global queue and in every
    /// deque. Dropping a task drops its producer, which settles its
    /// consumer as [`TaskError::BrokenChannel`].
    fn discard_queued(&self) {
        while self.global.try_pop().is_some() {}
        for deque in &self.deques {
            while deque.try_steal().is_some() {}
        }
    }

    /// Run at most one queued task. No scheduler lock is held while the
    /// task body executes; the body may freely call `submit` again.
    fn run_pending(&self, worker: Option<usize>) -> bool {
        if self.shutdown.load(Ordering::Acquire) {
            return false;
        }
        match self.find_task(worker) {
            Some(task) => {
                task.invoke();
                self.completed.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }
}

fn worker_loop(index: usize, shared: Arc<Shared>) {
    shared.register_worker(index);
    debug!(worker = index, "worker started");

    while !shared.shutdown.load(Ordering::Acquire) {
        if !shared.run_pending(Some(index)) {
            thread::yield_now();
        }
    }

    debug!(worker = index, "worker exiting");
}

/// Work-stealing thread pool.
///
/// Construction spawns every worker up front; [`shutdown`](Scheduler::shutdown)
/// (also run on drop) stops them and joins each one, so the pool never
/// leaves a detached thread behind. Tasks still queued at shutdown are
/// discarded unexecuted and their consumers settle with
/// [`TaskError::BrokenChannel`].
///
/// Teardown joins the workers from whichever thread runs `shutdown` or the
/// final drop. When sharing the pool into its own tasks (for example via
/// `Arc<Scheduler>` for [`submit`](Scheduler::submit)-from-inside-a-task),
/// keep one handle alive outside the pool: if the last handle dies inside a
/// task, the drop runs on a worker thread and joins that thread against
/// itself.
pub struct Scheduler {
    shared: Arc<Shared>,
    joiner: Mutex<Joiner>,
}

impl Scheduler {
    /// Create a pool with one worker per hardware thread (at least 2 if the
    /// hardware count is unreported).
    pub fn new() -> Result<Self, SchedulerError> {
        Self::with_workers(default_worker_count())
    }

    /// Create a pool with `worker_count` workers. A count of 0 falls back
    /// to the hardware default, as [`new`](Scheduler::new) does.
    pub fn with_workers(worker_count: usize) -> Result<Self, SchedulerError> {
        let count = if worker_count == 0 {
            default_worker_count()
        } else {
            worker_count
        };

        let shared = Arc::new(Shared {
            global: GlobalQueue::new(),
            deques: (0..count).map(|_| StealQueue::new()).collect(),
            shutdown: AtomicBool::new(false),
            worker_ids: RwLock::new(vec![None; count]),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        });

        let mut joiner = Joiner::new();
        for index in 0..count {
            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("stoker-worker-{index}"))
                .spawn(move || worker_loop(index, worker_shared));
            match spawned {
                Ok(handle) => joiner.push(handle),
                Err(source) => {
                    // Unwind the partial pool: stop and join the workers
                    // that did start, then surface the failure.
                    shared.shutdown.store(true, Ordering::Release);
                    shared.global.close();
                    joiner.join_all();
                    return Err(SchedulerError::SpawnWorker { index, source });
                }
            }
        }

        Ok(Self {
            shared,
            joiner: Mutex::new(joiner),
        })
    }

    /// Number of workers owned by the pool.
    pub fn worker_count(&self) -> usize {
        self.shared.deques.len()
    }

    /// Queue a computation and return the consumer half of its result
    /// channel. Never blocks.
    ///
    /// When called from inside one of the pool's own workers the task goes
    /// to that worker's deque (front end, popped LIFO by the owner);
    /// otherwise it goes to the global queue. The closure runs under
    /// `catch_unwind`, so a panic settles the channel as
    /// [`TaskError::Panicked`] instead of escaping into the worker loop.
    pub fn submit<F, R>(&self, f: F) -> Consumer<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (producer, consumer) = channel();
        let task = Task::new(move || {
            // First and only settlement of this channel; AlreadySettled
            // cannot occur here.
            match panic::catch_unwind(AssertUnwindSafe(f)) {
                Ok(value) => {
                    let _ = producer.set_value(value);
                }
                Err(payload) => {
                    // `&payload` would coerce the Box itself into the
                    // `dyn Any` and defeat the downcasts inside.
                    let _ = producer.set_failure(TaskError::Panicked(panic_message(payload.as_ref())));
                }
            }
        });

        self.shared.submitted.fetch_add(1, Ordering::Relaxed);
        match self.shared.current_worker() {
            Some(index) => self.shared.deques[index].push(task),
            None => self.shared.global.push(task),
        }
        consumer
    }

    /// Run at most one queued task on the calling thread.
    ///
    /// Returns `false` if no task was found (or the pool is shutting down).
    /// A caller spinning on a [`Consumer`] should loop over this instead of
    /// blocking, so the work it depends on can make progress even when every
    /// worker (possibly the caller itself) is occupied.
    pub fn run_pending_task(&self) -> bool {
        self.shared.run_pending(self.shared.current_worker())
    }

    /// Snapshot of the submitted/completed counters.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            tasks_submitted: self.shared.submitted.load(Ordering::Relaxed),
            tasks_completed: self.shared.completed.load(Ordering::Relaxed),
        }
    }

    /// Block until every submitted task has finished, or until `timeout`
    /// elapses. Returns whether the pool went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            let stats = self.stats();
            if stats.tasks_completed >= stats.tasks_submitted {
                return true;
            }
            if start.elapsed() > timeout {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Stop the pool: set the shutdown flag, wake anything blocked on the
    /// global queue, discard every queued-but-unpopped task (settling its
    /// consumer as [`TaskError::BrokenChannel`]), and join every worker.
    /// Idempotent; in-flight task invocations run to completion.
    pub fn shutdown(&self) {
        if !self.shared.shutdown.swap(true, Ordering::AcqRel) {
            debug!("scheduler shutting down");
        }
        self.shared.global.close();
        // join_all drains, so a second call (or a racing one) just waits
        // for the same teardown to finish.
        let mut joiner = self.joiner.lock();
        // Discard queued work until every worker has wound down. Once the
        // flag is set run_pending dequeues nothing, so an in-flight task
        // spinning on poll_ready/run_pending_task would otherwise wait on
        // a sub-task that can no longer run; dropping the sub-task settles
        // its channel as broken and lets the spinner finish. Workers may
        // keep submitting while they wind down, hence the loop.
        loop {
            self.shared.discard_queued();
            if joiner.all_finished() {
                break;
            }
            thread::yield_now();
        }
        joiner.join_all();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn default_worker_count() -> usize {
    match num_cpus::get() {
        0 => 2,
        n => n,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}
