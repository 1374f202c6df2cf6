//! Stoker: a work-stealing thread pool
//!
//! A fixed pool of worker threads, each bound to one deque it pushes and
//! pops at the front while idle peers steal from the back, plus a shared
//! two-lock injection queue for submissions arriving from outside the pool.
//! Results travel back through one-shot channels that settle with the
//! task's value, its captured panic, or a broken-channel failure when the
//! pool discards the task at shutdown.
//!
//! # Example
//!
//! ```rust
//! use stoker::Scheduler;
//!
//! let pool = Scheduler::with_workers(4).expect("spawn workers");
//!
//! let answer = pool.submit(|| 6 * 7);
//! assert_eq!(answer.wait(), Ok(42));
//! ```
//!
//! A task blocked on a sub-task's result should drain queued work instead
//! of idling, so progress is possible even on a single-worker pool:
//!
//! ```rust,ignore
//! let sub = pool.submit(heavy_half);
//! while !sub.poll_ready() {
//!     pool.run_pending_task();
//! }
//! let half = sub.wait()?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod channel;
mod global_queue;
mod joiner;
mod scheduler;
mod steal_queue;
mod task;

pub use channel::{channel, AlreadySettled, Consumer, Producer, TaskError};
pub use global_queue::GlobalQueue;
pub use scheduler::{Scheduler, SchedulerError, SchedulerStats};
pub use steal_queue::StealQueue;
pub use task::Task;
