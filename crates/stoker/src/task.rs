//! Type-erased unit of deferred work.

use std::fmt;

/// A move-only wrapper around one arbitrary zero-argument closure.
///
/// The closure may itself be move-only (capture a `Box`, a channel handle, a
/// file…), so the wrapper is built on `FnOnce` rather than `Fn`/`FnMut`.
/// [`invoke`](Task::invoke) consumes the task, which makes a second
/// invocation unrepresentable rather than merely checked at runtime.
pub struct Task {
    body: Box<dyn FnOnce() + Send + 'static>,
}

impl Task {
    /// Wrap a closure as a schedulable unit of work.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self { body: Box::new(f) }
    }

    /// Execute the wrapped closure. Consumes the task; the closure runs
    /// exactly once.
    pub fn invoke(self) {
        (self.body)();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Task")
    }
}
