//! RAII ownership of worker thread handles.

use std::thread::JoinHandle;

/// Owns the pool's worker join handles and joins them all on drop, so no
/// teardown path -- including a failure partway through construction -- can
/// leave a running thread behind.
pub struct Joiner {
    handles: Vec<JoinHandle<()>>,
}

impl Joiner {
    /// Create an empty joiner.
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
        }
    }

    /// Take ownership of one worker handle.
    pub fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    /// Whether every owned thread has ended (vacuously true when no
    /// handles are held). Non-blocking.
    pub fn all_finished(&self) -> bool {
        self.handles.iter().all(|handle| handle.is_finished())
    }

    /// Block until every owned thread has ended. Idempotent.
    pub fn join_all(&mut self) {
        for handle in self.handles.drain(..) {
            // A panicked worker already tore through its own loop; its
            // handle still must not be leaked.
            let _ = handle.join();
        }
    }
}

impl Default for Joiner {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Joiner {
    fn drop(&mut self) {
        self.join_all();
    }
}
