//! One-shot result channel between a task and its submitter.
//!
//! A [`channel`] yields a producer/consumer pair over a single shared cell.
//! The producer settles the cell exactly once with either a value or a
//! [`TaskError`]; the consumer can poll for settlement or block on it.
//! Dropping the producer without settling settles the cell with
//! [`TaskError::BrokenChannel`], so a waiting consumer can always tell
//! "the computation never ran" apart from "the computation failed".

use parking_lot::{Condvar, Mutex};
use std::mem;
use std::sync::Arc;

/// Failure delivered through a [`Consumer`] instead of a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The submitted computation panicked; the payload is rendered as text.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The producer side went away before a result was produced.
    #[error("result channel broken before settlement")]
    BrokenChannel,
}

/// Error from settling a channel that has already been settled.
///
/// This is a programming error on the producer side, never ordinary control
/// flow: the scheduler settles each channel exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("result channel already settled")]
pub struct AlreadySettled;

enum CellState<V> {
    Pending,
    Ready(Result<V, TaskError>),
    Taken,
}

struct Cell<V> {
    state: Mutex<CellState<V>>,
    ready: Condvar,
}

/// Producer half of a one-shot result channel.
pub struct Producer<V> {
    cell: Arc<Cell<V>>,
}

/// Consumer half of a one-shot result channel.
pub struct Consumer<V> {
    cell: Arc<Cell<V>>,
}

/// Create a one-shot channel. The cell lives until both halves are gone.
pub fn channel<V>() -> (Producer<V>, Consumer<V>) {
    let cell = Arc::new(Cell {
        state: Mutex::new(CellState::Pending),
        ready: Condvar::new(),
    });
    (Producer { cell: cell.clone() }, Consumer { cell })
}

impl<V> Producer<V> {
    /// Settle the channel with a computed value, waking a blocked consumer.
    pub fn set_value(&self, value: V) -> Result<(), AlreadySettled> {
        self.settle(Ok(value))
    }

    /// Settle the channel with a failure, waking a blocked consumer.
    pub fn set_failure(&self, error: TaskError) -> Result<(), AlreadySettled> {
        self.settle(Err(error))
    }

    fn settle(&self, result: Result<V, TaskError>) -> Result<(), AlreadySettled> {
        let mut state = self.cell.state.lock();
        if !matches!(*state, CellState::Pending) {
            return Err(AlreadySettled);
        }
        *state = CellState::Ready(result);
        drop(state);
        self.cell.ready.notify_one();
        Ok(())
    }
}

impl<V> Drop for Producer<V> {
    fn drop(&mut self) {
        let mut state = self.cell.state.lock();
        if matches!(*state, CellState::Pending) {
            *state = CellState::Ready(Err(TaskError::BrokenChannel));
            drop(state);
            self.cell.ready.notify_one();
        }
    }
}

impl<V> Consumer<V> {
    /// Whether the channel has been settled. Non-blocking, repeatable.
    pub fn poll_ready(&self) -> bool {
        !matches!(*self.cell.state.lock(), CellState::Pending)
    }

    /// Block until the channel settles, then return the value or the failure.
    pub fn wait(self) -> Result<V, TaskError> {
        let mut state = self.cell.state.lock();
        while matches!(*state, CellState::Pending) {
            self.cell.ready.wait(&mut state);
        }
        match mem::replace(&mut *state, CellState::Taken) {
            CellState::Ready(result) => result,
            // `wait` consumes the only consumer, so the cell cannot have
            // been read before.
            _ => unreachable!("one-shot cell read twice"),
        }
    }
}
