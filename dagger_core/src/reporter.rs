//! The State Reporter: a one-writer/one-reader channel carrying a task's
//! state from its execution context back to the coordinator.
//!
//! Ground truth: spec §4.5 / §9's "Cross-context state reporting" design
//! note, which prescribes "an atomic single-word cell readable by the
//! coordinator and writable by the task's execution context" as the
//! preferred implementation over a channel. `TaskState` fits in a byte, so
//! an `AtomicU8` behind a cheap-to-clone handle is exactly that cell.

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

use crate::task::TaskState;

fn encode(state: TaskState) -> u8 {
    match state {
        TaskState::Waiting => 0,
        TaskState::Running => 1,
        TaskState::Complete => 2,
        TaskState::Failed => 3,
    }
}

fn decode(byte: u8) -> TaskState {
    match byte {
        0 => TaskState::Waiting,
        1 => TaskState::Running,
        2 => TaskState::Complete,
        _ => TaskState::Failed,
    }
}

/// A shared, atomic last-value cell carrying one task's state.
///
/// Cloning a `Reporter` yields another handle to the same cell (it's an
/// `Arc` internally), so the coordinator keeps one clone for polling while
/// the execution backend gets another to write through — the "one
/// writer, one reader" contract from spec §4.5 without requiring a true
/// MPSC channel.
#[derive(Clone)]
pub struct Reporter(Arc<AtomicU8>);

impl Reporter {
    /// A fresh reporter seeded with `initial`.
    pub fn new(initial: TaskState) -> Self {
        Reporter(Arc::new(AtomicU8::new(encode(initial))))
    }

    /// The no-op reporter used when a task runs inline and nobody is
    /// polling — "the default reporter is a no-op" (spec §4.5).
    pub fn noop() -> Self {
        Reporter::new(TaskState::Waiting)
    }

    /// Called from the task's execution context on every state transition.
    pub fn report(&self, state: TaskState) {
        self.0.store(encode(state), Ordering::SeqCst);
    }

    /// Called from the coordinator to poll the task's last-reported state.
    /// Never blocks.
    pub fn current(&self) -> TaskState {
        decode(self.0.load(Ordering::SeqCst))
    }
}
