//! The typed error contract for `dagger_core`.
//!
//! Most internal plumbing uses [`anyhow::Result`] (re-exported as [`Result`])
//! the way `falconeri_common` does, so that `.context("...")` can be
//! sprinkled everywhere. But callers need to pattern-match on a handful of
//! specific failure modes (a cycle in the DAG, a task that isn't ready, a
//! missing converter, ...), so those are hoisted into [`DaggerError`] and
//! threaded through `anyhow::Error` via `#[from]`.

use crate::{datum::DatumState, task::TaskId, task::TaskState};

/// Errors that can escape the public API of `dagger_core`.
#[derive(Debug, thiserror::Error)]
pub enum DaggerError {
    /// DAG validation found a cycle reachable from the end task.
    #[error("workflow contains a cycle reachable from task {end_task:?}")]
    CyclicDAG {
        /// The end task the coordinator was constructed with.
        end_task: TaskId,
    },

    /// A state assignment violated the relevant transition table.
    #[error("invalid {kind} transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Which transition table was violated (`"Task"` or `"Datum"`).
        kind: &'static str,
        /// The state the object started in, formatted for display.
        from: String,
        /// The state transition was attempted to, formatted for display.
        to: String,
    },

    /// A Datum's pointer failed its variant's format validation.
    #[error("datum pointer failed format validation: {detail}")]
    InvalidFormat {
        /// A human-readable description of what was wrong.
        detail: String,
    },

    /// The converter registry had no entry for `(variant, input_form)`.
    #[error("no converter registered for datum variant {variant:?} with input form {input_form:?}")]
    NoConverter {
        /// The datum variant that was looked up.
        variant: &'static str,
        /// The requested input form.
        input_form: &'static str,
    },

    /// A `FileDatum` pointer needed external deserialization (e.g. a
    /// `.pkl` suffix under `(FileDatum, OBJECT)`) but no codec was
    /// registered via `ConverterRegistry::register_pkl_codec`.
    #[error("no codec registered to deserialize {path}")]
    NoCodec {
        /// The path that needed deserializing.
        path: std::path::PathBuf,
    },

    /// `run()` was called on a task whose dependencies are not all complete.
    #[error("task {task:?} is not ready to run (a dependency is incomplete)")]
    NotReady {
        /// The task that was not ready.
        task: TaskId,
    },

    /// A task's body returned successfully, but an output Datum never
    /// reached `AVAILABLE`.
    #[error("task {task:?} finished but output {output_name:?} never became available")]
    MissingOutput {
        /// The task whose output verification failed.
        task: TaskId,
        /// The name of the output that failed to verify.
        output_name: String,
    },

    /// The task body itself raised an error.
    #[error("task {task:?} body failed: {source}")]
    TaskBodyError {
        /// The task whose body failed.
        task: TaskId,
        /// The underlying error from the task body.
        #[source]
        source: anyhow::Error,
    },

    /// The caller interrupted the workflow.
    #[error("workflow was interrupted")]
    Interrupted,

    /// A finished task's reporter held neither `COMPLETE` nor `FAILED`.
    #[error("task {task:?} reporter held unexpected state {state:?} after finishing")]
    UnexpectedState {
        /// The task whose reporter misbehaved.
        task: TaskId,
        /// The anomalous state that was observed.
        state: TaskState,
    },
}

impl DaggerError {
    /// Build an [`InvalidTransition`](Self::InvalidTransition) for a Task.
    pub fn invalid_task_transition(from: TaskState, to: TaskState) -> Self {
        DaggerError::InvalidTransition {
            kind: "Task",
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        }
    }

    /// Build an [`InvalidTransition`](Self::InvalidTransition) for a Datum.
    pub fn invalid_datum_transition(from: DatumState, to: DatumState) -> Self {
        DaggerError::InvalidTransition {
            kind: "Datum",
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        }
    }
}

/// Common result type used throughout `dagger_core`, matching
/// `falconeri_common`'s `pub use anyhow::Result`.
pub type Result<T> = anyhow::Result<T>;

/// Marker used only for documentation purposes when a function's failure
/// mode is fully captured by [`DaggerError`] rather than arbitrary context.
pub type TypedResult<T> = std::result::Result<T, DaggerError>;
