//! Core DAG-of-tasks execution engine.
//!
//! `dagger_core` implements the three tightly coupled subsystems that are
//! the hard engineering of a dependency-aware, resource-budgeted task
//! runner: the [`Datum`](datum::Datum) lifecycle, the [`Task`](task::Task)
//! lifecycle, and the [`Workflow`](coordinator::Workflow) coordinator that
//! ties them together. Concrete task bodies beyond [`variants::FunctionTask`],
//! on-disk file formats beyond "a path exists", output serialization, and
//! distribution across machines are all out of scope — see the crate's
//! `SPEC_FULL.md` for the full boundary.
//!
//! This crate has no dependency on any particular execution backend; see
//! the sibling `dagger_worker` crate for thread-pool and isolated-runtime
//! backends that satisfy [`backend::ExecutionBackend`].

#![warn(missing_docs)]

pub mod backend;
pub mod config;
pub mod converter;
pub mod coordinator;
pub mod datum;
pub mod error;
pub mod reporter;
pub mod scheduling;
pub mod task;
pub mod tracing_support;
pub mod variants;

/// Common imports for code building on top of `dagger_core`, matching the
/// teacher's `falconeri_common::prelude` pattern.
pub mod prelude {
    pub use crate::{
        backend::ExecutionBackend,
        config::WorkflowConfig,
        converter::{ConverterRegistry, InputForm},
        coordinator::{Workflow, WorkflowBuilder, WorkflowReport},
        datum::{datum_ref, Datum, DatumHandle, DatumList, DatumRef, DatumState, FileDatum, MemoryDatum},
        error::{DaggerError, Result},
        reporter::Reporter,
        scheduling::{GreedyPolicy, SchedulingPolicy},
        task::{CollectedInputs, Interrupted, Task, TaskBody, TaskId, TaskState},
    };
}

/// The version of `dagger_core` in use, so downstream binaries can report
/// which core they were built against (mirrors `falconeri_common_version`).
pub fn dagger_core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
