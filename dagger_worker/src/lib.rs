//! Execution backends and the subprocess task variant for `dagger_core`.
//!
//! Ground truth: `falconeri-worker`, the teacher's "thing that actually runs
//! a datum" crate, kept separate from `falconeri_common`'s contracts the
//! same way this crate is kept separate from `dagger_core`'s. `dagger_core`
//! defines [`dagger_core::backend::ExecutionBackend`]; this crate provides
//! two concrete implementations plus [`command_task::CommandTask`], the
//! subprocess analogue of `dagger_core::variants::FunctionTask`.

#![warn(missing_docs)]

pub mod command_task;
pub mod process_backend;
pub mod thread_backend;

pub use command_task::CommandTask;
pub use process_backend::ProcessBackend;
pub use thread_backend::ThreadBackend;
