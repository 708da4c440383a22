//! The execution backend contract (spec §6): the pluggable mechanism that
//! actually runs a dispatched task's closure somewhere other than the
//! coordinator's own call stack.
//!
//! `dagger_core` depends on nothing but this trait; concrete backends
//! (a thread pool, an isolated-runtime-per-task pool) live in `dagger_worker`
//! so that the core has zero knowledge of how tasks are actually scheduled
//! onto OS resources, matching the teacher's split between
//! `falconeri_common` (contracts and models) and `falconeri-worker`
//! (the thing that actually runs a datum).

/// Something that can run a boxed closure somewhere off the coordinator's
/// thread and later be told to tear everything down.
pub trait ExecutionBackend: Send + Sync {
    /// An opaque handle to one submitted job. The coordinator never
    /// inspects it directly; it exists so the backend can join/cancel later.
    type Handle: Send + 'static;

    /// Submit a job for execution. Must not block the caller waiting for
    /// the job to finish — spec §5's "tasks never block the coordinator on
    /// their body".
    fn submit(&self, job: Box<dyn FnOnce() + Send>) -> Self::Handle;

    /// Tear down the backend. `wait`: block until outstanding jobs finish
    /// cooperatively. `kill`: additionally attempt to forcefully stop any
    /// still-running job (spec §5: "Forceful at the backend level on
    /// `interrupt()`"). A backend that cannot honor one of the two flags
    /// (e.g. a thread pool can't truly force-kill a native thread) should
    /// do the closest safe approximation and document the gap.
    fn shutdown(&self, wait: bool, kill: bool);
}
