//! The Task lifecycle: `WAITING <-> RUNNING <-> {COMPLETE, FAILED}`.
//!
//! A [`Task`] wraps a caller-supplied [`TaskBody`] (the concrete work —
//! `FunctionTask`, `CommandTask`, ...) with the generic bookkeeping shared
//! by every task: dependencies, named input/output Datums, quickhash, and
//! the state machine itself. This mirrors `abstract/task.py`'s split
//! between `AbstractTask` and its concrete subclasses in the same way
//! [`crate::datum`] mirrors `abstract/datum.py`.

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::{instrument, trace, warn};

use crate::{
    converter::{ConverterRegistry, InputForm},
    datum::DatumRef,
    error::DaggerError,
    reporter::Reporter,
};

/// An index into a [`Workflow`](crate::coordinator::Workflow)'s task arena.
///
/// Design Notes §9 of the system this mirrors calls out that a Task owning
/// output Datums which in turn hold `parents` back-references to the Task
/// creates a reference cycle; the recommended fix — integer task-IDs within
/// a workflow-scoped arena — is what `TaskId` is. A `Datum::parents` is a
/// `Vec<TaskId>`, never a live `Task` handle.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TaskId(u32);

impl TaskId {
    pub(crate) fn from_index(index: usize) -> Self {
        TaskId(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    /// Build a `TaskId` directly, for unit tests that exercise a `Datum` or
    /// `Task` in isolation without a full [`Workflow`](crate::coordinator::Workflow)
    /// arena. Not meant for use outside tests.
    pub fn new_for_test(raw: u32) -> Self {
        TaskId(raw)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A task's position in its state machine.
///
/// Legal transitions are exactly:
/// `WAITING -> RUNNING`, `RUNNING -> COMPLETE`, `RUNNING -> FAILED`,
/// `RUNNING -> WAITING` (interrupt), `WAITING -> COMPLETE` (sync verifies a
/// prior run is still good), `COMPLETE -> WAITING` (sync finds stale
/// inputs), `FAILED -> WAITING` (sync / retry).
///
/// `COMPLETE` and `FAILED` are never directly interchangeable; a retry
/// always passes back through `WAITING`. The coordinator's `READY` bucket
/// is not a `TaskState` variant — it is a transient classification of
/// `WAITING` tasks whose dependencies are all `COMPLETE` (see
/// [`crate::coordinator`]).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TaskState {
    /// Not currently running; either never started, interrupted, or
    /// invalidated by a stale dependency.
    Waiting,
    /// Dispatched to an execution backend; body is executing.
    Running,
    /// Body succeeded and every output Datum reached `AVAILABLE`.
    Complete,
    /// Body raised, or an output failed to become `AVAILABLE`.
    Failed,
}

impl TaskState {
    fn can_transition_to(self, to: TaskState) -> bool {
        use TaskState::*;
        if self == to {
            return true;
        }
        matches!(
            (self, to),
            (Waiting, Running)
                | (Running, Complete)
                | (Running, Failed)
                | (Running, Waiting)
                | (Waiting, Complete)
                | (Complete, Waiting)
                | (Failed, Waiting)
        )
    }
}

/// Cooperative-cancellation signal.
///
/// A [`TaskBody::run_logic`] implementation observes this at its own I/O
/// boundaries (the core cannot inject it automatically) and returns it
/// wrapped in an `anyhow::Error`; [`Task::run`] downcasts the error chain
/// looking for this marker to distinguish an interruption (→ `WAITING`)
/// from an ordinary body failure (→ `FAILED`).
#[derive(Debug, Default, Copy, Clone)]
pub struct Interrupted;

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task was interrupted")
    }
}

impl std::error::Error for Interrupted {}

/// A value handed to a task body: the named, materialized inputs
/// ([`TaskBody::collect_inputs`]'s return type).
pub type CollectedInputs = HashMap<String, Box<dyn Any + Send>>;

/// The variant-specific behavior a concrete task type must provide.
///
/// This is the Rust analogue of `AbstractTask`'s abstract methods from
/// `dagger/abstract/task.py` / `dagger/core/task.py`.
pub trait TaskBody: fmt::Debug + Send {
    /// Build this task's output Datums, keyed by name. `id` is the task's
    /// own identity, to be installed as each output's sole parent.
    fn initialize_outputs(&self, id: TaskId) -> HashMap<String, DatumRef>;

    /// A fingerprint satisfying the Task quickhash contract (spec §4.4):
    /// distinct identifiers yield distinct fingerprints, and the
    /// fingerprint changes whenever the body or configuration changes in a
    /// way that would invalidate prior outputs.
    fn quickhash(&self) -> u64;

    /// How this task's inputs should be materialized by the default
    /// [`collect_inputs`](TaskBody::collect_inputs); a variant that
    /// overrides `collect_inputs` entirely may ignore this.
    fn input_form(&self) -> InputForm;

    /// The body itself. Must populate every Datum in `outputs`; any
    /// output left un-`AVAILABLE` after this returns `Ok` is reported as
    /// [`DaggerError::MissingOutput`] by the caller.
    fn run_logic(
        &mut self,
        inputs: CollectedInputs,
        outputs: &mut HashMap<String, DatumRef>,
    ) -> anyhow::Result<()>;

    /// Materialize named inputs via the converter registry, using
    /// [`input_form`](TaskBody::input_form). Override for a task variant
    /// with per-input forms.
    fn collect_inputs(
        &self,
        inputs: &HashMap<String, DatumRef>,
        registry: &ConverterRegistry,
    ) -> anyhow::Result<CollectedInputs> {
        let form = self.input_form();
        let mut collected = HashMap::with_capacity(inputs.len());
        for (name, datum) in inputs {
            let value = registry.convert(datum, form)?;
            collected.insert(name.clone(), value);
        }
        Ok(collected)
    }

    /// Idempotent teardown run after a cooperative interruption. The stock
    /// policy (and the default impl) clears every output so a retry starts
    /// clean.
    fn interrupt_cleanup(&mut self, outputs: &HashMap<String, DatumRef>) {
        clear_outputs(outputs);
    }

    /// Idempotent teardown run after the body fails. Defaults to the same
    /// policy as [`interrupt_cleanup`](TaskBody::interrupt_cleanup).
    fn fail_cleanup(&mut self, outputs: &HashMap<String, DatumRef>) {
        clear_outputs(outputs);
    }
}

fn clear_outputs(outputs: &HashMap<String, DatumRef>) {
    for datum in outputs.values() {
        datum.lock().clear();
    }
}

/// The mutable state behind a [`Task`] handle.
struct TaskInner {
    id: TaskId,
    state: TaskState,
    dependencies: Vec<TaskId>,
    inputs: HashMap<String, DatumRef>,
    outputs: HashMap<String, DatumRef>,
    body: Box<dyn TaskBody>,
    quickhash: u64,
    /// Baseline fingerprints of named inputs as of the last confirmed
    /// `COMPLETE`, used by [`Workflow::verify_complete`](crate::coordinator::Workflow::verify_complete)
    /// to detect "an input changed since we last ran". `None` until the
    /// task has completed at least once; a first-use baseline is primed
    /// rather than treated as a mismatch (see DESIGN.md: resolves the
    /// spec's open question about `sync()`'s post-failure re-fingerprinting).
    last_known_input_hashes: Option<HashMap<String, Option<u64>>>,
    /// Scheduling priority; higher runs first among READY tasks with ties
    /// broken by arena insertion order.
    priority: i64,
    /// Resource demand by budget key, e.g. `{"cpu": 4.0}`.
    resources: HashMap<String, f64>,
}

impl fmt::Debug for TaskInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskInner")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("dependencies", &self.dependencies)
            .field("quickhash", &self.quickhash)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// A node in a [`Workflow`](crate::coordinator::Workflow)'s DAG.
///
/// Cheap to clone: internally an `Arc<Mutex<TaskInner>>`, so a clone is a
/// handle to the same task rather than a copy. This is the literal
/// implementation of the "make a shallow clone of the task... for
/// submission to the execution backend" launch step from spec §4.6 — see
/// DESIGN.md for why clearing `dependencies` on the execution-side clone
/// (as the original does, to stop the executing context from chasing
/// references back into the graph) is unnecessary here: `dependencies` is
/// already just inert `TaskId` values, not live references.
#[derive(Clone)]
pub struct Task(Arc<Mutex<TaskInner>>);

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0.lock(), f)
    }
}

impl Task {
    /// Construct a new task, merging `explicit_dependencies` with the
    /// producing tasks of every input Datum (spec §4.4: "Construction
    /// merges `dependencies` with the producing tasks of all input
    /// Datums"), initializing outputs via the body, and computing the
    /// initial quickhash.
    pub fn new(
        id: TaskId,
        mut body: Box<dyn TaskBody>,
        explicit_dependencies: Vec<TaskId>,
        inputs: HashMap<String, DatumRef>,
        priority: i64,
        resources: HashMap<String, f64>,
    ) -> Self {
        let mut dependencies = explicit_dependencies;
        for datum in inputs.values() {
            for parent in datum.lock().parents() {
                if !dependencies.contains(&parent) {
                    dependencies.push(parent);
                }
            }
        }
        let outputs = body.initialize_outputs(id);
        let quickhash = body.quickhash();
        Task(Arc::new(Mutex::new(TaskInner {
            id,
            state: TaskState::Waiting,
            dependencies,
            inputs,
            outputs,
            body,
            quickhash,
            last_known_input_hashes: None,
            priority,
            resources,
        })))
    }

    /// This task's own identity.
    pub fn id(&self) -> TaskId {
        self.0.lock().id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.0.lock().state
    }

    /// The tasks this one depends on (explicit dependencies plus the
    /// producers of its inputs).
    pub fn dependencies(&self) -> Vec<TaskId> {
        self.0.lock().dependencies.clone()
    }

    /// Scheduling priority; higher values are preferred by
    /// [`GreedyPolicy`](crate::scheduling::GreedyPolicy).
    pub fn priority(&self) -> i64 {
        self.0.lock().priority
    }

    /// Resource demand by budget key.
    pub fn resources(&self) -> HashMap<String, f64> {
        self.0.lock().resources.clone()
    }

    /// This task's output Datums, by name.
    pub fn outputs(&self) -> HashMap<String, DatumRef> {
        self.0.lock().outputs.clone()
    }

    /// This task's input Datums, by name.
    pub fn inputs(&self) -> HashMap<String, DatumRef> {
        self.0.lock().inputs.clone()
    }

    /// The task's own stored quickhash.
    pub fn quickhash(&self) -> u64 {
        self.0.lock().quickhash
    }

    fn transition(inner: &mut TaskInner, to: TaskState) -> Result<(), DaggerError> {
        if !inner.state.can_transition_to(to) {
            return Err(DaggerError::invalid_task_transition(inner.state, to));
        }
        inner.state = to;
        Ok(())
    }

    /// Run this task's body.
    ///
    /// `ready` is supplied by the caller (the
    /// [`Workflow`](crate::coordinator::Workflow), which alone knows every
    /// dependency's state) rather than recomputed here, since a task
    /// dispatched onto an execution backend has no arena access of its
    /// own — see DESIGN.md.
    ///
    /// `reporter` receives every state transition this call makes; pass a
    /// throwaway [`Reporter`] for an inline, unsupervised run.
    #[instrument(skip_all, level = "debug", fields(task = %self.id()))]
    pub fn run(
        &self,
        ready: bool,
        registry: &ConverterRegistry,
        reporter: &Reporter,
    ) -> Result<(), DaggerError> {
        if !ready {
            return Err(DaggerError::NotReady { task: self.id() });
        }

        {
            let mut inner = self.0.lock();
            Self::transition(&mut inner, TaskState::Running)?;
        }
        reporter.report(TaskState::Running);

        let collected = {
            let inner = self.0.lock();
            inner.body.collect_inputs(&inner.inputs, registry)
        };

        let body_result = collected.and_then(|collected| {
            let mut inner = self.0.lock();
            let TaskInner { body, outputs, .. } = &mut *inner;
            body.run_logic(collected, outputs)
        });

        match body_result {
            Ok(()) => self.finish_success(reporter),
            Err(err) => {
                if err.downcast_ref::<Interrupted>().is_some() {
                    self.finish_interrupted(reporter);
                    Err(DaggerError::Interrupted)
                } else {
                    self.finish_failure(err, reporter)
                }
            }
        }
    }

    #[instrument(skip_all, level = "debug", fields(task = %self.id()))]
    fn finish_success(&self, reporter: &Reporter) -> Result<(), DaggerError> {
        let mut inner = self.0.lock();
        let mut missing = None;
        for (name, datum) in &inner.outputs {
            if !datum.lock().verify_available(true) {
                missing = Some(name.clone());
                break;
            }
        }
        if let Some(output_name) = missing {
            let task = inner.id;
            let TaskInner { body, outputs, .. } = &mut *inner;
            body.fail_cleanup(outputs);
            Self::transition(&mut inner, TaskState::Failed)?;
            drop(inner);
            reporter.report(TaskState::Failed);
            return Err(DaggerError::MissingOutput { task, output_name });
        }
        let hashes = snapshot_input_hashes(&inner.inputs);
        inner.last_known_input_hashes = Some(hashes);
        Self::transition(&mut inner, TaskState::Complete)?;
        drop(inner);
        reporter.report(TaskState::Complete);
        trace!("task completed");
        Ok(())
    }

    fn finish_interrupted(&self, reporter: &Reporter) {
        let mut inner = self.0.lock();
        {
            let TaskInner { body, outputs, .. } = &mut *inner;
            body.interrupt_cleanup(outputs);
        }
        let _ = Self::transition(&mut inner, TaskState::Waiting);
        drop(inner);
        reporter.report(TaskState::Waiting);
    }

    fn finish_failure(
        &self,
        source: anyhow::Error,
        reporter: &Reporter,
    ) -> Result<(), DaggerError> {
        let mut inner = self.0.lock();
        let task = inner.id;
        {
            let TaskInner { body, outputs, .. } = &mut *inner;
            body.fail_cleanup(outputs);
        }
        let _ = Self::transition(&mut inner, TaskState::Failed);
        drop(inner);
        reporter.report(TaskState::Failed);
        Err(DaggerError::TaskBodyError { task, source })
    }

    /// Force this task to `WAITING` and run `interrupt_cleanup`, used by
    /// the coordinator's forceful `interrupt()`.
    #[instrument(skip_all, level = "debug", fields(task = %self.id()))]
    pub fn interrupt(&self) -> Result<(), DaggerError> {
        let mut inner = self.0.lock();
        {
            let TaskInner { body, outputs, .. } = &mut *inner;
            body.interrupt_cleanup(outputs);
        }
        Self::transition(&mut inner, TaskState::Waiting)
    }

    /// Force this task to `FAILED` and run `fail_cleanup`.
    #[instrument(skip_all, level = "debug", fields(task = %self.id()))]
    pub fn fail(&self) -> Result<(), DaggerError> {
        let mut inner = self.0.lock();
        {
            let TaskInner { body, outputs, .. } = &mut *inner;
            body.fail_cleanup(outputs);
        }
        Self::transition(&mut inner, TaskState::Failed)
    }

    /// Sync this task's own data against a pre-computed verdict on whether
    /// its dependencies are all `COMPLETE`. Recursion over the dependency
    /// graph (and the `visited` set from spec §4.4) is the
    /// [`Workflow`](crate::coordinator::Workflow)'s job, since only it has
    /// arena access; this method is the per-task leaf of that recursion.
    ///
    /// Syncs every input and output Datum, recomputes the task's own
    /// quickhash, then classifies: stays `FAILED` if already `FAILED`;
    /// else `COMPLETE` iff `deps_complete` and every input/output is
    /// `AVAILABLE` and the quickhash is unchanged; otherwise `WAITING`.
    #[instrument(skip_all, level = "trace", fields(task = %self.id()))]
    pub fn sync(&self, deps_complete: bool) {
        let mut inner = self.0.lock();
        if inner.state == TaskState::Failed {
            for datum in inner.inputs.values() {
                datum.lock().sync();
            }
            for datum in inner.outputs.values() {
                datum.lock().sync();
            }
            return;
        }

        for datum in inner.inputs.values() {
            datum.lock().sync();
        }
        for datum in inner.outputs.values() {
            datum.lock().sync();
        }

        let new_hash = inner.body.quickhash();
        let hash_unchanged = inner.quickhash == new_hash;
        inner.quickhash = new_hash;

        let inputs_available = inner
            .inputs
            .values()
            .all(|d| d.lock().state() == crate::datum::DatumState::Available);
        let outputs_available = inner
            .outputs
            .values()
            .all(|d| d.lock().state() == crate::datum::DatumState::Available);

        let complete =
            deps_complete && inputs_available && outputs_available && hash_unchanged;
        let target = if complete {
            TaskState::Complete
        } else {
            TaskState::Waiting
        };
        if let Err(err) = Self::transition(&mut inner, target) {
            warn!(%err, "sync produced an illegal transition; forcing WAITING");
            inner.state = TaskState::Waiting;
        }
    }

    /// Does `deps_complete` (all dependencies report `COMPLETE`) together
    /// with the task's own recorded state and fingerprints amount to a
    /// verified `COMPLETE`? Used by
    /// [`Workflow::initialize_workflow_state`](crate::coordinator::Workflow::initialize_workflow_state).
    ///
    /// Per spec §4.6: deps COMPLETE, own quickhash unchanged, every input
    /// fingerprint unchanged since the last confirmed completion, and
    /// every output `AVAILABLE`.
    pub fn verify_complete(&self, deps_complete: bool) -> bool {
        let mut inner = self.0.lock();
        if !deps_complete {
            return false;
        }
        let current_hash = inner.body.quickhash();
        if current_hash != inner.quickhash {
            return false;
        }
        let outputs_available = inner
            .outputs
            .values()
            .all(|d| d.lock().verify_available(true));
        if !outputs_available {
            return false;
        }
        let current_input_hashes = snapshot_input_hashes(&inner.inputs);
        let inputs_unchanged = match &inner.last_known_input_hashes {
            None => true,
            Some(baseline) => baseline == &current_input_hashes,
        };
        if inner.last_known_input_hashes.is_none() {
            inner.last_known_input_hashes = Some(current_input_hashes);
        }
        inputs_unchanged
    }

    /// Force this task directly to `COMPLETE` after the coordinator has
    /// independently verified it via [`Task::verify_complete`] at startup —
    /// not as the result of an actual `run()`. Legal because
    /// `WAITING -> COMPLETE` is in the transition table (spec §4.6's
    /// "verified COMPLETE" path of `initialize_workflow_state`).
    pub fn mark_verified_complete(&self) -> Result<(), DaggerError> {
        let mut inner = self.0.lock();
        Self::transition(&mut inner, TaskState::Complete)
    }

    /// Force this task back to `WAITING` purely for bookkeeping — used by
    /// the coordinator when startup classification (or a finished task's
    /// reporter landing in an anomalous state) demotes a task that isn't
    /// actually running. No cleanup hooks run; contrast with
    /// [`Task::interrupt`], which does.
    pub fn force_waiting(&self) -> Result<(), DaggerError> {
        let mut inner = self.0.lock();
        if inner.state == TaskState::Waiting {
            return Ok(());
        }
        Self::transition(&mut inner, TaskState::Waiting)
    }
}

fn snapshot_input_hashes(inputs: &HashMap<String, DatumRef>) -> HashMap<String, Option<u64>> {
    inputs
        .iter()
        .map(|(name, datum)| (name.clone(), datum.lock().quickhash_value()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datum::{datum_ref, Datum, MemoryDatum};

    #[derive(Debug)]
    struct Increment {
        amount: i64,
    }

    impl TaskBody for Increment {
        fn initialize_outputs(&self, id: TaskId) -> HashMap<String, DatumRef> {
            let mut outputs = HashMap::new();
            outputs.insert("out".to_string(), datum_ref(Datum::new(MemoryDatum::empty(), id)));
            outputs
        }

        fn quickhash(&self) -> u64 {
            self.amount as u64
        }

        fn input_form(&self) -> InputForm {
            InputForm::Object
        }

        fn run_logic(
            &mut self,
            inputs: CollectedInputs,
            outputs: &mut HashMap<String, DatumRef>,
        ) -> anyhow::Result<()> {
            let x = match inputs.get("in") {
                Some(boxed) => *boxed.downcast_ref::<i64>().expect("i64 input"),
                None => 0,
            };
            let result = x + self.amount;
            let mut guard = outputs.get("out").expect("out datum").lock();
            let datum = guard
                .as_any_mut()
                .downcast_mut::<Datum<MemoryDatum>>()
                .expect("out is a MemoryDatum");
            datum.populate(|v| v.set(result, result as u64))?;
            datum.verify_available(true);
            Ok(())
        }
    }

    fn registry() -> ConverterRegistry {
        ConverterRegistry::with_builtins()
    }

    #[test]
    fn waiting_task_with_no_deps_runs_to_completion() {
        let task = Task::new(
            TaskId::new_for_test(0),
            Box::new(Increment { amount: 1 }),
            vec![],
            HashMap::new(),
            0,
            HashMap::new(),
        );
        assert_eq!(task.state(), TaskState::Waiting);
        let reporter = Reporter::new(TaskState::Waiting);
        task.run(true, &registry(), &reporter).expect("run succeeds");
        assert_eq!(task.state(), TaskState::Complete);
        assert_eq!(reporter.current(), TaskState::Complete);

        let outputs = task.outputs();
        let out = outputs.get("out").expect("out datum");
        let guard = out.lock();
        let datum = guard
            .as_any()
            .downcast_ref::<Datum<MemoryDatum>>()
            .expect("out is a MemoryDatum");
        assert_eq!(datum.variant().get::<i64>(), Some(&1));
    }

    #[test]
    fn run_without_ready_fails_not_ready() {
        let task = Task::new(
            TaskId::new_for_test(1),
            Box::new(Increment { amount: 1 }),
            vec![TaskId::new_for_test(0)],
            HashMap::new(),
            0,
            HashMap::new(),
        );
        let reporter = Reporter::new(TaskState::Waiting);
        let err = task.run(false, &registry(), &reporter).unwrap_err();
        assert!(matches!(err, DaggerError::NotReady { .. }));
    }

    #[test]
    fn state_transition_table_rejects_illegal_jumps() {
        assert!(TaskState::Waiting.can_transition_to(TaskState::Running));
        assert!(TaskState::Running.can_transition_to(TaskState::Waiting));
        assert!(!TaskState::Complete.can_transition_to(TaskState::Failed));
        assert!(!TaskState::Failed.can_transition_to(TaskState::Complete));
        assert!(TaskState::Failed.can_transition_to(TaskState::Waiting));
    }
}
