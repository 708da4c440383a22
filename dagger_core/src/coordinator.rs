//! The Workflow coordinator: DAG validation, initial state assessment,
//! resource-constrained dispatch, wrapup, and interruption.
//!
//! Ground truth: spec §4.6 (`Coordinator`) and `dagger/core/workflow.py`.
//! This is the single-threaded orchestrator; it never runs a task body
//! itself, only decides which tasks are ready, budgets their resources,
//! and hands them to an [`ExecutionBackend`].

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    thread,
};

use tracing::{debug, instrument, trace, warn};

use crate::{
    backend::ExecutionBackend,
    config::WorkflowConfig,
    converter::ConverterRegistry,
    error::DaggerError,
    reporter::Reporter,
    scheduling::{GreedyPolicy, SchedulingPolicy},
    task::{Task, TaskId, TaskState},
};

/// How a reachable task classifies during
/// [`Workflow::initialize_workflow_state`]. Not a [`TaskState`]: `Ready`
/// only exists as a coordinator-side bucket, per spec §4.6.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Classification {
    Complete,
    Failed,
    Ready,
    Waiting,
}

/// A running task's bookkeeping: its reporter (for non-blocking polling)
/// and the execution backend's own handle (for later teardown).
struct RunningSlot<H> {
    reporter: Reporter,
    #[allow(dead_code)] // kept for backend-specific teardown/debugging
    handle: H,
}

/// Builds a [`Workflow`]'s task arena.
///
/// Ground truth: Design Notes §9's "integer task-IDs within a
/// workflow-scoped arena". Callers must reserve an id with
/// [`WorkflowBuilder::next_id`] *before* constructing the `Task` that will
/// use it (a `Task` needs its own id to initialize its outputs), then
/// [`insert`](WorkflowBuilder::insert) the finished task immediately —
/// ids must be inserted in the order they were reserved.
#[derive(Default)]
pub struct WorkflowBuilder {
    arena: Vec<Task>,
}

impl WorkflowBuilder {
    /// A fresh, empty builder.
    pub fn new() -> Self {
        WorkflowBuilder { arena: Vec::new() }
    }

    /// The `TaskId` the next [`insert`](WorkflowBuilder::insert) must use.
    pub fn next_id(&self) -> TaskId {
        TaskId::from_index(self.arena.len())
    }

    /// The output Datums of an already-inserted task, keyed by name. Used to
    /// wire a later task's `inputs` to an earlier task's outputs while still
    /// assembling the graph (before a [`Workflow`] exists to ask directly).
    pub fn task_outputs(&self, id: TaskId) -> HashMap<String, crate::datum::DatumRef> {
        self.arena[id.index()].outputs()
    }

    /// Add a fully constructed task to the arena. Panics if `task`'s id
    /// doesn't match the next reserved slot — a programmer error in how the
    /// caller is wiring up the graph, not a runtime condition callers should
    /// recover from.
    pub fn insert(&mut self, task: Task) -> TaskId {
        let expected = self.next_id();
        assert_eq!(
            task.id(),
            expected,
            "tasks must be inserted in the same order their ids were reserved"
        );
        self.arena.push(task);
        expected
    }

    /// Validate the DAG reachable from `end_task` and produce a runnable
    /// [`Workflow`]. Fails with [`DaggerError::CyclicDAG`] if a cycle is
    /// reachable from `end_task`.
    pub fn build<B: ExecutionBackend>(
        self,
        end_task: TaskId,
        config: WorkflowConfig,
        backend: B,
    ) -> Result<Workflow<B>, DaggerError> {
        Workflow::new(self.arena, end_task, config, backend)
    }
}

/// A report of where every task ended up after [`Workflow::run`] returns.
///
/// Spec §4.6: "Tasks whose ancestry contains a FAILED task remain WAITING
/// forever and are surfaced in the final report."
#[derive(Debug, Clone, Default)]
pub struct WorkflowReport {
    /// Tasks that reached `COMPLETE`.
    pub complete: Vec<TaskId>,
    /// Tasks that reached `FAILED`.
    pub failed: Vec<TaskId>,
    /// Tasks still `WAITING` (typically downstream of a `FAILED` task).
    pub waiting: Vec<TaskId>,
    /// Tasks whose dependencies were all `COMPLETE` but that never got
    /// launched — only non-empty when the resource budget made them
    /// permanently unschedulable.
    pub ready: Vec<TaskId>,
}

/// The DAG-of-tasks coordinator.
///
/// Generic over the [`ExecutionBackend`] used to actually run dispatched
/// tasks, matching spec §6's "execution backends are pluggable; the core
/// requires only `submit`/`shutdown`".
pub struct Workflow<B: ExecutionBackend> {
    arena: Vec<Task>,
    end_task: TaskId,
    /// parent -> children, built once at construction (spec §4.6's
    /// "Adjacency list").
    adjacency: HashMap<TaskId, Vec<TaskId>>,
    registry: Arc<ConverterRegistry>,
    policy: Box<dyn SchedulingPolicy>,
    budget: HashMap<String, f64>,
    loop_interval: std::time::Duration,
    halt_on_failure: bool,
    backend: B,

    waiting: HashSet<TaskId>,
    ready: HashSet<TaskId>,
    running: HashMap<TaskId, RunningSlot<B::Handle>>,
    complete: HashSet<TaskId>,
    failed: HashSet<TaskId>,
}

impl<B: ExecutionBackend> Workflow<B> {
    fn new(
        arena: Vec<Task>,
        end_task: TaskId,
        config: WorkflowConfig,
        backend: B,
    ) -> Result<Self, DaggerError> {
        let adjacency = build_adjacency(&arena, end_task)?;
        Ok(Workflow {
            arena,
            end_task,
            adjacency,
            registry: Arc::new(ConverterRegistry::with_builtins()),
            policy: Box::new(GreedyPolicy),
            budget: config.resources,
            loop_interval: config.loop_interval,
            halt_on_failure: config.halt_on_failure,
            backend,
            waiting: HashSet::new(),
            ready: HashSet::new(),
            running: HashMap::new(),
            complete: HashSet::new(),
            failed: HashSet::new(),
        })
    }

    /// Install a non-default converter registry (overriding the built-ins).
    pub fn with_registry(mut self, registry: ConverterRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Install a non-default scheduling policy (overriding [`GreedyPolicy`]).
    pub fn with_policy(mut self, policy: impl SchedulingPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    fn task(&self, id: TaskId) -> &Task {
        &self.arena[id.index()]
    }

    /// Every task currently tracked, for callers that want to inspect final
    /// state beyond what [`WorkflowReport`] summarizes.
    pub fn tasks(&self) -> &[Task] {
        &self.arena
    }

    /// The output Datums of a tracked task, by name.
    pub fn task_outputs(&self, id: TaskId) -> HashMap<String, crate::datum::DatumRef> {
        self.task(id).outputs()
    }

    /// Bottom-up classification of every task reachable from `end_task`,
    /// per spec §4.6's `initialize_workflow_state`. Resets and repopulates
    /// the five coordinator buckets so the partition invariant holds.
    #[instrument(skip_all, level = "debug")]
    pub fn initialize_workflow_state(&mut self, verify_tasks: bool) -> Result<(), DaggerError> {
        let mut memo = HashMap::new();
        self.classify(self.end_task, verify_tasks, &mut memo);

        self.waiting.clear();
        self.ready.clear();
        self.complete.clear();
        self.failed.clear();

        for (id, classification) in memo {
            match classification {
                Classification::Complete => {
                    if self.task(id).state() != TaskState::Complete {
                        self.task(id).mark_verified_complete()?;
                    }
                    self.complete.insert(id);
                }
                Classification::Failed => {
                    self.failed.insert(id);
                }
                Classification::Ready => {
                    if self.task(id).state() == TaskState::Complete {
                        self.task(id).force_waiting()?;
                    }
                    self.ready.insert(id);
                }
                Classification::Waiting => {
                    if self.task(id).state() == TaskState::Complete {
                        self.task(id).force_waiting()?;
                    }
                    self.waiting.insert(id);
                }
            }
        }
        trace!(
            waiting = self.waiting.len(),
            ready = self.ready.len(),
            complete = self.complete.len(),
            failed = self.failed.len(),
            "initial workflow state assessed"
        );
        Ok(())
    }

    fn classify(
        &self,
        id: TaskId,
        verify_tasks: bool,
        memo: &mut HashMap<TaskId, Classification>,
    ) -> Classification {
        if let Some(existing) = memo.get(&id) {
            return *existing;
        }
        let task = self.task(id);
        let deps = task.dependencies();

        let mut deps_complete = true;
        for dep in &deps {
            if self.classify(*dep, verify_tasks, memo) != Classification::Complete {
                deps_complete = false;
            }
        }

        let classification = if !deps_complete {
            Classification::Waiting
        } else if task.state() == TaskState::Failed {
            Classification::Failed
        } else if verify_tasks {
            if task.verify_complete(true) {
                Classification::Complete
            } else {
                Classification::Ready
            }
        } else {
            match task.state() {
                TaskState::Complete => Classification::Complete,
                _ => Classification::Ready,
            }
        };
        memo.insert(id, classification);
        classification
    }

    fn ready_tasks(&self) -> Vec<Task> {
        let mut ids: Vec<TaskId> = self.ready.iter().copied().collect();
        ids.sort_by_key(|id| id.index());
        ids.into_iter().map(|id| self.task(id).clone()).collect()
    }

    #[instrument(skip_all, level = "debug")]
    fn launch(&mut self, selected: Vec<TaskId>) -> Result<(), DaggerError> {
        for id in selected {
            if !self.ready.remove(&id) {
                continue;
            }
            let task = self.task(id).clone();
            let demand = task.resources();
            deduct(&mut self.budget, &demand);

            let reporter = Reporter::new(TaskState::Waiting);
            let reporter_for_job = reporter.clone();
            let registry = Arc::clone(&self.registry);
            let job: Box<dyn FnOnce() + Send> = Box::new(move || {
                let _ = task.run(true, &registry, &reporter_for_job);
            });
            let handle = self.backend.submit(job);
            debug!(task = %id, "launched");
            self.running.insert(id, RunningSlot { reporter, handle });
        }
        Ok(())
    }

    #[instrument(skip_all, level = "debug")]
    fn wrapup(&mut self, finished: &[TaskId]) -> Result<(), DaggerError> {
        for &id in finished {
            let slot = self
                .running
                .remove(&id)
                .expect("wrapup called with a task that isn't running");
            let final_state = slot.reporter.current();
            let demand = self.task(id).resources();
            match final_state {
                TaskState::Complete => {
                    self.complete.insert(id);
                }
                TaskState::Failed => {
                    self.failed.insert(id);
                }
                other => {
                    self.task(id).force_waiting()?;
                    self.waiting.insert(id);
                    restore(&mut self.budget, &demand);
                    return Err(DaggerError::UnexpectedState { task: id, state: other });
                }
            }
            restore(&mut self.budget, &demand);
            debug!(task = %id, final_state = ?final_state, "wrapped up");
        }
        Ok(())
    }

    fn promote_children(&mut self, finished: &[TaskId]) {
        let mut candidates = HashSet::new();
        for id in finished {
            if let Some(children) = self.adjacency.get(id) {
                candidates.extend(children.iter().copied());
            }
        }
        for child in candidates {
            if !self.waiting.contains(&child) {
                continue;
            }
            let deps = self.task(child).dependencies();
            if deps.iter().all(|d| self.complete.contains(d)) {
                self.waiting.remove(&child);
                self.ready.insert(child);
                trace!(task = %child, "promoted WAITING -> READY");
            }
        }
    }

    /// Run the main scheduling loop (spec §4.6's `run()`) to completion: no
    /// more tasks to launch and nothing left running.
    ///
    /// Always performs a deep `initialize_workflow_state(true)` first, so
    /// a fresh `Workflow` over Datums with matching persistent backing
    /// (e.g. `FileDatum`s left over from a prior run) skips already-done
    /// work rather than redoing it — spec §8 scenario 2.
    #[instrument(skip_all, level = "info")]
    pub fn run(&mut self) -> Result<WorkflowReport, DaggerError> {
        self.initialize_workflow_state(true)?;
        let selected = self.policy.select(&self.ready_tasks(), &self.budget);
        self.launch(selected)?;

        while !self.running.is_empty() {
            let finished: Vec<TaskId> = self
                .running
                .iter()
                .filter(|(_, slot)| {
                    matches!(
                        slot.reporter.current(),
                        TaskState::Complete | TaskState::Failed
                    )
                })
                .map(|(id, _)| *id)
                .collect();

            if finished.is_empty() {
                thread::sleep(self.loop_interval);
                continue;
            }

            self.wrapup(&finished)?;
            self.promote_children(&finished);

            if self.halt_on_failure && finished.iter().any(|id| self.failed.contains(id)) {
                warn!("halt_on_failure set and a task failed; interrupting workflow");
                self.interrupt()?;
            }

            let selected = self.policy.select(&self.ready_tasks(), &self.budget);
            self.launch(selected)?;
        }

        Ok(self.report())
    }

    /// Forcefully tear down every running task: tell the backend to kill
    /// outstanding submissions, then move every task that was `RUNNING`
    /// back to `WAITING` (running its `interrupt_cleanup`) and restore its
    /// resources. Always returns [`DaggerError::Interrupted`] — spec §4.6's
    /// "re-raise the interruption".
    #[instrument(skip_all, level = "warn")]
    pub fn interrupt(&mut self) -> Result<(), DaggerError> {
        self.backend.shutdown(false, true);
        for (id, slot) in self.running.drain() {
            let task = &self.arena[id.index()];
            let demand = task.resources();
            task.interrupt()?;
            self.waiting.insert(id);
            restore(&mut self.budget, &demand);
            drop(slot);
        }
        Err(DaggerError::Interrupted)
    }

    fn report(&self) -> WorkflowReport {
        let mut ids_of = |set: &HashSet<TaskId>| {
            let mut ids: Vec<TaskId> = set.iter().copied().collect();
            ids.sort_by_key(|id| id.index());
            ids
        };
        WorkflowReport {
            complete: ids_of(&self.complete),
            failed: ids_of(&self.failed),
            waiting: ids_of(&self.waiting),
            ready: ids_of(&self.ready),
        }
    }
}

fn deduct(budget: &mut HashMap<String, f64>, demand: &HashMap<String, f64>) {
    for (key, amount) in demand {
        if let Some(available) = budget.get_mut(key) {
            *available -= amount;
        }
    }
}

fn restore(budget: &mut HashMap<String, f64>, demand: &HashMap<String, f64>) {
    for (key, amount) in demand {
        if let Some(available) = budget.get_mut(key) {
            *available += amount;
        }
    }
}

/// DAG validation + adjacency-list construction in one DFS pass, per spec
/// §4.6: "From the end Task, perform a depth-first traversal using an
/// ancestor stack and a visited set; if any dependency reappears in the
/// ancestor stack, fail with CyclicDAG." The end task is explicitly mapped
/// to `{}` even if nothing depends on it.
fn build_adjacency(
    arena: &[Task],
    end_task: TaskId,
) -> Result<HashMap<TaskId, Vec<TaskId>>, DaggerError> {
    let mut adjacency: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
    adjacency.entry(end_task).or_default();
    let mut visited = HashSet::new();
    let mut ancestor_stack = Vec::new();
    visit(arena, end_task, end_task, &mut visited, &mut ancestor_stack, &mut adjacency)?;
    Ok(adjacency)
}

fn visit(
    arena: &[Task],
    end_task: TaskId,
    id: TaskId,
    visited: &mut HashSet<TaskId>,
    ancestor_stack: &mut Vec<TaskId>,
    adjacency: &mut HashMap<TaskId, Vec<TaskId>>,
) -> Result<(), DaggerError> {
    if ancestor_stack.contains(&id) {
        return Err(DaggerError::CyclicDAG { end_task });
    }
    if visited.contains(&id) {
        return Ok(());
    }
    ancestor_stack.push(id);
    for dep in arena[id.index()].dependencies() {
        adjacency.entry(dep).or_default().push(id);
        visit(arena, end_task, dep, visited, ancestor_stack, adjacency)?;
    }
    ancestor_stack.pop();
    visited.insert(id);
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        converter::InputForm,
        datum::{datum_ref, Datum, DatumRef, FileDatum, MemoryDatum},
        task::{CollectedInputs, TaskBody},
    };
    use std::collections::HashMap;

    struct InlineBackend;
    impl ExecutionBackend for InlineBackend {
        type Handle = ();
        fn submit(&self, job: Box<dyn FnOnce() + Send>) -> Self::Handle {
            job();
        }
        fn shutdown(&self, _wait: bool, _kill: bool) {}
    }

    #[derive(Debug)]
    struct Increment {
        amount: i64,
        body_fingerprint: u64,
    }

    impl TaskBody for Increment {
        fn initialize_outputs(&self, id: TaskId) -> HashMap<String, DatumRef> {
            let mut outputs = HashMap::new();
            outputs.insert("out".to_string(), datum_ref(Datum::new(MemoryDatum::empty(), id)));
            outputs
        }

        fn quickhash(&self) -> u64 {
            self.body_fingerprint
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

    /// A task body that unconditionally fails, for the failure-containment
    /// scenario (spec §8 scenario 5).
    #[derive(Debug)]
    struct AlwaysFails;
    impl TaskBody for AlwaysFails {
        fn initialize_outputs(&self, id: TaskId) -> HashMap<String, DatumRef> {
            let mut outputs = HashMap::new();
            outputs.insert("out".to_string(), datum_ref(Datum::new(MemoryDatum::empty(), id)));
            outputs
        }
        fn quickhash(&self) -> u64 {
            0
        }
        fn input_form(&self) -> InputForm {
            InputForm::Object
        }
        fn run_logic(
            &mut self,
            _inputs: CollectedInputs,
            _outputs: &mut HashMap<String, DatumRef>,
        ) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("deliberate failure"))
        }
    }

    fn out_datum(builder: &WorkflowBuilder, id: TaskId) -> DatumRef {
        builder.arena[id.index()].outputs().get("out").unwrap().clone()
    }

    fn increment(amount: i64) -> Box<dyn TaskBody> {
        Box::new(Increment {
            amount,
            body_fingerprint: amount as u64,
        })
    }

    #[test]
    fn linear_chain_cold_run_completes_in_order() {
        // t0 -> t1 -> ... -> t9, each +1, t0 has no input (starts from 0).
        let mut builder = WorkflowBuilder::new();
        let mut prev: Option<TaskId> = None;
        let mut last_id = TaskId::from_index(0);
        for _ in 0..10 {
            let id = builder.next_id();
            let mut inputs = HashMap::new();
            if let Some(prev_id) = prev {
                inputs.insert("in".to_string(), out_datum(&builder, prev_id));
            }
            let task = Task::new(id, increment(1), vec![], inputs, 0, HashMap::new());
            builder.insert(task);
            prev = Some(id);
            last_id = id;
        }

        let mut workflow = builder
            .build(last_id, WorkflowConfig::default(), InlineBackend)
            .expect("no cycle");
        let report = workflow.run().expect("workflow runs to completion");
        assert_eq!(report.failed.len(), 0);
        assert_eq!(report.complete.len(), 10);

        let out = workflow.task(last_id).outputs();
        let guard = out.get("out").unwrap().lock();
        let datum = guard.as_any().downcast_ref::<Datum<MemoryDatum>>().unwrap();
        assert_eq!(datum.variant().get::<i64>(), Some(&10));
    }

    #[test]
    fn cyclic_dependency_is_rejected_at_build() {
        let mut builder = WorkflowBuilder::new();
        let id0 = builder.next_id();
        // t0 declares an explicit dependency on a not-yet-inserted id1.
        let t0 = Task::new(id0, increment(1), vec![TaskId::from_index(1)], HashMap::new(), 0, HashMap::new());
        builder.insert(t0);
        let id1 = builder.next_id();
        let t1 = Task::new(id1, increment(1), vec![id0], HashMap::new(), 0, HashMap::new());
        builder.insert(t1);

        let result = builder.build(id1, WorkflowConfig::default(), InlineBackend);
        assert!(matches!(result, Err(DaggerError::CyclicDAG { .. })));
    }

    #[test]
    fn failure_containment_diamond() {
        // t0 -> {t1, t2} -> t3, where t2 always fails.
        let mut builder = WorkflowBuilder::new();
        let id0 = builder.next_id();
        let t0 = Task::new(id0, increment(1), vec![], HashMap::new(), 0, HashMap::new());
        builder.insert(t0);

        let id1 = builder.next_id();
        let mut inputs1 = HashMap::new();
        inputs1.insert("in".to_string(), out_datum(&builder, id0));
        let t1 = Task::new(id1, increment(1), vec![], inputs1, 0, HashMap::new());
        builder.insert(t1);

        let id2 = builder.next_id();
        let mut inputs2 = HashMap::new();
        inputs2.insert("in".to_string(), out_datum(&builder, id0));
        let t2 = Task::new(id2, Box::new(AlwaysFails), vec![], inputs2, 0, HashMap::new());
        builder.insert(t2);

        let id3 = builder.next_id();
        let mut inputs3 = HashMap::new();
        inputs3.insert("a".to_string(), out_datum(&builder, id1));
        inputs3.insert("b".to_string(), out_datum(&builder, id2));
        let t3 = Task::new(id3, increment(1), vec![], inputs3, 0, HashMap::new());
        builder.insert(t3);

        let mut workflow = builder
            .build(id3, WorkflowConfig::default(), InlineBackend)
            .expect("no cycle");
        let report = workflow.run().expect("workflow drains without propagating the failure");

        assert!(report.complete.contains(&id0));
        assert!(report.complete.contains(&id1));
        assert!(report.failed.contains(&id2));
        assert!(report.waiting.contains(&id3), "t3 should never launch");
        assert_eq!(workflow.task(id3).state(), TaskState::Waiting);
    }

    #[test]
    fn resource_throttling_caps_concurrency() {
        // Ten independent tasks, each demanding cpu=4, budget cpu=10: at
        // most two can ever be admitted in a single selection pass.
        let mut resources = HashMap::new();
        resources.insert("cpu".to_string(), 4.0);
        let mut budget = HashMap::new();
        budget.insert("cpu".to_string(), 10.0);

        let mut builder = WorkflowBuilder::new();
        let mut ids = Vec::new();
        for _ in 0..10 {
            let id = builder.next_id();
            let task = Task::new(id, increment(1), vec![], HashMap::new(), 0, resources.clone());
            builder.insert(task);
            ids.push(id);
        }
        // Use the last task as a nominal "end task" depending on nothing;
        // we only care about the ready set's admission behavior, so make it
        // its own workflow by depending on all the others explicitly via a
        // dedicated sink task.
        let sink_id = builder.next_id();
        let sink = Task::new(sink_id, increment(0), ids.clone(), HashMap::new(), 0, HashMap::new());
        builder.insert(sink);

        let config = WorkflowConfig {
            resources: budget,
            ..WorkflowConfig::default()
        };
        let mut workflow = builder.build(sink_id, config, InlineBackend).expect("no cycle");

        // With an inline backend, `run()` completes tasks synchronously, so
        // we can't observe mid-flight concurrency directly; instead verify
        // the policy itself never admits more than two of the cpu=4 tasks
        // out of a cpu=10 budget in one selection.
        workflow.initialize_workflow_state(true).unwrap();
        let selected = workflow.policy.select(&workflow.ready_tasks(), &workflow.budget);
        assert!(selected.len() <= 2);

        let report = workflow.run().expect("workflow runs to completion");
        assert_eq!(report.complete.len(), 11);
    }

    #[test]
    fn diamond_warm_skip_reuses_file_backed_outputs() {
        use std::fs;

        let dir = std::env::temp_dir().join(format!(
            "dagger_core_coordinator_test_{}",
            crate::datum::hash_value(&std::time::Instant::now())
        ));
        fs::create_dir_all(&dir).unwrap();
        let path0 = dir.join("t0.txt");
        fs::write(&path0, b"seed").unwrap();

        #[derive(Debug)]
        struct WriteFile {
            path: std::path::PathBuf,
        }
        impl TaskBody for WriteFile {
            fn initialize_outputs(&self, id: TaskId) -> HashMap<String, DatumRef> {
                let mut outputs = HashMap::new();
                outputs.insert("out".to_string(), datum_ref(Datum::new(FileDatum::empty(), id)));
                outputs
            }
            fn quickhash(&self) -> u64 {
                1
            }
            fn input_form(&self) -> InputForm {
                InputForm::FilePath
            }
            fn run_logic(
                &mut self,
                _inputs: CollectedInputs,
                outputs: &mut HashMap<String, DatumRef>,
            ) -> anyhow::Result<()> {
                fs::write(&self.path, b"data")?;
                let mut guard = outputs.get("out").unwrap().lock();
                let datum = guard.as_any_mut().downcast_mut::<Datum<FileDatum>>().unwrap();
                datum.populate(|v| v.set_path(self.path.clone()))?;
                datum.verify_available(true);
                Ok(())
            }
        }

        let mut builder = WorkflowBuilder::new();
        let id0 = builder.next_id();
        let t0 = Task::new(
            id0,
            Box::new(WriteFile { path: path0.clone() }),
            vec![],
            HashMap::new(),
            0,
            HashMap::new(),
        );
        builder.insert(t0);

        let id1 = builder.next_id();
        let mut inputs1 = HashMap::new();
        inputs1.insert("in".to_string(), out_datum(&builder, id0));
        let t1 = Task::new(
            id1,
            Box::new(WriteFile { path: dir.join("t1.txt") }),
            vec![],
            inputs1,
            0,
            HashMap::new(),
        );
        builder.insert(t1);

        let id2 = builder.next_id();
        let mut inputs2 = HashMap::new();
        inputs2.insert("in".to_string(), out_datum(&builder, id0));
        let t2 = Task::new(
            id2,
            Box::new(WriteFile { path: dir.join("t2.txt") }),
            vec![],
            inputs2,
            0,
            HashMap::new(),
        );
        builder.insert(t2);

        let id3 = builder.next_id();
        let mut inputs3 = HashMap::new();
        inputs3.insert("a".to_string(), out_datum(&builder, id1));
        inputs3.insert("b".to_string(), out_datum(&builder, id2));
        let t3 = Task::new(
            id3,
            Box::new(WriteFile { path: dir.join("t3.txt") }),
            vec![],
            inputs3,
            0,
            HashMap::new(),
        );
        builder.insert(t3);

        let mut workflow = builder
            .build(id3, WorkflowConfig::default(), InlineBackend)
            .expect("no cycle");
        let report = workflow.run().expect("first run completes");
        assert_eq!(report.complete.len(), 4);

        // Delete t2 and t3's outputs, then build a *fresh* workflow over the
        // same on-disk paths and re-run: t0/t1 should be recognized as
        // already COMPLETE (their files are still there), t2/t3 should rerun.
        fs::remove_file(dir.join("t2.txt")).unwrap();
        fs::remove_file(dir.join("t3.txt")).unwrap();

        let mut builder2 = WorkflowBuilder::new();
        let r0 = builder2.next_id();
        let rt0 = Task::new(
            r0,
            Box::new(WriteFile { path: path0.clone() }),
            vec![],
            HashMap::new(),
            0,
            HashMap::new(),
        );
        builder2.insert(rt0);
        let r1 = builder2.next_id();
        let mut rinputs1 = HashMap::new();
        rinputs1.insert("in".to_string(), out_datum(&builder2, r0));
        let rt1 = Task::new(
            r1,
            Box::new(WriteFile { path: dir.join("t1.txt") }),
            vec![],
            rinputs1,
            0,
            HashMap::new(),
        );
        builder2.insert(rt1);
        let r2 = builder2.next_id();
        let mut rinputs2 = HashMap::new();
        rinputs2.insert("in".to_string(), out_datum(&builder2, r0));
        let rt2 = Task::new(
            r2,
            Box::new(WriteFile { path: dir.join("t2.txt") }),
            vec![],
            rinputs2,
            0,
            HashMap::new(),
        );
        builder2.insert(rt2);
        let r3 = builder2.next_id();
        let mut rinputs3 = HashMap::new();
        rinputs3.insert("a".to_string(), out_datum(&builder2, r1));
        rinputs3.insert("b".to_string(), out_datum(&builder2, r2));
        let rt3 = Task::new(
            r3,
            Box::new(WriteFile { path: dir.join("t3.txt") }),
            vec![],
            rinputs3,
            0,
            HashMap::new(),
        );
        builder2.insert(rt3);

        // Pre-populate outputs that are still on disk so verify_complete can
        // see them: t0 and t1's FileDatum outputs need to be populated with
        // their path before `initialize_workflow_state` can verify them.
        {
            let out0 = out_datum(&builder2, r0);
            let mut guard = out0.lock();
            let datum = guard.as_any_mut().downcast_mut::<Datum<FileDatum>>().unwrap();
            datum.populate(|v| v.set_path(path0.clone())).unwrap();
        }
        {
            let out1 = out_datum(&builder2, r1);
            let mut guard = out1.lock();
            let datum = guard.as_any_mut().downcast_mut::<Datum<FileDatum>>().unwrap();
            datum.populate(|v| v.set_path(dir.join("t1.txt"))).unwrap();
        }

        let mut workflow2 = builder2
            .build(r3, WorkflowConfig::default(), InlineBackend)
            .expect("no cycle");
        let report2 = workflow2.run().expect("second run recovers missing outputs");
        assert_eq!(report2.complete.len(), 4);
        assert!(dir.join("t2.txt").exists());
        assert!(dir.join("t3.txt").exists());

        fs::remove_dir_all(&dir).ok();
    }
}
