//! The in-process task variant: [`FunctionTask`].
//!
//! Ground truth: `dagger/core/task.py`'s `FunctionTask`, which wraps a plain
//! Python callable and computes its quickhash from
//! `hash((id(self), inspect.getsource(self.function)))`. Rust closures carry
//! no introspectable source, so the caller supplies an explicit
//! `body_fingerprint` — documented here as the direct analogue (see
//! `SPEC_FULL.md` §4.4 and `DESIGN.md`).
//!
//! `CommandTask`, the subprocess variant named alongside `FunctionTask` in
//! the spec, lives in the sibling `dagger_worker` crate instead of here,
//! since it needs `tokio::process` and this crate stays free of an async
//! runtime dependency (see `DESIGN.md`).

use std::{collections::HashMap, fmt};

use crate::{
    converter::InputForm,
    datum::{datum_ref, Datum, DatumRef, MemoryDatum},
    task::{CollectedInputs, TaskBody, TaskId},
};

/// An in-process closure task: consumes named `OBJECT` inputs, produces
/// named `MemoryDatum` outputs.
///
/// Outputs are declared up front by name (`output_names`), mirroring
/// `FunctionTask.__init__`'s `outputs` schema argument; `run_logic` is
/// expected to populate every one of them via
/// [`MemoryDatum::set`](crate::datum::MemoryDatum::set).
pub struct FunctionTask {
    output_names: Vec<String>,
    body_fingerprint: u64,
    function: Box<
        dyn FnMut(CollectedInputs, &mut HashMap<String, DatumRef>) -> anyhow::Result<()> + Send,
    >,
}

impl fmt::Debug for FunctionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTask")
            .field("output_names", &self.output_names)
            .field("body_fingerprint", &self.body_fingerprint)
            .finish_non_exhaustive()
    }
}

impl FunctionTask {
    /// Build a `FunctionTask` that declares `output_names` as `MemoryDatum`
    /// outputs and runs `function` to populate them.
    ///
    /// `body_fingerprint` stands in for `inspect.getsource(function)` in the
    /// original — callers typically hash the closure's defining source
    /// location or a version string; what matters is that it changes
    /// whenever the closure's behavior changes in a way that invalidates
    /// prior outputs (spec §4.4's quickhash contract).
    pub fn new(
        output_names: impl IntoIterator<Item = impl Into<String>>,
        body_fingerprint: u64,
        function: impl FnMut(CollectedInputs, &mut HashMap<String, DatumRef>) -> anyhow::Result<()>
            + Send
            + 'static,
    ) -> Self {
        FunctionTask {
            output_names: output_names.into_iter().map(Into::into).collect(),
            body_fingerprint,
            function: Box::new(function),
        }
    }
}

impl TaskBody for FunctionTask {
    fn initialize_outputs(&self, id: TaskId) -> HashMap<String, DatumRef> {
        self.output_names
            .iter()
            .map(|name| (name.clone(), datum_ref(Datum::new(MemoryDatum::empty(), id))))
            .collect()
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
        (self.function)(inputs, outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        converter::ConverterRegistry,
        datum::{hash_value, MemoryDatum},
        reporter::Reporter,
        task::{Task, TaskState},
    };

    fn downcast_memory(datum: &DatumRef) -> i64 {
        let guard = datum.lock();
        let d = guard
            .as_any()
            .downcast_ref::<Datum<MemoryDatum>>()
            .expect("MemoryDatum output");
        *d.variant().get::<i64>().expect("i64 payload")
    }

    #[test]
    fn function_task_populates_declared_outputs() {
        let task_body = FunctionTask::new(vec!["out"], 7, |inputs, outputs| {
            let x = match inputs.get("in") {
                Some(boxed) => *boxed.downcast_ref::<i64>().expect("i64 input"),
                None => 0,
            };
            let result = x + 1;
            let mut guard = outputs.get("out").expect("out datum").lock();
            let datum = guard
                .as_any_mut()
                .downcast_mut::<Datum<MemoryDatum>>()
                .expect("MemoryDatum output");
            datum.populate(|v| v.set(result, hash_value(&result)))?;
            datum.verify_available(true);
            Ok(())
        });

        let task = Task::new(
            TaskId::new_for_test(0),
            Box::new(task_body),
            vec![],
            HashMap::new(),
            0,
            HashMap::new(),
        );
        let reporter = Reporter::noop();
        task.run(true, &ConverterRegistry::with_builtins(), &reporter)
            .expect("run succeeds");
        assert_eq!(task.state(), TaskState::Complete);
        assert_eq!(downcast_memory(task.outputs().get("out").unwrap()), 1);
    }
}
