//! `dagger linear-chain`: ten tasks `t0 -> t1 -> ... -> t9`, each adding one
//! to its predecessor's output, starting from zero. Spec §8 scenario 1.

use std::collections::HashMap;

use dagger_core::{
    coordinator::WorkflowBuilder,
    datum::{hash_value, Datum, MemoryDatum},
    task::{Task, TaskId},
    variants::FunctionTask,
};
use dagger_worker::ThreadBackend;

use crate::SharedConfigOpt;

/// Options for the `linear-chain` subcommand.
#[derive(Debug, Clone, clap::Args)]
pub struct Opt {
    /// How many tasks to chain (`t0..tN`).
    #[arg(long, default_value_t = 10)]
    pub length: u32,

    #[command(flatten)]
    pub shared: SharedConfigOpt,
}

fn increment_task(amount: i64) -> Box<FunctionTask> {
    Box::new(FunctionTask::new(vec!["out"], amount as u64, move |inputs, outputs| {
        let x = match inputs.get("in") {
            Some(boxed) => *boxed.downcast_ref::<i64>().expect("i64 input"),
            None => 0,
        };
        let result = x + amount;
        let mut guard = outputs.get("out").expect("out datum").lock();
        let datum = guard
            .as_any_mut()
            .downcast_mut::<Datum<MemoryDatum>>()
            .expect("MemoryDatum output");
        datum.populate(|v| v.set(result, hash_value(&result)))?;
        datum.verify_available(true);
        Ok(())
    }))
}

/// Build and run the linear chain, printing the final task's output.
pub fn run(opt: &Opt) -> dagger_core::error::Result<()> {
    let mut builder = WorkflowBuilder::new();
    let mut prev: Option<TaskId> = None;

    for _ in 0..opt.length.max(1) {
        let id = builder.next_id();
        let mut inputs = HashMap::new();
        if let Some(prev_id) = prev {
            inputs.insert("in".to_string(), builder.task_outputs(prev_id).remove("out").unwrap());
        }
        let task = Task::new(id, increment_task(1), vec![], inputs, 0, HashMap::new());
        builder.insert(task);
        prev = Some(id);
    }
    let last_id = prev.expect("length is at least 1");

    let mut workflow = builder.build(
        last_id,
        opt.shared.to_workflow_config(),
        ThreadBackend::new(),
    )?;
    let report = workflow.run()?;
    println!(
        "complete={} failed={} waiting={}",
        report.complete.len(),
        report.failed.len(),
        report.waiting.len()
    );

    let out = workflow.task_outputs(last_id);
    let guard = out.get("out").expect("final task has an out datum").lock();
    let datum = guard
        .as_any()
        .downcast_ref::<Datum<MemoryDatum>>()
        .expect("MemoryDatum output");
    println!("final value: {:?}", datum.variant().get::<i64>());
    Ok(())
}
