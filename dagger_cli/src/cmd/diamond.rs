//! `dagger diamond`: `t0 -> {t1, t2} -> t3`, with `FileDatum` outputs under a
//! chosen directory. Re-running against the same directory demonstrates
//! persistent-output-aware skipping (spec §8 scenario 2): delete `t2`/`t3`'s
//! output files and re-run to see only those two re-execute.

use std::{collections::HashMap, path::PathBuf};

use dagger_core::{coordinator::WorkflowBuilder, task::Task};
use dagger_worker::{Arg, CommandTask, ThreadBackend};

use crate::SharedConfigOpt;

/// Options for the `diamond` subcommand.
#[derive(Debug, Clone, clap::Args)]
pub struct Opt {
    /// Directory to write `t0.txt`..`t3.txt` into. Reusing the same
    /// directory across invocations is what lets already-done nodes skip.
    #[arg(long)]
    pub work_dir: PathBuf,

    #[command(flatten)]
    pub shared: SharedConfigOpt,
}

fn write_task(identifier: &str, path: PathBuf) -> Box<CommandTask> {
    let script = format!("echo {identifier} > {}", path.display());
    let args = vec![Arg::Literal("-c".to_string()), Arg::Literal(script)];
    let mut output_paths = HashMap::new();
    output_paths.insert("out".to_string(), path);
    Box::new(CommandTask::new(identifier, "sh", args, output_paths))
}

/// Build and run the diamond, printing which tasks ran vs. were skipped.
pub fn run(opt: &Opt) -> dagger_core::error::Result<()> {
    std::fs::create_dir_all(&opt.work_dir)?;

    let mut builder = WorkflowBuilder::new();

    let id0 = builder.next_id();
    let t0 = Task::new(
        id0,
        write_task("t0", opt.work_dir.join("t0.txt")),
        vec![],
        HashMap::new(),
        0,
        HashMap::new(),
    );
    builder.insert(t0);

    let id1 = builder.next_id();
    let mut inputs1 = HashMap::new();
    inputs1.insert("in".to_string(), builder.task_outputs(id0).remove("out").unwrap());
    let t1 = Task::new(
        id1,
        write_task("t1", opt.work_dir.join("t1.txt")),
        vec![],
        inputs1,
        0,
        HashMap::new(),
    );
    builder.insert(t1);

    let id2 = builder.next_id();
    let mut inputs2 = HashMap::new();
    inputs2.insert("in".to_string(), builder.task_outputs(id0).remove("out").unwrap());
    let t2 = Task::new(
        id2,
        write_task("t2", opt.work_dir.join("t2.txt")),
        vec![],
        inputs2,
        0,
        HashMap::new(),
    );
    builder.insert(t2);

    let id3 = builder.next_id();
    let mut inputs3 = HashMap::new();
    inputs3.insert("a".to_string(), builder.task_outputs(id1).remove("out").unwrap());
    inputs3.insert("b".to_string(), builder.task_outputs(id2).remove("out").unwrap());
    let t3 = Task::new(
        id3,
        write_task("t3", opt.work_dir.join("t3.txt")),
        vec![],
        inputs3,
        0,
        HashMap::new(),
    );
    builder.insert(t3);

    let mut workflow = builder.build(
        id3,
        opt.shared.to_workflow_config(),
        ThreadBackend::new(),
    )?;
    let report = workflow.run()?;
    println!(
        "complete={:?} failed={:?} waiting={:?}",
        report.complete, report.failed, report.waiting
    );
    Ok(())
}
