//! `CommandTask`: the subprocess task variant.
//!
//! Ground truth: `falconeri-worker/src/main.rs`'s `process_datum`/`tee_child`/
//! `tee_output` trio — spawn a `tokio::process::Command`, tee stdout/stderr
//! concurrently (one `tokio::spawn`ed task per stream, to avoid the deadlock
//! a child can cause by filling a pipe nobody is draining yet) to both the
//! parent's own stdout/stderr and a captured buffer, and surface a non-zero
//! exit as a failure. This variant adapts that shape to the `TaskBody`
//! contract: inputs are materialized as filesystem paths
//! (`input_form = FILEPATH`), outputs are named
//! [`FileDatum`](dagger_core::datum::FileDatum)s the subprocess is expected
//! to have written by the time it exits successfully.

use std::{
    collections::HashMap,
    fmt,
    io::ErrorKind,
    path::PathBuf,
    process::Stdio,
};

use dagger_core::{
    converter::InputForm,
    datum::{datum_ref, Datum, DatumRef, FileDatum},
    task::{CollectedInputs, TaskBody, TaskId},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    process::{Child, Command},
};
use tracing::{instrument, trace};

/// One argument of a [`CommandTask`]'s command line: either a literal
/// string or a placeholder resolved to a named input's materialized path at
/// run time.
#[derive(Debug, Clone)]
pub enum Arg {
    /// Passed through to the child process unchanged.
    Literal(String),
    /// Replaced with the filesystem path of the named input.
    InputPath(String),
}

/// A subprocess task: runs `program` with `args`, expecting it to have
/// written every path in `output_paths` by the time it exits `0`.
pub struct CommandTask {
    program: String,
    args: Vec<Arg>,
    output_paths: HashMap<String, PathBuf>,
    /// Mixed with `program`/`args` for the quickhash contract: "the
    /// command-line template of a subprocess task" (spec §4.4).
    identifier: String,
    captured_output: Vec<u8>,
}

impl fmt::Debug for CommandTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandTask")
            .field("identifier", &self.identifier)
            .field("program", &self.program)
            .field("args", &self.args)
            .field("output_paths", &self.output_paths)
            .finish()
    }
}

impl CommandTask {
    /// Build a `CommandTask`. `identifier` should be stable across runs (and
    /// distinct per task per spec §4.4's identification law); it's folded
    /// into the quickhash alongside the command-line template so that
    /// editing `program`/`args` invalidates prior outputs.
    pub fn new(
        identifier: impl Into<String>,
        program: impl Into<String>,
        args: Vec<Arg>,
        output_paths: HashMap<String, PathBuf>,
    ) -> Self {
        CommandTask {
            program: program.into(),
            args,
            output_paths,
            identifier: identifier.into(),
            captured_output: Vec::new(),
        }
    }

    /// The combined stdout+stderr captured from the most recent run, if any.
    pub fn captured_output(&self) -> &[u8] {
        &self.captured_output
    }

    fn resolve_args(&self, inputs: &CollectedInputs) -> anyhow::Result<Vec<String>> {
        self.args
            .iter()
            .map(|arg| match arg {
                Arg::Literal(s) => Ok(s.clone()),
                Arg::InputPath(name) => {
                    let boxed = inputs.get(name).ok_or_else(|| {
                        anyhow::anyhow!("CommandTask has no input named {name:?}")
                    })?;
                    let path = boxed
                        .downcast_ref::<PathBuf>()
                        .ok_or_else(|| anyhow::anyhow!("input {name:?} did not convert to a path"))?;
                    Ok(path.display().to_string())
                }
            })
            .collect()
    }
}

impl TaskBody for CommandTask {
    fn initialize_outputs(&self, id: TaskId) -> HashMap<String, DatumRef> {
        self.output_paths
            .keys()
            .map(|name| (name.clone(), datum_ref(Datum::new(FileDatum::empty(), id))))
            .collect()
    }

    fn quickhash(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.identifier.hash(&mut hasher);
        self.program.hash(&mut hasher);
        for arg in &self.args {
            match arg {
                Arg::Literal(s) => s.hash(&mut hasher),
                Arg::InputPath(name) => name.hash(&mut hasher),
            }
        }
        hasher.finish()
    }

    fn input_form(&self) -> InputForm {
        InputForm::FilePath
    }

    #[instrument(skip_all, fields(program = %self.program), level = "debug")]
    fn run_logic(
        &mut self,
        inputs: CollectedInputs,
        outputs: &mut HashMap<String, DatumRef>,
    ) -> anyhow::Result<()> {
        let args = self.resolve_args(&inputs)?;
        let program = self.program.clone();
        let captured = {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(run_command(program, args))?
        };
        self.captured_output = captured;

        for (name, path) in &self.output_paths {
            let datum = outputs
                .get(name)
                .ok_or_else(|| anyhow::anyhow!("CommandTask has no output named {name:?}"))?;
            let mut guard = datum.lock();
            let file_datum = guard
                .as_any_mut()
                .downcast_mut::<Datum<FileDatum>>()
                .ok_or_else(|| anyhow::anyhow!("output {name:?} is not a FileDatum"))?;
            file_datum.populate(|v| v.set_path(path.clone()))?;
            file_datum.verify_available(true);
        }
        Ok(())
    }

    fn interrupt_cleanup(&mut self, outputs: &HashMap<String, DatumRef>) {
        for datum in outputs.values() {
            datum.lock().clear();
        }
    }

    fn fail_cleanup(&mut self, outputs: &HashMap<String, DatumRef>) {
        for datum in outputs.values() {
            datum.lock().clear();
        }
    }
}

/// Spawn `program args`, tee its stdout/stderr to both the parent's own
/// stdout/stderr and a captured buffer, and fail if it exits non-zero.
/// Mirrors `falconeri-worker`'s `process_datum`/`tee_child` shape, minus
/// the Falconeri-specific upload step (this crate's outputs are plain
/// paths the caller already knows).
async fn run_command(program: String, args: Vec<String>) -> anyhow::Result<Vec<u8>> {
    let mut child: Child = Command::new(&program)
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| anyhow::anyhow!("could not run {program:?}: {err}"))?;

    let stdout = child.stdout.take().expect("child has stdout");
    let stderr = child.stderr.take().expect("child has stderr");

    // Tee stdout and stderr concurrently via separate spawned tasks, the
    // way `falconeri-worker::tee_child` does — draining one pipe to EOF
    // before starting the other risks deadlock if the child fills the
    // pipe we haven't started draining yet while blocked writing to the
    // one we have.
    let stdout_handle =
        tokio::spawn(async move { tee_into(stdout, tokio::io::stdout()).await });
    let stderr_handle =
        tokio::spawn(async move { tee_into(stderr, tokio::io::stderr()).await });

    let mut captured = stdout_handle
        .await
        .map_err(|err| anyhow::anyhow!("stdout tee task panicked: {err}"))??;
    let captured_stderr = stderr_handle
        .await
        .map_err(|err| anyhow::anyhow!("stderr tee task panicked: {err}"))??;
    captured.extend(captured_stderr);

    let status = child
        .wait()
        .await
        .map_err(|err| anyhow::anyhow!("error running {program:?}: {err}"))?;
    if status.success() {
        Ok(captured)
    } else {
        Err(anyhow::anyhow!("command {program:?} failed with status {status}"))
    }
}

/// Copy all of `from` into a captured buffer, echoing each chunk to
/// `to_console` (the parent's own stdout/stderr) as it arrives, and
/// tolerating `Interrupted` I/O errors the way
/// `falconeri-worker::tee_output` does.
async fn tee_into<R, W>(mut from: R, mut to_console: W) -> anyhow::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut captured = Vec::new();
    let mut buf = vec![0u8; 4 * 1024];
    loop {
        match from.read(&mut buf).await {
            Ok(0) => return Ok(captured),
            Ok(count) => {
                let data = &buf[..count];
                to_console.write_all(data).await?;
                to_console.flush().await?;
                captured.extend_from_slice(data);
                trace!(bytes = count, "captured command output chunk");
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }
}
