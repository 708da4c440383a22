//! A tiny demo binary for manually exercising `dagger_core`.
//!
//! Ground truth: `falconeri`'s CLI (`falconeri/src/main.rs`) — a `clap`
//! derive `enum Opt` dispatching to a `cmd` module per subcommand. This
//! binary is intentionally much smaller: it exists to assemble and run the
//! sample workflows from spec §8 (the linear chain and the diamond) for
//! manual smoke-testing, not to manage a cluster.

use clap::Parser;
use dagger_core::{config::WorkflowConfig, error::Result, tracing_support::initialize_tracing};

mod cmd;

/// Command-line options, parsed using `clap`.
#[derive(Debug, Parser)]
#[command(about = "Assemble and run a sample dagger_core workflow.")]
enum Opt {
    /// Run the linear-chain sample: `t0 -> t1 -> ... -> t9`, each `+1`.
    #[command(name = "linear-chain")]
    LinearChain {
        #[command(flatten)]
        opts: cmd::linear_chain::Opt,
    },

    /// Run the diamond sample: `t0 -> {t1, t2} -> t3`, with `FileDatum`
    /// outputs under a chosen directory, so re-running demonstrates
    /// persistent-output skipping.
    #[command(name = "diamond")]
    Diamond {
        #[command(flatten)]
        opts: cmd::diamond::Opt,
    },
}

fn main() -> Result<()> {
    initialize_tracing();
    let opt = Opt::parse();
    tracing::debug!(?opt, "parsed CLI args");

    match opt {
        Opt::LinearChain { opts } => cmd::linear_chain::run(&opts),
        Opt::Diamond { opts } => cmd::diamond::run(&opts),
    }
}

/// Shared budget/halt-on-failure flags, folded into a [`WorkflowConfig`].
#[derive(Debug, Clone, clap::Args)]
pub struct SharedConfigOpt {
    /// Total CPU budget for the run (a made-up resource unit; each sample
    /// task demands `cpu = 1`).
    #[arg(long, default_value_t = 4.0)]
    pub cpu_budget: f64,

    /// Call `interrupt()` on the first task failure instead of draining the
    /// rest of the independent work.
    #[arg(long)]
    pub halt_on_failure: bool,
}

impl SharedConfigOpt {
    /// Build a [`WorkflowConfig`] from these flags.
    pub fn to_workflow_config(&self) -> WorkflowConfig {
        let mut resources = std::collections::HashMap::new();
        resources.insert("cpu".to_string(), self.cpu_budget);
        WorkflowConfig {
            resources,
            halt_on_failure: self.halt_on_failure,
            ..WorkflowConfig::default()
        }
    }
}
