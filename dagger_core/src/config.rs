//! Ambient configuration for a [`Workflow`](crate::coordinator::Workflow),
//! matching the teacher's pattern of a small `serde`-deserializable config
//! struct (cf. `falconeri_common`'s use of `humantime-serde` for durations
//! pulled out of job manifests).

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

fn default_loop_interval() -> Duration {
    Duration::from_millis(100)
}

/// Coordinator-wide settings a caller supplies once per `run()`.
///
/// Spec §4.6: the resource budget, the bounded sleep between empty-poll
/// iterations (the "loop interval"), and `halt_on_failure` — referenced in
/// spec §4.6/§7 as "a required parameter of `run()`" (Open Questions),
/// which this port resolves by folding it into `WorkflowConfig` (see
/// DESIGN.md).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Total available budget per named resource (spec §3's
    /// `Task.resources`), e.g. `{"cpu": 10.0}`.
    #[serde(default)]
    pub resources: HashMap<String, f64>,

    /// How long the coordinator sleeps between empty-poll iterations of the
    /// main loop before re-checking running tasks' reporters.
    #[serde(default = "default_loop_interval", with = "humantime_serde")]
    pub loop_interval: Duration,

    /// If set, the coordinator calls `interrupt()` on the first task
    /// failure observed in the main loop instead of continuing to drain
    /// unrelated work.
    #[serde(default)]
    pub halt_on_failure: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        WorkflowConfig {
            resources: HashMap::new(),
            loop_interval: default_loop_interval(),
            halt_on_failure: false,
        }
    }
}
