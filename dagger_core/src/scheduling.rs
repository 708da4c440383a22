//! The Scheduling Policy: greedy, resource-constrained selection from the
//! READY set (spec §4.6's `select`).
//!
//! No backfilling guarantee, no optimality guarantee — spec §1 explicitly
//! accepts a greedy heuristic over guaranteed optimal packing.

use std::collections::HashMap;

use crate::task::{Task, TaskId};

/// Chooses a resource-fitting subset of the READY set to launch.
///
/// Implementations must not mutate `budget`; the coordinator alone owns the
/// real resource ledger (spec §5's "Shared-resource policy") and deducts it
/// separately at launch.
pub trait SchedulingPolicy: Send + Sync {
    /// Pick tasks to launch from `ready`, respecting `budget`.
    fn select(&self, ready: &[Task], budget: &HashMap<String, f64>) -> Vec<TaskId>;
}

/// The stock policy from spec §4.6: iterate READY in task-supplied priority
/// order (ties broken by insertion order — i.e. ascending `TaskId`), admit a
/// task iff every resource it demands is `<=` the corresponding available
/// budget entry, and deduct greedily as tasks are admitted. A resource key
/// present in a task's demand but absent from the budget is treated as
/// infinite supply; a key present in the budget but not demanded is zero
/// demand.
#[derive(Debug, Default, Clone, Copy)]
pub struct GreedyPolicy;

impl SchedulingPolicy for GreedyPolicy {
    fn select(&self, ready: &[Task], budget: &HashMap<String, f64>) -> Vec<TaskId> {
        let mut candidates: Vec<&Task> = ready.iter().collect();
        candidates.sort_by(|a, b| {
            b.priority()
                .cmp(&a.priority())
                .then_with(|| a.id().index().cmp(&b.id().index()))
        });

        let mut scratch = budget.clone();
        let mut selected = Vec::new();
        for task in candidates {
            let demand = task.resources();
            let fits = demand.iter().all(|(key, need)| {
                scratch
                    .get(key)
                    .map(|available| *need <= *available)
                    .unwrap_or(true)
            });
            if !fits {
                continue;
            }
            for (key, need) in &demand {
                if let Some(available) = scratch.get_mut(key) {
                    *available -= need;
                }
            }
            selected.push(task.id());
        }
        selected
    }
}
