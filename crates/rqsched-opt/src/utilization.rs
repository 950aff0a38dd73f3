//! Utilization optimization.
//!
//! A task's utilization is the execution time of its last observed job (or
//! its WCET estimate) over its period; a core's utilization is the sum over
//! its residents. A core above 1.0 is flagged overloaded, which blocks new
//! job starts there, and sheds one task per tick: the resident with the most
//! deadline slack, since it is least likely to miss its deadline because of
//! the move. The target is the least-loaded online core that stays within
//! capacity after taking the task.

use std::collections::BTreeSet;

use tracing::{debug, info};

use rqsched_core::{CoreId, Goal};

use crate::state::EngineState;
use crate::strategy::{Migration, Strategy};

/// Utilization above which a core is overloaded.
pub const CAPACITY: f64 = 1.0;

pub struct UtilizationStrategy;

impl UtilizationStrategy {
    fn refresh_overload(state: &mut EngineState) {
        for core in 0..state.num_cores() {
            let overloaded = state.core_utilization(core) > CAPACITY;
            state.set_overload(core, overloaded);
        }
    }
}

impl Strategy for UtilizationStrategy {
    fn goal(&self) -> Goal {
        Goal::Utilization
    }

    fn blocks_overloaded_start(&self) -> bool {
        true
    }

    fn optimize(&mut self, state: &mut EngineState, online: &[bool]) -> Vec<Migration> {
        for task in state.tasks_mut() {
            task.utilization = task.demand();
        }
        Self::refresh_overload(state);

        let mut migrations = Vec::new();
        let mut moved = BTreeSet::new();

        for core in 0..state.num_cores() {
            if !state.overload_at_core(core) {
                continue;
            }

            // Largest slack wins; residents come in name order so ties keep
            // the smaller name.
            let mut candidate: Option<(String, f64, std::time::Duration)> = None;
            for name in state.competitors().residents(core) {
                if moved.contains(name) {
                    continue;
                }
                let Some(task) = state.task(name) else { continue };
                let slack = task.slack();
                if candidate.as_ref().is_none_or(|(_, _, s)| slack > *s) {
                    candidate = Some((name.to_string(), task.utilization, slack));
                }
            }
            let Some((name, demand, _)) = candidate else {
                continue;
            };

            let fits = |_: CoreId, util: f64| util + demand <= CAPACITY;
            let Some(target) = state.least_loaded_core(core, online, fits) else {
                debug!(core, task = %name, demand, "core overloaded but no core can absorb a task");
                continue;
            };

            if state.move_task(&name, target).is_ok() {
                info!(task = %name, from = core, to = target, demand, "utilization migration");
                moved.insert(name.clone());
                migrations.push(Migration {
                    task: name,
                    from: core,
                    to: target,
                });
            }
        }

        if !migrations.is_empty() {
            Self::refresh_overload(state);
        }
        migrations
    }
}
