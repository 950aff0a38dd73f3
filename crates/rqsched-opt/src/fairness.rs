//! Fairness optimization.
//!
//! Each task carries a starvation score per core (`value`). A tick adds one
//! point to every task that is ready but still waiting for dispatch; missed
//! deadlines add [`DEADLINE_MISS_PENALTY`](crate::state::DEADLINE_MISS_PENALTY)
//! and credit the competitor blamed for them.
//!
//! When the spread between the highest and lowest score on a core exceeds
//! `accept`, the lowest-scoring task (the one receiving the most service) is
//! moved off the core, leaving the starved tasks more room. A move has to
//! settle things rather than shift the imbalance:
//!
//! - the target must end up less loaded than the source is now,
//! - the target's own spread, with the mover's score carried over, must stay
//!   within `accept`,
//! - a moved task sits out [`MIGRATION_COOLDOWN_TICKS`] ticks before it can
//!   move again.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use tracing::{debug, info};

use rqsched_core::{CoreId, Goal};

use crate::state::EngineState;
use crate::strategy::{Migration, Strategy};

/// Added per tick to a task that is ready but not dispatched.
pub const STARVATION_STEP: u32 = 1;

/// Ticks a migrated task stays put.
pub const MIGRATION_COOLDOWN_TICKS: u32 = 3;

pub struct FairnessStrategy {
    accept: u32,
}

impl FairnessStrategy {
    pub fn new(accept: u32) -> Self {
        Self { accept }
    }

    fn accumulate_starvation(state: &mut EngineState) {
        for task in state.tasks_mut() {
            task.migration_cooldown = task.migration_cooldown.saturating_sub(1);
            if task.to_schedule && !task.newest_job.dispatched {
                let core = task.core;
                task.value[core] = task.value[core].saturating_add(STARVATION_STEP);
            }
        }
    }

    /// Spread of the scores on `core` if a task scoring `incoming` joined.
    fn spread_with(state: &EngineState, core: CoreId, incoming: u32) -> u32 {
        let values = state
            .competitors()
            .residents(core)
            .filter_map(|n| state.task(n))
            .map(|t| t.value[core])
            .chain(std::iter::once(incoming));
        let (min, max) = values.fold((u32::MAX, 0), |(lo, hi), v| (lo.min(v), hi.max(v)));
        max - min
    }
}

impl Strategy for FairnessStrategy {
    fn goal(&self) -> Goal {
        Goal::Fairness
    }

    fn optimize(&mut self, state: &mut EngineState, online: &[bool]) -> Vec<Migration> {
        state.clear_overload();
        Self::accumulate_starvation(state);

        let mut migrations = Vec::new();
        let mut moved = BTreeSet::new();

        for core in 0..state.num_cores() {
            // (name, value) of the most and least favored residents. Residents
            // iterate in name order, so strict comparisons keep the smaller
            // name on ties.
            let mut highest: Option<(String, u32)> = None;
            let mut lowest: Option<(String, u32)> = None;
            for name in state.competitors().residents(core) {
                let Some(task) = state.task(name) else { continue };
                let value = task.value[core];
                if highest.as_ref().is_none_or(|(_, v)| value > *v) {
                    highest = Some((name.to_string(), value));
                }
                if lowest.as_ref().is_none_or(|(_, v)| value < *v) {
                    lowest = Some((name.to_string(), value));
                }
            }

            let (Some((_, high)), Some((candidate, low))) = (highest, lowest) else {
                continue;
            };
            let spread = high - low;
            if spread <= self.accept || moved.contains(&candidate) {
                continue;
            }
            let Some(task) = state.task(&candidate) else { continue };
            if task.migration_cooldown > 0 {
                debug!(
                    core,
                    task = %candidate,
                    cooldown = task.migration_cooldown,
                    "fairness candidate cooling down"
                );
                continue;
            }
            let demand = task.demand();

            let source_util = state.core_utilization(core);
            let source_residents = state.competitors().load(core);
            let accept = self.accept;
            let target = state.least_loaded_core(core, online, |target, util| {
                let lighter = match (util + demand).total_cmp(&source_util) {
                    Ordering::Less => true,
                    Ordering::Equal => state.competitors().load(target) + 1 < source_residents,
                    Ordering::Greater => false,
                };
                lighter && Self::spread_with(state, target, low) <= accept
            });
            let Some(target) = target else {
                debug!(
                    core,
                    spread,
                    task = %candidate,
                    "fairness spread exceeded but no core would settle it"
                );
                continue;
            };

            if state.move_task(&candidate, target).is_ok() {
                if let Some(task) = state.task_mut(&candidate) {
                    task.value[target] = low;
                    task.migration_cooldown = MIGRATION_COOLDOWN_TICKS;
                }
                info!(
                    task = %candidate,
                    from = core,
                    to = target,
                    spread,
                    accept = self.accept,
                    "fairness migration"
                );
                moved.insert(candidate.clone());
                migrations.push(Migration {
                    task: candidate,
                    from: core,
                    to: target,
                });
            }
        }

        migrations
    }
}
