//! Engine state: task registry, ended-task log, competitor sets and
//! per-core overload flags.
//!
//! Everything here is mutated under the optimizer's single lock, so a tick
//! or a gate call always sees a task in exactly one place.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use rqsched_core::{CoreId, DeathCause, FocId, TaskDescriptor};

use crate::competitor::CompetitorTracker;
use crate::error::{OptError, OptResult};
use crate::task::{EndedTask, OptimizationTask};

/// Added to a task's fairness value for every missed deadline.
pub const DEADLINE_MISS_PENALTY: u32 = 5;

/// Taken from the competitor blamed for a missed deadline.
pub const BLAME_CREDIT: u32 = 1;

/// A deadline miss observed during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlineMiss {
    pub task: String,
    pub core: CoreId,
    /// Competitor held responsible, if any ran on the core.
    pub cause: Option<String>,
}

#[derive(Debug)]
pub struct EngineState {
    num_cores: usize,
    tasks: BTreeMap<String, OptimizationTask>,
    ended: BTreeMap<String, EndedTask>,
    competitors: CompetitorTracker,
    overload_at_core: Vec<bool>,
}

impl EngineState {
    pub fn new(num_cores: usize) -> Self {
        Self {
            num_cores,
            tasks: BTreeMap::new(),
            ended: BTreeMap::new(),
            competitors: CompetitorTracker::new(num_cores),
            overload_at_core: vec![false; num_cores],
        }
    }

    pub fn num_cores(&self) -> usize {
        self.num_cores
    }

    fn check_core(&self, core: CoreId) -> OptResult<()> {
        if core >= self.num_cores {
            return Err(OptError::InvalidCore {
                core,
                num_cores: self.num_cores,
            });
        }
        Ok(())
    }

    // ── Registry ────────────────────────────────────────────────────

    /// Register a task on `core`. `cursor` is the rip-list write position at
    /// registration time; older entries never belong to this task.
    pub fn add_task(
        &mut self,
        core: CoreId,
        descriptor: TaskDescriptor,
        now: Duration,
        cursor: u64,
    ) -> OptResult<()> {
        self.check_core(core)?;
        if self.tasks.contains_key(&descriptor.name) {
            return Err(OptError::DuplicateTask(descriptor.name));
        }

        let name = descriptor.name.clone();
        if self.ended.remove(&name).is_some() {
            debug!(task = %name, "re-registered name, dropping old ended record");
        }

        let task = OptimizationTask::new(descriptor, core, self.num_cores, now, cursor);
        self.tasks.insert(name.clone(), task);
        self.competitors.insert(core, &name);
        self.refresh_competitors(core);

        info!(task = %name, core, "task registered");
        Ok(())
    }

    /// Move a task from the registry to the ended-task log.
    pub fn remove_task(
        &mut self,
        name: &str,
        last_foc_id: FocId,
        cause: DeathCause,
    ) -> OptResult<EndedTask> {
        let task = self
            .tasks
            .remove(name)
            .ok_or_else(|| OptError::UnknownTask(name.to_string()))?;
        self.competitors.remove(task.core, name);
        self.refresh_competitors(task.core);

        let ended = EndedTask {
            name: name.to_string(),
            last_foc_id,
            cause_of_death: cause,
        };
        self.ended.insert(name.to_string(), ended.clone());

        info!(task = %name, last_foc_id, cause = cause.label(), "task ended");
        Ok(ended)
    }

    /// Drop a task from the registry without recording it as ended.
    pub fn withdraw_task(&mut self, name: &str) -> OptResult<OptimizationTask> {
        let task = self
            .tasks
            .remove(name)
            .ok_or_else(|| OptError::UnknownTask(name.to_string()))?;
        self.competitors.remove(task.core, name);
        self.refresh_competitors(task.core);
        Ok(task)
    }

    /// Reassign a task to `new_core`, returning the core it left.
    pub fn move_task(&mut self, name: &str, new_core: CoreId) -> OptResult<CoreId> {
        self.check_core(new_core)?;
        let task = self
            .tasks
            .get_mut(name)
            .ok_or_else(|| OptError::UnknownTask(name.to_string()))?;
        let old_core = task.core;
        if old_core == new_core {
            return Err(OptError::AlreadyOnCore {
                task: name.to_string(),
                core: new_core,
            });
        }
        task.core = new_core;

        self.competitors.remove(old_core, name);
        self.competitors.insert(new_core, name);
        self.refresh_competitors(old_core);
        self.refresh_competitors(new_core);

        debug!(task = %name, from = old_core, to = new_core, "task moved");
        Ok(old_core)
    }

    fn refresh_competitors(&mut self, core: CoreId) {
        let residents: Vec<String> = self.competitors.residents(core).map(str::to_string).collect();
        for name in &residents {
            let others = self.competitors.competitors_of(core, name);
            if let Some(task) = self.tasks.get_mut(name) {
                task.competitor = others;
            }
        }
    }

    pub fn task(&self, name: &str) -> Option<&OptimizationTask> {
        self.tasks.get(name)
    }

    pub fn task_mut(&mut self, name: &str) -> Option<&mut OptimizationTask> {
        self.tasks.get_mut(name)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &OptimizationTask> {
        self.tasks.values()
    }

    pub fn tasks_mut(&mut self) -> impl Iterator<Item = &mut OptimizationTask> {
        self.tasks.values_mut()
    }

    pub fn task_names(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }

    pub fn ended_task(&self, name: &str) -> Option<&EndedTask> {
        self.ended.get(name)
    }

    pub fn ended_tasks(&self) -> impl Iterator<Item = &EndedTask> {
        self.ended.values()
    }

    pub fn competitors(&self) -> &CompetitorTracker {
        &self.competitors
    }

    // ── Load ────────────────────────────────────────────────────────

    /// Summed demand of all tasks resident on `core`.
    pub fn core_utilization(&self, core: CoreId) -> f64 {
        self.competitors
            .residents(core)
            .filter_map(|n| self.tasks.get(n))
            .map(OptimizationTask::demand)
            .sum()
    }

    /// The online core other than `exclude` with the lowest utilization,
    /// then fewest residents, then lowest index. `fits` filters candidates
    /// by core and current utilization.
    pub fn least_loaded_core<F>(&self, exclude: CoreId, online: &[bool], fits: F) -> Option<CoreId>
    where
        F: Fn(CoreId, f64) -> bool,
    {
        (0..self.num_cores)
            .filter(|&c| c != exclude && online.get(c).copied().unwrap_or(false))
            .map(|c| (c, self.core_utilization(c)))
            .filter(|&(c, util)| fits(c, util))
            .min_by(|a, b| {
                a.1.total_cmp(&b.1)
                    .then_with(|| self.competitors.load(a.0).cmp(&self.competitors.load(b.0)))
                    .then_with(|| a.0.cmp(&b.0))
            })
            .map(|(c, _)| c)
    }

    pub fn overload_at_core(&self, core: CoreId) -> bool {
        self.overload_at_core.get(core).copied().unwrap_or(false)
    }

    pub fn set_overload(&mut self, core: CoreId, overloaded: bool) {
        if let Some(flag) = self.overload_at_core.get_mut(core) {
            if *flag != overloaded {
                if overloaded {
                    warn!(core, "core overloaded");
                } else {
                    info!(core, "core no longer overloaded");
                }
            }
            *flag = overloaded;
        }
    }

    pub fn clear_overload(&mut self) {
        for core in 0..self.num_cores {
            self.set_overload(core, false);
        }
    }

    // ── Deadlines ───────────────────────────────────────────────────

    /// The competitor on `name`'s core most plausibly responsible for its
    /// delay: the one with the longest running job.
    pub fn get_cause_task(&self, name: &str) -> Option<String> {
        let core = self.tasks.get(name)?.core;
        self.competitors.cause_task(core, name, |other| {
            self.tasks
                .get(other)
                .map_or(Duration::ZERO, |t| t.current_job_exec)
        })
    }

    /// Record a miss when the current job's deadline has passed without a
    /// dispatch. The miss is charged to the task's fairness value and the
    /// blamed competitor gets a credit; the missed release is skipped.
    pub fn job_reached_deadline(&mut self, name: &str, now: Duration) -> Option<DeadlineMiss> {
        let task = self.tasks.get(name)?;
        if task.newest_job.dispatched || now <= task.absolute_deadline() {
            return None;
        }
        let core = task.core;
        let cause = self.get_cause_task(name);

        let task = self.tasks.get_mut(name)?;
        task.missed_deadlines += 1;
        task.value[core] = task.value[core].saturating_add(DEADLINE_MISS_PENALTY);
        let missed_arrival = task.arrival_time;
        task.skip_missed_releases(now);

        if let Some(culprit) = cause.as_deref().and_then(|c| self.tasks.get_mut(c)) {
            culprit.value[core] = culprit.value[core].saturating_sub(BLAME_CREDIT);
        }

        warn!(
            task = %name,
            core,
            arrival_ms = missed_arrival.as_millis() as u64,
            cause = cause.as_deref().unwrap_or("-"),
            "job missed its deadline"
        );

        Some(DeadlineMiss {
            task: name.to_string(),
            core,
            cause,
        })
    }
}
