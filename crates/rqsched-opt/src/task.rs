//! Per-task optimization state and the terminal record left behind when a
//! task leaves the registry.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use rqsched_core::{CoreId, DeathCause, FocId, TaskDescriptor};

/// The job instance the rip-list analyzer is currently waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewestJob {
    pub foc_id: FocId,
    pub arrival_time: Duration,
    pub dispatched: bool,
}

/// Optimization state of one registered periodic task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationTask {
    /// Descriptor as handed to `add_task`; re-enqueued on migration.
    pub descriptor: TaskDescriptor,
    pub core: CoreId,
    /// Earliest legal start of the current job.
    pub arrival_time: Duration,
    pub to_schedule: bool,
    /// The terminal job has begun; its completion removes the task.
    pub last_job_started: bool,
    /// Other tasks on the same core, ordered by name.
    pub competitor: Vec<String>,
    pub newest_job: NewestJob,
    /// Fairness starvation score, one slot per core.
    pub value: Vec<u32>,
    pub utilization: f64,
    /// Execution time accumulated over all completed jobs.
    pub execution_time: Duration,
    /// Latest monitored execution time of the running job.
    pub current_job_exec: Duration,
    /// Execution time of the last completed job, once observed.
    pub last_job_exec: Option<Duration>,
    pub missed_deadlines: u32,
    /// Ticks left before the task may be migrated again.
    pub migration_cooldown: u32,
    /// Absolute rip-list position of the next unread entry.
    pub(crate) cursor: u64,
}

impl OptimizationTask {
    pub(crate) fn new(
        descriptor: TaskDescriptor,
        core: CoreId,
        num_cores: usize,
        now: Duration,
        cursor: u64,
    ) -> Self {
        let foc_id = descriptor.foc_id;
        Self {
            descriptor,
            core,
            arrival_time: now,
            to_schedule: false,
            last_job_started: false,
            competitor: Vec::new(),
            newest_job: NewestJob {
                foc_id,
                arrival_time: now,
                dispatched: false,
            },
            value: vec![0; num_cores],
            utilization: 0.0,
            execution_time: Duration::ZERO,
            current_job_exec: Duration::ZERO,
            last_job_exec: None,
            missed_deadlines: 0,
            migration_cooldown: 0,
            cursor,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn inter_arrival(&self) -> Duration {
        self.descriptor.inter_arrival
    }

    pub fn deadline(&self) -> Duration {
        self.descriptor.deadline
    }

    /// Absolute deadline of the current job.
    pub fn absolute_deadline(&self) -> Duration {
        self.arrival_time.saturating_add(self.deadline())
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Execution time expected for the next job: the last observed job, or
    /// the descriptor's WCET before any job has completed.
    pub fn exec_estimate(&self) -> Duration {
        self.last_job_exec.unwrap_or(self.descriptor.wcet)
    }

    /// Fraction of each period the task keeps its core busy.
    pub fn demand(&self) -> f64 {
        let period = self.inter_arrival().as_secs_f64();
        if period == 0.0 {
            return 0.0;
        }
        self.exec_estimate().as_secs_f64() / period
    }

    /// Time the job can be delayed and still meet its deadline.
    pub fn slack(&self) -> Duration {
        self.deadline().saturating_sub(self.exec_estimate())
    }

    /// Close the tracked job and start tracking the next release.
    pub(crate) fn complete_job(&mut self) {
        self.execution_time += self.current_job_exec;
        if !self.current_job_exec.is_zero() {
            self.last_job_exec = Some(self.current_job_exec);
        }
        self.current_job_exec = Duration::ZERO;
        self.release_after(self.inter_arrival());
        self.newest_job.foc_id = self.newest_job.foc_id.wrapping_add(1);
    }

    /// Drop releases whose deadline has passed without a dispatch, moving
    /// to the first release whose deadline is at or after `now`. The job id
    /// is kept since the substrate never started it.
    pub(crate) fn skip_missed_releases(&mut self, now: Duration) {
        let period = self.inter_arrival().as_nanos();
        if period == 0 {
            return;
        }
        let overdue = now.saturating_sub(self.absolute_deadline()).as_nanos();
        let periods = overdue.div_ceil(period).max(1);
        let step = periods
            .checked_mul(period)
            .and_then(|nanos| u64::try_from(nanos).ok())
            .map_or(Duration::MAX, Duration::from_nanos);
        self.release_after(step);
    }

    fn release_after(&mut self, step: Duration) {
        self.arrival_time = self.arrival_time.saturating_add(step);
        self.newest_job.arrival_time = self.arrival_time;
        self.newest_job.dispatched = false;
        self.to_schedule = false;
    }
}

/// Terminal record of a task removed from the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndedTask {
    pub name: String,
    pub last_foc_id: FocId,
    pub cause_of_death: DeathCause,
}
