//! Shared types used across rqsched crates.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Index of a core / run queue.
pub type CoreId = usize;

/// Identifier of a single job instance inside the execution substrate.
pub type FocId = u32;

/// Criticality class a run queue accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskClass {
    Hi,
    #[default]
    Lo,
}

/// Ordering strategy of a run queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStrategy {
    #[default]
    Priority,
    Deadline,
}

/// A periodic real-time task as handed to the run-queue transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Unique task name, used as the registry key.
    pub name: String,
    pub task_id: u32,
    /// Job id of the first job this task will run.
    pub foc_id: FocId,
    /// Period between job releases.
    pub inter_arrival: Duration,
    /// Relative deadline of each job.
    pub deadline: Duration,
    /// Worst-case execution estimate, used until a job has been observed.
    pub wcet: Duration,
    pub prio: u32,
    pub task_class: TaskClass,
    pub task_strategy: TaskStrategy,
}

impl TaskDescriptor {
    /// A `Lo`/`Priority` task with the given timing and a zero WCET estimate.
    pub fn periodic(name: &str, foc_id: FocId, inter_arrival: Duration, deadline: Duration) -> Self {
        Self {
            name: name.to_string(),
            task_id: foc_id,
            foc_id,
            inter_arrival,
            deadline,
            wcet: Duration::ZERO,
            prio: 0,
            task_class: TaskClass::default(),
            task_strategy: TaskStrategy::default(),
        }
    }

    pub fn with_wcet(mut self, wcet: Duration) -> Self {
        self.wcet = wcet;
        self
    }
}

// ── Rip list ──────────────────────────────────────────────────────

/// Why a job left the execution substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeathCause {
    Finished,
    Killed,
}

impl DeathCause {
    pub fn label(&self) -> &'static str {
        match self {
            DeathCause::Finished => "FINISHED",
            DeathCause::Killed => "KILLED",
        }
    }
}

/// One record of the rip list: a terminated job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RipEntry {
    pub foc_id: FocId,
    pub death_time: Duration,
    pub cause: DeathCause,
}

/// An immutable copy of the retained part of the rip list.
///
/// `start` is the absolute sequence position of `entries[0]`; the producer's
/// write position is `start + entries.len()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RipWindow {
    pub start: u64,
    pub entries: Vec<RipEntry>,
}

impl RipWindow {
    /// Absolute position the producer will write next.
    pub fn write_position(&self) -> u64 {
        self.start + self.entries.len() as u64
    }

    /// Entries at absolute positions `from..write_position()`, paired with
    /// their position. Positions before `start` are not retained.
    pub fn entries_from(&self, from: u64) -> impl Iterator<Item = (u64, &RipEntry)> {
        let skip = from.saturating_sub(self.start) as usize;
        self.entries
            .iter()
            .enumerate()
            .skip(skip)
            .map(move |(i, e)| (self.start + i as u64, e))
    }
}

// ── Monitoring ────────────────────────────────────────────────────

/// Execution statistics of one thread as published by the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSample {
    pub name: String,
    /// Execution time of the thread's current job.
    pub execution_time: Duration,
    /// Time the thread has spent waiting since its job was released.
    pub idle_time: Duration,
}

/// Per-core monitoring snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreSnapshot {
    pub core: CoreId,
    pub threads: Vec<ThreadSample>,
}

impl CoreSnapshot {
    pub fn thread(&self, name: &str) -> Option<&ThreadSample> {
        self.threads.iter().find(|t| t.name == name)
    }

    /// Measured fraction of sampled time the core's threads were executing,
    /// or `None` when nothing was sampled.
    pub fn busy_share(&self) -> Option<f64> {
        let (busy, idle) = self.threads.iter().fold((Duration::ZERO, Duration::ZERO), |(b, i), t| {
            (b.saturating_add(t.execution_time), i.saturating_add(t.idle_time))
        });
        let total = busy.saturating_add(idle);
        if total.is_zero() {
            return None;
        }
        Some(busy.as_secs_f64() / total.as_secs_f64())
    }
}
