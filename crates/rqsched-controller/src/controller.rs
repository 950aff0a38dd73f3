//! Scheduling controller: owns the physical cores and run queues and
//! places newly arriving tasks.
//!
//! Placement is least-utilization-first over the run queues that accept the
//! task's class and strategy. A placed task is registered with the optimizer
//! first, which also claims the name, and only then pushed into its run
//! queue; a failed push withdraws the registration again.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use rqsched_core::{CoreId, RunQueue, TaskClass, TaskDescriptor, TaskStrategy};
use rqsched_opt::Optimizer;

use crate::error::{ControllerError, ControllerResult};

/// Core count used when neither the config nor the monitor provides one.
pub const DEFAULT_NUM_PCORES: usize = 4;

/// A physical core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pcore {
    pub id: CoreId,
}

/// A run queue as the controller sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Runqueue {
    pub id: usize,
    pub task_class: TaskClass,
    pub task_strategy: TaskStrategy,
    /// Backing core, if any. Queues without one never receive tasks.
    pub pcore: Option<CoreId>,
}

/// Resolve the physical core count: the configured value, else what the
/// monitor reports, else [`DEFAULT_NUM_PCORES`].
pub fn num_physical_cores(configured: Option<usize>, monitored: usize) -> usize {
    match configured {
        Some(n) if n > 0 => n,
        _ if monitored > 0 => monitored,
        _ => DEFAULT_NUM_PCORES,
    }
}

pub struct Controller {
    pcores: Vec<Pcore>,
    runqueues: Vec<Runqueue>,
    /// pcore → run queue, 1:1.
    pcore_rq: BTreeMap<CoreId, usize>,
    rq_manager: Arc<dyn RunQueue>,
    optimizer: Arc<Optimizer>,
}

impl Controller {
    pub fn new(num_pcores: usize, rq_manager: Arc<dyn RunQueue>, optimizer: Arc<Optimizer>) -> Self {
        let pcores = init_pcores(num_pcores);
        let runqueues = init_runqueues(rq_manager.num_rqs(), num_pcores);
        let pcore_rq = runqueues
            .iter()
            .filter_map(|rq| rq.pcore.map(|core| (core, rq.id)))
            .collect();

        info!(
            num_pcores,
            num_rqs = runqueues.len(),
            "scheduling controller initialized"
        );

        Self {
            pcores,
            runqueues,
            pcore_rq,
            rq_manager,
            optimizer,
        }
    }

    pub fn pcores(&self) -> &[Pcore] {
        &self.pcores
    }

    pub fn runqueues(&self) -> &[Runqueue] {
        &self.runqueues
    }

    pub fn num_rqs(&self) -> usize {
        self.runqueues.len()
    }

    pub fn optimizer(&self) -> &Arc<Optimizer> {
        &self.optimizer
    }

    /// Run queues that accept tasks of `class` scheduled by `strategy`.
    pub fn which_runqueues(&self, class: TaskClass, strategy: TaskStrategy) -> Vec<Runqueue> {
        self.runqueues
            .iter()
            .filter(|rq| rq.pcore.is_some())
            .filter(|rq| rq.task_class == class && rq.task_strategy == strategy)
            .copied()
            .collect()
    }

    /// Current utilization of the core behind `rq`, as tracked by the
    /// optimizer. May exceed 1.0 on an overloaded core.
    pub async fn get_utilization(&self, rq: usize) -> f64 {
        match self.runqueues.get(rq).and_then(|r| r.pcore) {
            Some(core) => self.optimizer.core_utilization(core).await,
            None => 0.0,
        }
    }

    /// Physical cores with no run queue attached.
    pub fn get_unused_cores(&self) -> Vec<Pcore> {
        self.pcores
            .iter()
            .filter(|p| !self.pcore_rq.contains_key(&p.id))
            .copied()
            .collect()
    }

    /// Push a descriptor into run queue `rq`.
    pub fn task_to_rq(&self, rq: usize, task: &TaskDescriptor) -> ControllerResult<()> {
        self.rq_manager.enqueue(rq, task)?;
        Ok(())
    }

    /// Place a newly arriving task on the least utilized matching run queue,
    /// register it with the optimizer and enqueue it. Returns the core.
    pub async fn allocate_task(&self, task: TaskDescriptor) -> ControllerResult<CoreId> {
        info!(task = %task.name, task_id = task.task_id, "allocating task");

        let candidates = self.which_runqueues(task.task_class, task.task_strategy);
        let mut best: Option<(f64, Runqueue)> = None;
        for rq in candidates {
            let util = self.get_utilization(rq.id).await;
            debug!(rq = rq.id, util, "candidate run queue");
            // Candidates come in index order; strict comparison keeps the
            // lower index on ties.
            if best.as_ref().is_none_or(|(u, _)| util < *u) {
                best = Some((util, rq));
            }
        }
        let Some((util, rq)) = best else {
            return Err(ControllerError::NoRunqueue {
                class: task.task_class,
                strategy: task.task_strategy,
            });
        };
        let Some(core) = rq.pcore else {
            return Err(ControllerError::NoRunqueue {
                class: task.task_class,
                strategy: task.task_strategy,
            });
        };

        // Registration is the atomic claim on the name; a concurrent
        // allocation of the same name fails here before touching any queue.
        let name = task.name.clone();
        if !self.optimizer.add_task(core, task.clone()).await {
            return Err(ControllerError::Rejected(name));
        }
        if let Err(e) = self.task_to_rq(rq.id, &task) {
            warn!(task = %name, rq = rq.id, error = %e, "enqueue failed, withdrawing registration");
            self.optimizer.withdraw_task(&name).await;
            return Err(e);
        }

        info!(task = %name, rq = rq.id, core, util, "task allocated");
        Ok(core)
    }
}

fn init_pcores(num_pcores: usize) -> Vec<Pcore> {
    (0..num_pcores).map(|id| Pcore { id }).collect()
}

/// Queues `0..min(num_rqs, num_pcores)` are backed by the core with the same
/// index and accept `Lo`/`Priority` tasks.
fn init_runqueues(num_rqs: usize, num_pcores: usize) -> Vec<Runqueue> {
    (0..num_rqs)
        .map(|id| Runqueue {
            id,
            task_class: TaskClass::Lo,
            task_strategy: TaskStrategy::Priority,
            pcore: (id < num_pcores).then_some(id),
        })
        .collect()
}
