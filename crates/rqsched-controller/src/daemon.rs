//! Daemon assembly: builds the in-process sources, the optimizer and the
//! controller from a [`ControllerConfig`].

use std::num::NonZeroUsize;
use std::sync::Arc;

use tracing::{info, warn};

use rqsched_core::ControllerConfig;
use rqsched_opt::{
    Capabilities, EndedTask, InMemoryMonitor, InMemoryRipList, Optimizer, SystemClock,
};

use crate::controller::{Controller, num_physical_cores};
use crate::error::ControllerResult;
use crate::runqueue::InMemoryRqManager;

/// Core count of the host, 0 when it cannot be determined. Stands in for
/// the monitor's core probe since the in-process monitor is sized from this
/// value rather than measured.
pub fn host_cores() -> usize {
    std::thread::available_parallelism().map_or(0, NonZeroUsize::get)
}

pub struct Daemon {
    pub monitor: Arc<InMemoryMonitor>,
    pub rip_list: Arc<InMemoryRipList>,
    pub run_queues: Arc<InMemoryRqManager>,
    pub controller: Controller,
}

impl Daemon {
    pub fn from_config(config: &ControllerConfig) -> ControllerResult<Self> {
        let section = &config.controller;
        let num_pcores = num_physical_cores(section.num_pcores, host_cores());

        let monitor = Arc::new(InMemoryMonitor::new(num_pcores));
        let rip_list = Arc::new(InMemoryRipList::new(section.rip_list_capacity));
        let run_queues = Arc::new(InMemoryRqManager::new(section.num_rqs, section.max_rq_depth));

        let caps = Capabilities::new(monitor.clone(), rip_list.clone(), Arc::new(SystemClock::new()))
            .with_run_queue(run_queues.clone());
        let optimizer = Arc::new(Optimizer::new(caps, config.goal.clone())?);
        let controller = Controller::new(num_pcores, run_queues.clone(), optimizer);

        Ok(Self {
            monitor,
            rip_list,
            run_queues,
            controller,
        })
    }

    pub fn optimizer(&self) -> &Arc<Optimizer> {
        self.controller.optimizer()
    }

    /// Allocate every task declared in the config. Failures are logged and
    /// skipped; returns the number placed.
    pub async fn allocate_configured(&self, config: &ControllerConfig) -> usize {
        let mut placed = 0;
        for task in config.task_descriptors() {
            let name = task.name.clone();
            match self.controller.allocate_task(task).await {
                Ok(_) => placed += 1,
                Err(e) => warn!(task = %name, error = %e, "failed to allocate configured task"),
            }
        }
        info!(placed, configured = config.tasks.len(), "configured tasks allocated");
        placed
    }

    /// Stop the poll loop and return the ended-task log.
    pub async fn shutdown(&self) -> Vec<EndedTask> {
        self.optimizer().stop_optimizing().await;
        self.optimizer().ended_tasks().await
    }
}
