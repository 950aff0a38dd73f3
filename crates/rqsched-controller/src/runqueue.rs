//! In-process run-queue manager.
//!
//! A fixed number of bounded FIFO queues, one per run-queue index. Backs the
//! daemon when no external transport is attached, and the tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::{debug, warn};

use rqsched_core::{CoreId, EnqueueError, RunQueue, TaskDescriptor};

pub struct InMemoryRqManager {
    queues: Vec<Mutex<VecDeque<TaskDescriptor>>>,
    max_depth: usize,
}

impl InMemoryRqManager {
    pub fn new(num_rqs: usize, max_depth: usize) -> Self {
        Self {
            queues: (0..num_rqs).map(|_| Mutex::new(VecDeque::new())).collect(),
            max_depth,
        }
    }

    fn queue(&self, rq: CoreId) -> Result<&Mutex<VecDeque<TaskDescriptor>>, EnqueueError> {
        self.queues.get(rq).ok_or(EnqueueError::NoSuchQueue(rq))
    }

    /// Take the oldest descriptor from `rq`.
    pub fn dequeue(&self, rq: CoreId) -> Option<TaskDescriptor> {
        let queue = self.queues.get(rq)?;
        queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front()
    }

    /// Number of descriptors waiting in `rq` (0 for unknown queues).
    pub fn len(&self, rq: CoreId) -> usize {
        self.queues
            .get(rq)
            .map_or(0, |q| q.lock().unwrap_or_else(|e| e.into_inner()).len())
    }

    /// Names of the descriptors waiting in `rq`, oldest first.
    pub fn queued_names(&self, rq: CoreId) -> Vec<String> {
        self.queues.get(rq).map_or_else(Vec::new, |q| {
            q.lock()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .map(|t| t.name.clone())
                .collect()
        })
    }
}

impl RunQueue for InMemoryRqManager {
    fn num_rqs(&self) -> usize {
        self.queues.len()
    }

    fn enqueue(&self, rq: CoreId, task: &TaskDescriptor) -> Result<(), EnqueueError> {
        let mut queue = self.queue(rq)?.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() >= self.max_depth {
            warn!(rq, task = %task.name, depth = queue.len(), "run queue full");
            return Err(EnqueueError::QueueFull(rq));
        }
        queue.push_back(task.clone());
        debug!(rq, task = %task.name, depth = queue.len(), "task enqueued");
        Ok(())
    }
}
