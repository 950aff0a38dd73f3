//! Run-queue transport interface.
//!
//! The transport that pushes a task descriptor into a core's queue lives
//! outside this workspace; the controller and the optimizer only see this
//! trait.

use thiserror::Error;

use crate::types::{CoreId, TaskDescriptor};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("run queue {0} does not exist")]
    NoSuchQueue(CoreId),
    #[error("run queue {0} is full")]
    QueueFull(CoreId),
}

/// Pushes task descriptors into per-core run queues.
pub trait RunQueue: Send + Sync {
    /// Number of run queues the transport provides.
    fn num_rqs(&self) -> usize;

    fn enqueue(&self, core: CoreId, task: &TaskDescriptor) -> Result<(), EnqueueError>;
}
