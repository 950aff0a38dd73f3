//! Controller error types.

use thiserror::Error;

use rqsched_core::{EnqueueError, TaskClass, TaskStrategy};
use rqsched_opt::OptError;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("optimizer error: {0}")]
    Optimizer(#[from] OptError),

    #[error("enqueue failed: {0}")]
    Enqueue(#[from] EnqueueError),

    #[error("no run queue accepts {class:?}/{strategy:?} tasks")]
    NoRunqueue {
        class: TaskClass,
        strategy: TaskStrategy,
    },

    #[error("optimizer rejected task: {0}")]
    Rejected(String),
}

pub type ControllerResult<T> = Result<T, ControllerError>;
