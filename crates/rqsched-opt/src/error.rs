//! Optimizer error types.

use thiserror::Error;

use rqsched_core::{ConfigError, CoreId};

/// Errors that can occur inside the optimizer.
///
/// The scheduling gate never hands these to its callers; they are logged and
/// turned into a `false` answer.
#[derive(Debug, Error)]
pub enum OptError {
    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("task already registered: {0}")]
    DuplicateTask(String),

    #[error("invalid core {core} (have {num_cores} cores)")]
    InvalidCore { core: CoreId, num_cores: usize },

    #[error("task {task} already runs on core {core}")]
    AlreadyOnCore { task: String, core: CoreId },

    #[error("capability unusable: {0}")]
    InvalidCapability(String),

    #[error("malformed goal config: {0}")]
    MalformedConfig(#[from] ConfigError),

    #[error("stale rip-list cursor {cursor} (retained {oldest}..{write_position})")]
    StaleCursor {
        cursor: u64,
        oldest: u64,
        write_position: u64,
    },
}

pub type OptResult<T> = Result<T, OptError>;
