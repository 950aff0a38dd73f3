//! rqsched-core — types shared by the optimizer, the controller and the daemon.

pub mod config;
pub mod runqueue;
pub mod types;

pub use config::{ConfigError, ControllerConfig, ControllerSection, Goal, GoalConfig, TaskConfig};
pub use runqueue::{EnqueueError, RunQueue};
pub use types::*;
