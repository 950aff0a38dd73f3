//! rqsched-opt — run-time optimizer for periodic real-time tasks.
//!
//! Sits between the dispatch path and the per-core run queues. The
//! optimizer:
//!
//! - Tracks each registered task's current job and its next release
//! - Reads the completion log (rip list) to advance or retire tasks
//! - Accounts missed deadlines and blames the competitor that caused them
//! - Rebalances cores for the active goal (none, fairness, utilization)
//! - Answers whether a job may start now
//!
//! # Architecture
//!
//! ```text
//! Optimizer
//!   ├── Capabilities
//!   │   ├── MonitoringSource (per-core thread samples, online state)
//!   │   ├── RipListSource (bounded completion log)
//!   │   ├── Clock
//!   │   └── RunQueue (optional, re-enqueue on migration)
//!   ├── Mutex<Engine>
//!   │   ├── EngineState (registry, ended tasks, competitors, overload flags)
//!   │   └── Box<dyn Strategy> (NoOptimization | Fairness | Utilization)
//!   └── poll loop (tick every query interval, watch-channel shutdown)
//! ```

pub mod competitor;
pub mod error;
pub mod fairness;
pub mod optimizer;
pub mod rip_list;
pub mod source;
pub mod state;
pub mod strategy;
pub mod task;
pub mod utilization;

pub use error::{OptError, OptResult};
pub use optimizer::{Optimizer, TickReport};
pub use rip_list::JobEvent;
pub use source::{
    Capabilities, Clock, InMemoryMonitor, InMemoryRipList, ManualClock, MonitoringSource,
    RipListSource, SourceError, SystemClock,
};
pub use state::{DeadlineMiss, EngineState};
pub use strategy::{Migration, Strategy};
pub use task::{EndedTask, NewestJob, OptimizationTask};
