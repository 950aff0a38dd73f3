//! rqsched-controller — core and run-queue ownership, task placement, and
//! the pieces the `rqschedd` daemon is assembled from.
//!
//! ```text
//! Daemon
//!   ├── InMemoryMonitor / InMemoryRipList / InMemoryRqManager
//!   └── Controller
//!       ├── Pcores + Runqueues (1:1)
//!       └── Optimizer (rqsched-opt)
//! ```

pub mod controller;
pub mod daemon;
pub mod error;
pub mod runqueue;

pub use controller::{Controller, DEFAULT_NUM_PCORES, Pcore, Runqueue, num_physical_cores};
pub use daemon::{Daemon, host_cores};
pub use error::{ControllerError, ControllerResult};
pub use runqueue::InMemoryRqManager;
