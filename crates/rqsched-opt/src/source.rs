//! External data sources the optimizer reads from.
//!
//! The monitor and the rip list are written by the execution substrate and
//! only read here. Each trait hands out owned snapshots so a tick works on
//! one consistent copy even while the producer keeps writing.
//!
//! The in-memory implementations back the daemon's standalone mode and the
//! tests; a real deployment plugs in handles to the substrate's shared
//! dataspaces.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use thiserror::Error;

use rqsched_core::{CoreId, CoreSnapshot, RipEntry, RipWindow, RunQueue, ThreadSample};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("core {0} is not monitored")]
    NoSuchCore(CoreId),
    #[error("monitoring source unavailable: {0}")]
    Unavailable(String),
}

// ── Clock ─────────────────────────────────────────────────────────

/// Monotonic time since the engine started.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Wall clock backed by `Instant`.
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, now: Duration) {
        self.nanos.store(saturating_nanos(now), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let by = saturating_nanos(by);
        let _ = self
            .nanos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_add(by)));
    }
}

fn saturating_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

// ── Monitoring ────────────────────────────────────────────────────

/// Per-core execution statistics published by the monitoring subsystem.
pub trait MonitoringSource: Send + Sync {
    fn num_cores(&self) -> usize;

    fn is_core_online(&self, core: CoreId) -> bool;

    fn snapshot(&self, core: CoreId) -> Result<CoreSnapshot, SourceError>;
}

#[derive(Debug, Clone)]
struct MonitoredCore {
    online: bool,
    threads: Vec<ThreadSample>,
}

/// Monitoring source fed in-process.
#[derive(Debug)]
pub struct InMemoryMonitor {
    cores: RwLock<Vec<MonitoredCore>>,
}

impl InMemoryMonitor {
    /// A monitor with `num_cores` online cores and no threads.
    pub fn new(num_cores: usize) -> Self {
        let cores = vec![
            MonitoredCore {
                online: true,
                threads: Vec::new(),
            };
            num_cores
        ];
        Self {
            cores: RwLock::new(cores),
        }
    }

    /// Insert or replace the sample for `sample.name` on `core`.
    pub fn set_thread(&self, core: CoreId, sample: ThreadSample) {
        let mut cores = self.cores.write().unwrap_or_else(|e| e.into_inner());
        let Some(slot) = cores.get_mut(core) else {
            return;
        };
        match slot.threads.iter_mut().find(|t| t.name == sample.name) {
            Some(existing) => *existing = sample,
            None => slot.threads.push(sample),
        }
    }

    pub fn remove_thread(&self, core: CoreId, name: &str) {
        let mut cores = self.cores.write().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = cores.get_mut(core) {
            slot.threads.retain(|t| t.name != name);
        }
    }

    pub fn set_online(&self, core: CoreId, online: bool) {
        let mut cores = self.cores.write().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = cores.get_mut(core) {
            slot.online = online;
        }
    }
}

impl MonitoringSource for InMemoryMonitor {
    fn num_cores(&self) -> usize {
        self.cores.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn is_core_online(&self, core: CoreId) -> bool {
        self.cores
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(core)
            .is_some_and(|c| c.online)
    }

    fn snapshot(&self, core: CoreId) -> Result<CoreSnapshot, SourceError> {
        let cores = self.cores.read().unwrap_or_else(|e| e.into_inner());
        let slot = cores.get(core).ok_or(SourceError::NoSuchCore(core))?;
        Ok(CoreSnapshot {
            core,
            threads: slot.threads.clone(),
        })
    }
}

// ── Rip list ──────────────────────────────────────────────────────

/// Read side of the bounded completion log.
pub trait RipListSource: Send + Sync {
    /// Number of entries the log retains before overwriting the oldest.
    fn capacity(&self) -> usize;

    /// Copy of the retained entries with their absolute start position.
    fn snapshot(&self) -> RipWindow;

    /// Absolute position the producer writes next.
    fn write_position(&self) -> u64 {
        self.snapshot().write_position()
    }
}

#[derive(Debug, Default)]
struct RipRing {
    start: u64,
    entries: VecDeque<RipEntry>,
}

/// Bounded rip list fed in-process; the oldest entry is dropped when full.
#[derive(Debug)]
pub struct InMemoryRipList {
    capacity: usize,
    ring: RwLock<RipRing>,
}

impl InMemoryRipList {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ring: RwLock::new(RipRing::default()),
        }
    }

    /// Append a record, returning its absolute position.
    pub fn push(&self, entry: RipEntry) -> u64 {
        let mut ring = self.ring.write().unwrap_or_else(|e| e.into_inner());
        if self.capacity == 0 {
            ring.start += 1;
            return ring.start - 1;
        }
        if ring.entries.len() == self.capacity {
            ring.entries.pop_front();
            ring.start += 1;
        }
        ring.entries.push_back(entry);
        ring.start + ring.entries.len() as u64 - 1
    }
}

impl RipListSource for InMemoryRipList {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn snapshot(&self) -> RipWindow {
        let ring = self.ring.read().unwrap_or_else(|e| e.into_inner());
        RipWindow {
            start: ring.start,
            entries: ring.entries.iter().copied().collect(),
        }
    }

    fn write_position(&self) -> u64 {
        let ring = self.ring.read().unwrap_or_else(|e| e.into_inner());
        ring.start + ring.entries.len() as u64
    }
}

// ── Capability set ────────────────────────────────────────────────

/// Handles injected into the optimizer at construction.
#[derive(Clone)]
pub struct Capabilities {
    pub monitor: Arc<dyn MonitoringSource>,
    pub rip_list: Arc<dyn RipListSource>,
    pub clock: Arc<dyn Clock>,
    /// Transport used to re-enqueue migrated tasks. Without one, migrations
    /// only update the optimizer's own view.
    pub run_queue: Option<Arc<dyn RunQueue>>,
}

impl Capabilities {
    pub fn new(
        monitor: Arc<dyn MonitoringSource>,
        rip_list: Arc<dyn RipListSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            monitor,
            rip_list,
            clock,
            run_queue: None,
        }
    }

    pub fn with_run_queue(mut self, run_queue: Arc<dyn RunQueue>) -> Self {
        self.run_queue = Some(run_queue);
        self
    }
}
