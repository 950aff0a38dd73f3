//! The scheduling gate and the poll loop.
//!
//! The `Optimizer` owns all task state behind one lock. The dispatch path
//! calls the gate (`add_task`, `scheduling_allowed`, `last_job_started`,
//! `change_core`, `set_goal`); the poll loop calls `tick` every
//! `query_intervall`. Both take the lock for their whole duration, so a
//! tick never sees a half-applied gate call and vice versa.
//!
//! Gate calls never fail: errors are logged and answered with `false`.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use rqsched_core::{CoreId, CoreSnapshot, DeathCause, GoalConfig, TaskDescriptor};

use crate::error::{OptError, OptResult};
use crate::rip_list::{self, JobEvent};
use crate::source::Capabilities;
use crate::state::{DeadlineMiss, EngineState};
use crate::strategy::{Migration, Strategy, strategy_for};
use crate::task::{EndedTask, OptimizationTask};

/// State guarded by the optimizer lock.
struct Engine {
    state: EngineState,
    goal: GoalConfig,
    strategy: Box<dyn Strategy>,
}

/// Handle to the running poll loop.
struct PollLoop {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// What one tick changed.
#[derive(Debug, Default)]
pub struct TickReport {
    pub advanced: Vec<(String, u32)>,
    pub ended: Vec<EndedTask>,
    pub missed: Vec<DeadlineMiss>,
    pub migrations: Vec<Migration>,
    pub resynced: Vec<String>,
    /// Measured busy share per core from the monitoring samples; `None` for
    /// offline or unsampled cores.
    pub busy_share: Vec<Option<f64>>,
    /// Wall time the tick spent holding the lock.
    pub elapsed: Duration,
}

impl TickReport {
    /// Whether anything changed besides bookkeeping.
    pub fn is_quiet(&self) -> bool {
        self.advanced.is_empty()
            && self.ended.is_empty()
            && self.missed.is_empty()
            && self.migrations.is_empty()
            && self.resynced.is_empty()
    }
}

pub struct Optimizer {
    caps: Capabilities,
    num_cores: usize,
    engine: Mutex<Engine>,
    poll_loop: Mutex<Option<PollLoop>>,
}

impl Optimizer {
    /// Create an optimizer over the given capabilities.
    ///
    /// Fails when the monitor reports no cores, the rip list cannot hold a
    /// single record, or the goal config is invalid: the engine cannot work
    /// without them.
    pub fn new(caps: Capabilities, goal: GoalConfig) -> OptResult<Self> {
        let num_cores = caps.monitor.num_cores();
        if num_cores == 0 {
            return Err(OptError::InvalidCapability(
                "monitor reports zero cores".to_string(),
            ));
        }
        if caps.rip_list.capacity() == 0 {
            return Err(OptError::InvalidCapability(
                "rip list has zero capacity".to_string(),
            ));
        }
        goal.validate()?;

        info!(num_cores, goal = ?goal.goal, "optimizer initialized");

        Ok(Self {
            num_cores,
            engine: Mutex::new(Engine {
                state: EngineState::new(num_cores),
                strategy: strategy_for(&goal),
                goal,
            }),
            poll_loop: Mutex::new(None),
            caps,
        })
    }

    pub fn num_cores(&self) -> usize {
        self.num_cores
    }

    /// Whether `core` has a run queue behind it. Without a transport every
    /// core counts as served.
    fn serves(&self, core: CoreId) -> bool {
        self.caps
            .run_queue
            .as_ref()
            .is_none_or(|rq| core < rq.num_rqs())
    }

    // ── Scheduling gate ─────────────────────────────────────────────

    /// Register a task enqueued on `core`.
    pub async fn add_task(&self, core: CoreId, descriptor: TaskDescriptor) -> bool {
        let now = self.caps.clock.now();
        let cursor = self.caps.rip_list.write_position();
        let name = descriptor.name.clone();

        let mut engine = self.engine.lock().await;
        match engine.state.add_task(core, descriptor, now, cursor) {
            Ok(()) => true,
            Err(e) => {
                error!(task = %name, core, error = %e, "add_task rejected");
                false
            }
        }
    }

    /// Whether the task's current job may start now. A `true` answer marks
    /// the job dispatched.
    pub async fn scheduling_allowed(&self, name: &str) -> bool {
        let now = self.caps.clock.now();
        let mut engine = self.engine.lock().await;
        let blocks_overloaded = engine.strategy.blocks_overloaded_start();

        let Some(core) = engine.state.task(name).map(|t| t.core) else {
            return false;
        };
        let overloaded = blocks_overloaded && engine.state.overload_at_core(core);

        let Some(task) = engine.state.task_mut(name) else {
            return false;
        };
        if now < task.arrival_time {
            return false;
        }
        if overloaded {
            debug!(task = %name, core, "start refused on overloaded core");
            return false;
        }

        task.newest_job.dispatched = true;
        task.to_schedule = false;
        true
    }

    /// Mark that the task's terminal job has started.
    pub async fn last_job_started(&self, name: &str) -> bool {
        let mut engine = self.engine.lock().await;
        match engine.state.task_mut(name) {
            Some(task) => {
                task.last_job_started = true;
                debug!(task = %name, foc_id = task.newest_job.foc_id, "last job started");
                true
            }
            None => false,
        }
    }

    /// Move a task to `new_core`.
    pub async fn change_core(&self, name: &str, new_core: CoreId) -> bool {
        if !self.serves(new_core) {
            debug!(task = %name, new_core, "change_core refused, no run queue on core");
            return false;
        }
        let mut engine = self.engine.lock().await;
        match engine.state.move_task(name, new_core) {
            Ok(old_core) => {
                info!(task = %name, from = old_core, to = new_core, "core changed");
                true
            }
            Err(e) => {
                debug!(task = %name, new_core, error = %e, "change_core refused");
                false
            }
        }
    }

    /// Take a task back out of the registry without an ended record, for
    /// callers undoing a registration they could not complete.
    pub async fn withdraw_task(&self, name: &str) -> bool {
        let mut engine = self.engine.lock().await;
        match engine.state.withdraw_task(name) {
            Ok(task) => {
                info!(task = %name, core = task.core, "task withdrawn");
                true
            }
            Err(e) => {
                debug!(task = %name, error = %e, "withdraw_task refused");
                false
            }
        }
    }

    /// Install a goal from a JSON payload. An invalid payload keeps the
    /// previous goal.
    pub async fn set_goal(&self, payload: &str) -> bool {
        let result = match GoalConfig::from_json(payload) {
            Ok(config) => self.apply_goal(config).await,
            Err(e) => Err(OptError::from(e)),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "set_goal rejected, keeping previous goal");
                false
            }
        }
    }

    /// Install a goal config. Task state carries over; only the strategy is
    /// replaced.
    pub async fn apply_goal(&self, config: GoalConfig) -> OptResult<()> {
        config.validate()?;
        let mut engine = self.engine.lock().await;
        engine.strategy = strategy_for(&config);
        info!(
            goal = ?config.goal,
            accept = config.accept,
            query_intervall_ms = config.query_intervall_ms,
            "optimization goal set"
        );
        engine.goal = config;
        Ok(())
    }

    pub async fn goal(&self) -> GoalConfig {
        self.engine.lock().await.goal.clone()
    }

    // ── Read accessors ──────────────────────────────────────────────

    pub async fn task(&self, name: &str) -> Option<OptimizationTask> {
        self.engine.lock().await.state.task(name).cloned()
    }

    pub async fn task_names(&self) -> Vec<String> {
        self.engine.lock().await.state.task_names()
    }

    pub async fn ended_task(&self, name: &str) -> Option<EndedTask> {
        self.engine.lock().await.state.ended_task(name).cloned()
    }

    pub async fn ended_tasks(&self) -> Vec<EndedTask> {
        self.engine.lock().await.state.ended_tasks().cloned().collect()
    }

    pub async fn overload_at_core(&self, core: CoreId) -> bool {
        self.engine.lock().await.state.overload_at_core(core)
    }

    pub async fn core_utilization(&self, core: CoreId) -> f64 {
        self.engine.lock().await.state.core_utilization(core)
    }

    pub async fn competitors(&self, core: CoreId) -> Vec<String> {
        self.engine
            .lock()
            .await
            .state
            .competitors()
            .residents(core)
            .map(str::to_string)
            .collect()
    }

    #[cfg(test)]
    pub(crate) async fn with_state<R>(&self, f: impl FnOnce(&mut EngineState) -> R) -> R {
        f(&mut self.engine.lock().await.state)
    }

    // ── Tick ────────────────────────────────────────────────────────

    /// Run one optimization pass: read the sources, advance job state,
    /// account deadlines, run the strategy and re-enqueue migrated tasks.
    pub async fn tick(&self) -> TickReport {
        let mut engine = self.engine.lock().await;
        let started = Instant::now();
        let mut report = TickReport::default();

        // One consistent copy of the external data for the whole tick.
        let now = self.caps.clock.now();
        let window = self.caps.rip_list.snapshot();
        let online: Vec<bool> = (0..self.num_cores)
            .map(|c| self.caps.monitor.is_core_online(c))
            .collect();
        let snapshots: Vec<Option<CoreSnapshot>> = (0..self.num_cores)
            .map(|c| {
                if !online[c] {
                    return None;
                }
                match self.caps.monitor.snapshot(c) {
                    Ok(snap) => Some(snap),
                    Err(e) => {
                        warn!(core = c, error = %e, "monitoring snapshot failed");
                        None
                    }
                }
            })
            .collect();

        // Migration targets must be online and backed by a run queue.
        let targets: Vec<bool> = online
            .iter()
            .enumerate()
            .map(|(c, &up)| up && self.serves(c))
            .collect();
        report.busy_share = snapshots
            .iter()
            .map(|snap| snap.as_ref().and_then(CoreSnapshot::busy_share))
            .collect();

        let Engine {
            state, strategy, ..
        } = &mut *engine;

        for task in state.tasks_mut() {
            let sample = snapshots
                .get(task.core)
                .and_then(Option::as_ref)
                .and_then(|snap| snap.thread(task.name()));
            if let Some(sample) = sample {
                task.current_job_exec = sample.execution_time;
            }
        }

        let mut terminal: Vec<(String, u32, DeathCause)> = Vec::new();
        for task in state.tasks_mut() {
            match rip_list::analyze(task, &window) {
                JobEvent::Pending => {}
                JobEvent::Advanced { jobs } => report.advanced.push((task.name().to_string(), jobs)),
                JobEvent::Terminal { foc_id, cause } => {
                    terminal.push((task.name().to_string(), foc_id, cause))
                }
                JobEvent::Resynced => report.resynced.push(task.name().to_string()),
            }
        }
        for (name, foc_id, cause) in terminal {
            match state.remove_task(&name, foc_id, cause) {
                Ok(ended) => report.ended.push(ended),
                Err(e) => error!(task = %name, error = %e, "failed to remove ended task"),
            }
        }

        for name in state.task_names() {
            if let Some(miss) = state.job_reached_deadline(&name, now) {
                report.missed.push(miss);
            }
        }

        for task in state.tasks_mut() {
            task.to_schedule = !task.newest_job.dispatched && now >= task.arrival_time;
            task.utilization = task.demand();
        }

        for (core, share) in report.busy_share.iter().enumerate() {
            if let Some(share) = share {
                debug!(
                    core,
                    busy_share = *share,
                    utilization = state.core_utilization(core),
                    "core load"
                );
            }
        }

        report.migrations = strategy.optimize(state, &targets);
        if let Some(rq) = &self.caps.run_queue {
            for migration in &report.migrations {
                let Some(task) = state.task(&migration.task) else {
                    continue;
                };
                if let Err(e) = rq.enqueue(migration.to, &task.descriptor) {
                    warn!(
                        task = %migration.task,
                        core = migration.to,
                        error = %e,
                        "failed to enqueue migrated task"
                    );
                }
            }
        }

        report.elapsed = started.elapsed();
        if !report.is_quiet() {
            debug!(
                advanced = report.advanced.len(),
                ended = report.ended.len(),
                missed = report.missed.len(),
                migrations = report.migrations.len(),
                elapsed_us = report.elapsed.as_micros() as u64,
                "tick"
            );
        }
        report
    }

    // ── Poll loop ───────────────────────────────────────────────────

    /// Start the poll loop. Returns `false` if it is already running.
    pub async fn start_optimizing(self: &Arc<Self>) -> bool {
        let mut poll_loop = self.poll_loop.lock().await;
        if poll_loop.as_ref().is_some_and(|l| !l.handle.is_finished()) {
            debug!("poll loop already running");
            return false;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_poll_loop(Arc::downgrade(self), shutdown_rx));
        *poll_loop = Some(PollLoop {
            handle,
            shutdown_tx,
        });
        true
    }

    /// Stop the poll loop and wait for it to finish its current tick.
    pub async fn stop_optimizing(&self) {
        let Some(poll_loop) = self.poll_loop.lock().await.take() else {
            return;
        };
        let _ = poll_loop.shutdown_tx.send(true);
        if let Err(e) = poll_loop.handle.await {
            error!(error = %e, "poll loop terminated abnormally");
        }
    }

    pub async fn is_optimizing(&self) -> bool {
        self.poll_loop
            .lock()
            .await
            .as_ref()
            .is_some_and(|l| !l.handle.is_finished())
    }
}

/// The poll loop. Holds only a weak reference so dropping the optimizer
/// ends the loop.
async fn run_poll_loop(optimizer: Weak<Optimizer>, mut shutdown: watch::Receiver<bool>) {
    info!("poll loop started");

    loop {
        let Some(interval) = upgrade_interval(&optimizer).await else {
            break;
        };

        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let Some(opt) = optimizer.upgrade() else { break };
                let report = opt.tick().await;
                if report.elapsed > interval {
                    warn!(
                        elapsed_ms = report.elapsed.as_millis() as u64,
                        interval_ms = interval.as_millis() as u64,
                        "tick overran query interval"
                    );
                }
            }
            _ = shutdown.changed() => {
                break;
            }
        }
    }

    info!("poll loop stopped");
}

async fn upgrade_interval(optimizer: &Weak<Optimizer>) -> Option<Duration> {
    let opt = optimizer.upgrade()?;
    let interval = opt.goal().await.query_intervall();
    Some(interval)
}

#[cfg(test)]
mod tests {
    use super::*;

    use rqsched_core::{Goal, RipEntry, ThreadSample};

    use crate::source::{InMemoryMonitor, InMemoryRipList, ManualClock};

    struct Harness {
        monitor: Arc<InMemoryMonitor>,
        rip: Arc<InMemoryRipList>,
        clock: Arc<ManualClock>,
        opt: Arc<Optimizer>,
    }

    fn harness(num_cores: usize, goal: Goal) -> Harness {
        let monitor = Arc::new(InMemoryMonitor::new(num_cores));
        let rip = Arc::new(InMemoryRipList::new(16));
        let clock = Arc::new(ManualClock::new());
        let caps = Capabilities::new(monitor.clone(), rip.clone(), clock.clone());
        let config = GoalConfig {
            goal,
            accept: 5,
            query_intervall_ms: 10,
        };
        let opt = Arc::new(Optimizer::new(caps, config).unwrap());
        Harness {
            monitor,
            rip,
            clock,
            opt,
        }
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn t1() -> TaskDescriptor {
        TaskDescriptor::periodic("T1", 10, ms(100), ms(50))
    }

    fn finished(foc_id: u32, at: u64) -> RipEntry {
        RipEntry {
            foc_id,
            death_time: ms(at),
            cause: DeathCause::Finished,
        }
    }

    #[test]
    fn zero_cores_is_invalid_capability() {
        let caps = Capabilities::new(
            Arc::new(InMemoryMonitor::new(0)),
            Arc::new(InMemoryRipList::new(4)),
            Arc::new(ManualClock::new()),
        );
        assert!(matches!(
            Optimizer::new(caps, GoalConfig::default()),
            Err(OptError::InvalidCapability(_))
        ));
    }

    #[test]
    fn zero_capacity_rip_list_is_invalid_capability() {
        let caps = Capabilities::new(
            Arc::new(InMemoryMonitor::new(2)),
            Arc::new(InMemoryRipList::new(0)),
            Arc::new(ManualClock::new()),
        );
        assert!(matches!(
            Optimizer::new(caps, GoalConfig::default()),
            Err(OptError::InvalidCapability(_))
        ));
    }

    #[tokio::test]
    async fn unknown_names_are_refused() {
        let h = harness(4, Goal::None);
        assert!(!h.opt.scheduling_allowed("ghost").await);
        assert!(!h.opt.last_job_started("ghost").await);
        assert!(!h.opt.change_core("ghost", 1).await);
    }

    #[tokio::test]
    async fn t1_scenario() {
        let h = harness(4, Goal::None);
        assert!(h.opt.add_task(0, t1()).await);
        assert!(h.opt.scheduling_allowed("T1").await);

        h.clock.set(ms(30));
        h.rip.push(finished(10, 30));
        let report = h.opt.tick().await;
        assert_eq!(report.advanced, vec![("T1".to_string(), 1)]);

        let task = h.opt.task("T1").await.unwrap();
        assert_eq!(task.newest_job.arrival_time, ms(100));
        assert_eq!(task.newest_job.foc_id, 11);
        assert!(!h.opt.scheduling_allowed("T1").await);

        h.clock.set(ms(100));
        assert!(h.opt.scheduling_allowed("T1").await);
    }

    #[tokio::test]
    async fn duplicate_add_is_rejected_without_change() {
        let h = harness(4, Goal::None);
        assert!(h.opt.add_task(0, t1()).await);
        assert!(!h.opt.add_task(2, t1()).await);
        assert_eq!(h.opt.task("T1").await.unwrap().core, 0);
        assert!(!h.opt.add_task(7, TaskDescriptor::periodic("T2", 1, ms(10), ms(10))).await);
        assert!(h.opt.task("T2").await.is_none());
    }

    #[tokio::test]
    async fn change_core_to_invalid_core_is_refused() {
        let h = harness(4, Goal::None);
        h.opt.add_task(0, t1()).await;
        assert!(!h.opt.change_core("T1", 99).await);
        assert!(!h.opt.change_core("T1", 0).await);
        assert_eq!(h.opt.task("T1").await.unwrap().core, 0);

        assert!(h.opt.change_core("T1", 3).await);
        assert_eq!(h.opt.task("T1").await.unwrap().core, 3);
        assert_eq!(h.opt.competitors(3).await, vec!["T1".to_string()]);
        assert!(h.opt.competitors(0).await.is_empty());
    }

    #[tokio::test]
    async fn last_job_completion_ends_task() {
        let h = harness(2, Goal::None);
        h.opt.add_task(0, t1()).await;
        assert!(h.opt.scheduling_allowed("T1").await);
        assert!(h.opt.last_job_started("T1").await);

        h.rip.push(finished(10, 20));
        let report = h.opt.tick().await;
        assert_eq!(report.ended.len(), 1);

        assert!(h.opt.task("T1").await.is_none());
        let ended = h.opt.ended_task("T1").await.unwrap();
        assert_eq!(ended.last_foc_id, 10);
        assert_eq!(ended.cause_of_death, DeathCause::Finished);
        assert!(!h.opt.scheduling_allowed("T1").await);
        assert_eq!(h.opt.ended_tasks().await.len(), 1);
    }

    #[tokio::test]
    async fn killed_record_ends_task() {
        let h = harness(2, Goal::None);
        h.opt.add_task(1, t1()).await;
        h.rip.push(RipEntry {
            foc_id: 10,
            death_time: ms(5),
            cause: DeathCause::Killed,
        });
        h.opt.tick().await;

        let ended = h.opt.ended_task("T1").await.unwrap();
        assert_eq!(ended.cause_of_death, DeathCause::Killed);
        assert!(h.opt.competitors(1).await.is_empty());
    }

    #[tokio::test]
    async fn records_before_registration_are_ignored() {
        let h = harness(2, Goal::None);
        h.rip.push(finished(10, 0));
        h.opt.add_task(0, t1()).await;
        let report = h.opt.tick().await;
        assert!(report.advanced.is_empty());
        assert_eq!(h.opt.task("T1").await.unwrap().newest_job.foc_id, 10);
    }

    #[tokio::test]
    async fn repeated_ticks_over_same_log_are_idempotent() {
        let h = harness(2, Goal::None);
        h.opt.add_task(0, t1()).await;
        h.opt.scheduling_allowed("T1").await;
        h.rip.push(finished(10, 20));

        h.clock.set(ms(20));
        h.opt.tick().await;
        let first = h.opt.task("T1").await.unwrap();

        let report = h.opt.tick().await;
        let second = h.opt.task("T1").await.unwrap();
        assert!(report.is_quiet());
        assert_eq!(first.newest_job, second.newest_job);
        assert_eq!(first.cursor(), second.cursor());
    }

    #[tokio::test]
    async fn arrival_time_never_decreases() {
        let h = harness(2, Goal::None);
        h.opt.add_task(0, t1()).await;

        let mut last = Duration::ZERO;
        for step in 0..10u64 {
            h.clock.set(ms(step * 37));
            if step % 3 == 0 {
                h.opt.scheduling_allowed("T1").await;
                let foc_id = h.opt.task("T1").await.unwrap().newest_job.foc_id;
                h.rip.push(finished(foc_id, step * 37));
            }
            h.opt.tick().await;
            let arrival = h.opt.task("T1").await.unwrap().newest_job.arrival_time;
            assert!(arrival >= last);
            last = arrival;
        }
    }

    #[tokio::test]
    async fn undispatched_job_misses_deadline() {
        let h = harness(1, Goal::None);
        h.opt.add_task(0, t1()).await;

        h.clock.set(ms(60));
        let report = h.opt.tick().await;
        assert_eq!(report.missed.len(), 1);

        let task = h.opt.task("T1").await.unwrap();
        assert_eq!(task.missed_deadlines, 1);
        assert_eq!(task.arrival_time, ms(100));
        assert!(!h.opt.scheduling_allowed("T1").await);
    }

    #[tokio::test]
    async fn monitoring_samples_feed_execution_time() {
        let h = harness(1, Goal::None);
        h.opt.add_task(0, t1()).await;
        h.opt.scheduling_allowed("T1").await;
        h.monitor.set_thread(
            0,
            ThreadSample {
                name: "T1".to_string(),
                execution_time: ms(12),
                idle_time: Duration::ZERO,
            },
        );
        h.opt.tick().await;
        assert_eq!(h.opt.task("T1").await.unwrap().current_job_exec, ms(12));

        h.rip.push(finished(10, 15));
        h.opt.tick().await;
        let task = h.opt.task("T1").await.unwrap();
        assert_eq!(task.execution_time, ms(12));
        assert_eq!(task.last_job_exec, Some(ms(12)));
    }

    #[tokio::test]
    async fn utilization_overload_blocks_start() {
        let h = harness(1, Goal::Utilization);
        h.opt
            .add_task(0, TaskDescriptor::periodic("a", 1, ms(100), ms(100)).with_wcet(ms(70)))
            .await;
        h.opt
            .add_task(0, TaskDescriptor::periodic("b", 50, ms(100), ms(100)).with_wcet(ms(70)))
            .await;

        h.opt.tick().await;
        assert!(h.opt.overload_at_core(0).await);
        assert!((h.opt.core_utilization(0).await - 1.4).abs() < 1e-9);
        assert!(!h.opt.scheduling_allowed("a").await);
        assert!(!h.opt.scheduling_allowed("b").await);
    }

    #[tokio::test]
    async fn fairness_overload_does_not_block_start() {
        let h = harness(1, Goal::Fairness);
        h.opt
            .add_task(0, TaskDescriptor::periodic("a", 1, ms(100), ms(100)).with_wcet(ms(70)))
            .await;
        h.opt
            .add_task(0, TaskDescriptor::periodic("b", 50, ms(100), ms(100)).with_wcet(ms(70)))
            .await;
        h.opt.tick().await;
        assert!(!h.opt.overload_at_core(0).await);
        assert!(h.opt.scheduling_allowed("a").await);
    }

    #[tokio::test]
    async fn fairness_scenario_moves_lower_value_to_least_loaded_core() {
        let h = harness(4, Goal::Fairness);
        h.opt.add_task(0, TaskDescriptor::periodic("A", 1, ms(100), ms(100))).await;
        h.opt.add_task(0, TaskDescriptor::periodic("B", 50, ms(100), ms(100))).await;
        h.opt.add_task(1, TaskDescriptor::periodic("C", 90, ms(100), ms(100))).await;
        h.opt
            .with_state(|state| {
                state.task_mut("A").unwrap().value[0] = 12;
                state.task_mut("B").unwrap().value[0] = 3;
            })
            .await;

        let report = h.opt.tick().await;
        assert_eq!(
            report.migrations,
            vec![Migration {
                task: "B".to_string(),
                from: 0,
                to: 2,
            }]
        );
        assert_eq!(h.opt.task("B").await.unwrap().core, 2);
        assert_eq!(h.opt.task("A").await.unwrap().core, 0);
    }

    #[tokio::test]
    async fn set_goal_keeps_previous_on_bad_payload() {
        let h = harness(2, Goal::None);
        assert!(h.opt.set_goal(r#"{"goal":"fairness","accept":2,"query_intervall_ms":5}"#).await);
        assert_eq!(h.opt.goal().await.goal, Goal::Fairness);

        assert!(!h.opt.set_goal(r#"{"goal":"balanced"}"#).await);
        assert!(!h.opt.set_goal(r#"{"goal":"utilization","query_intervall_ms":0}"#).await);
        let goal = h.opt.goal().await;
        assert_eq!(goal.goal, Goal::Fairness);
        assert_eq!(goal.accept, 2);
    }

    #[tokio::test]
    async fn offline_core_samples_are_skipped() {
        let h = harness(2, Goal::None);
        h.opt.add_task(1, t1()).await;
        h.monitor.set_thread(
            1,
            ThreadSample {
                name: "T1".to_string(),
                execution_time: ms(9),
                idle_time: Duration::ZERO,
            },
        );
        h.monitor.set_online(1, false);
        h.opt.tick().await;
        assert_eq!(h.opt.task("T1").await.unwrap().current_job_exec, Duration::ZERO);
    }

    #[tokio::test]
    async fn wrapped_log_resyncs_cursor() {
        let h = harness(1, Goal::None);
        h.opt.add_task(0, t1()).await;
        // Overflow the 16-entry ring with unrelated records.
        for i in 0..20 {
            h.rip.push(finished(500 + i, 1));
        }
        let report = h.opt.tick().await;
        assert_eq!(report.resynced, vec!["T1".to_string()]);
        assert_eq!(h.opt.task("T1").await.unwrap().cursor(), 20);
    }

    struct RecordingQueue {
        num_rqs: usize,
        enqueued: std::sync::Mutex<Vec<(CoreId, String)>>,
    }

    impl rqsched_core::RunQueue for RecordingQueue {
        fn num_rqs(&self) -> usize {
            self.num_rqs
        }

        fn enqueue(
            &self,
            core: CoreId,
            task: &TaskDescriptor,
        ) -> Result<(), rqsched_core::EnqueueError> {
            if core >= self.num_rqs {
                return Err(rqsched_core::EnqueueError::NoSuchQueue(core));
            }
            self.enqueued.lock().unwrap().push((core, task.name.clone()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn cores_without_run_queue_are_never_targets() {
        let queue = Arc::new(RecordingQueue {
            num_rqs: 2,
            enqueued: std::sync::Mutex::new(Vec::new()),
        });
        let caps = Capabilities::new(
            Arc::new(InMemoryMonitor::new(4)),
            Arc::new(InMemoryRipList::new(16)),
            Arc::new(ManualClock::new()),
        )
        .with_run_queue(queue.clone());
        let config = GoalConfig {
            goal: Goal::Utilization,
            ..GoalConfig::default()
        };
        let opt = Optimizer::new(caps, config).unwrap();

        let heavy = |name| TaskDescriptor::periodic(name, 1, ms(100), ms(100)).with_wcet(ms(60));
        opt.add_task(0, heavy("a")).await;
        opt.add_task(0, heavy("b")).await;
        opt.add_task(1, TaskDescriptor::periodic("c", 1, ms(100), ms(100)).with_wcet(ms(10)))
            .await;

        assert!(!opt.change_core("c", 2).await);
        assert_eq!(opt.task("c").await.unwrap().core, 1);

        let report = opt.tick().await;
        assert_eq!(
            report.migrations,
            vec![Migration {
                task: "a".to_string(),
                from: 0,
                to: 1,
            }]
        );
        assert_eq!(*queue.enqueued.lock().unwrap(), vec![(1, "a".to_string())]);
        assert!(opt.competitors(2).await.is_empty());
        assert!(opt.competitors(3).await.is_empty());
    }

    #[tokio::test]
    async fn tick_reports_measured_busy_share() {
        let h = harness(2, Goal::None);
        h.monitor.set_thread(
            0,
            ThreadSample {
                name: "T1".to_string(),
                execution_time: ms(30),
                idle_time: ms(70),
            },
        );
        let report = h.opt.tick().await;
        assert_eq!(report.busy_share.len(), 2);
        assert!((report.busy_share[0].unwrap() - 0.3).abs() < 1e-9);
        assert_eq!(report.busy_share[1], None);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_loop_ticks_and_stops() {
        let h = harness(1, Goal::None);
        h.opt.add_task(0, t1()).await;
        h.opt.scheduling_allowed("T1").await;
        h.rip.push(finished(10, 5));

        assert!(h.opt.start_optimizing().await);
        assert!(!h.opt.start_optimizing().await);
        assert!(h.opt.is_optimizing().await);

        tokio::time::sleep(ms(25)).await;
        assert_eq!(h.opt.task("T1").await.unwrap().newest_job.foc_id, 11);

        h.opt.stop_optimizing().await;
        assert!(!h.opt.is_optimizing().await);

        // Restartable after a stop.
        assert!(h.opt.start_optimizing().await);
        h.opt.stop_optimizing().await;
    }
}
