//! Controller integration tests.
//!
//! Drives the daemon assembly end to end: config file → allocation → rip-list
//! driven job progress → strategy migrations → shutdown.

use std::io::Write;
use std::time::Duration;

use rqsched_controller::{ControllerError, DEFAULT_NUM_PCORES, Daemon, host_cores};
use rqsched_core::{ControllerConfig, DeathCause, RipEntry};
use rqsched_opt::OptError;

fn write_config(body: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(body.as_bytes()).unwrap();
    file
}

fn load(body: &str) -> ControllerConfig {
    let file = write_config(body);
    ControllerConfig::from_file(file.path()).unwrap()
}

const TWO_CORE_UTILIZATION: &str = r#"
[controller]
num_pcores = 2
num_rqs = 2

[goal]
goal = "utilization"
query_intervall_ms = 10

[[tasks]]
name = "a"
foc_id = 100
inter_arrival_ms = 100
deadline_ms = 100
wcet_ms = 60

[[tasks]]
name = "b"
foc_id = 200
inter_arrival_ms = 100
deadline_ms = 100
wcet_ms = 30
"#;

fn rip(foc_id: u32, cause: DeathCause) -> RipEntry {
    RipEntry {
        foc_id,
        death_time: Duration::from_millis(1),
        cause,
    }
}

#[tokio::test]
async fn configured_tasks_are_spread_over_cores() {
    let config = load(TWO_CORE_UTILIZATION);
    let daemon = Daemon::from_config(&config).unwrap();

    assert_eq!(daemon.allocate_configured(&config).await, 2);
    assert_eq!(daemon.optimizer().task("a").await.unwrap().core, 0);
    assert_eq!(daemon.optimizer().task("b").await.unwrap().core, 1);
    assert_eq!(daemon.run_queues.queued_names(0), vec!["a"]);
    assert_eq!(daemon.run_queues.queued_names(1), vec!["b"]);
    assert!(daemon.controller.get_unused_cores().is_empty());
}

#[tokio::test]
async fn overloaded_core_sheds_task_into_other_run_queue() {
    let config = load(TWO_CORE_UTILIZATION);
    let daemon = Daemon::from_config(&config).unwrap();
    daemon.allocate_configured(&config).await;
    let opt = daemon.optimizer();

    let extra = rqsched_core::TaskDescriptor::periodic(
        "c",
        300,
        Duration::from_millis(100),
        Duration::from_millis(100),
    )
    .with_wcet(Duration::from_millis(30));
    assert_eq!(daemon.controller.allocate_task(extra).await.unwrap(), 1);

    assert!(opt.change_core("b", 0).await);
    assert!(opt.change_core("c", 0).await);
    assert!((opt.core_utilization(0).await - 1.2).abs() < 1e-9);

    let report = opt.tick().await;
    assert_eq!(report.migrations.len(), 1);
    assert_eq!(report.migrations[0].task, "b");
    assert_eq!(report.migrations[0].to, 1);

    assert!(!opt.overload_at_core(0).await);
    assert_eq!(
        daemon.run_queues.queued_names(1).last().map(String::as_str),
        Some("b")
    );
}

#[tokio::test]
async fn migrations_stay_on_queue_backed_cores() {
    let config = load(
        r#"
[controller]
num_pcores = 4
num_rqs = 2

[goal]
goal = "utilization"

[[tasks]]
name = "a"
foc_id = 1
inter_arrival_ms = 100
deadline_ms = 100
wcet_ms = 60

[[tasks]]
name = "b"
foc_id = 2
inter_arrival_ms = 100
deadline_ms = 100
wcet_ms = 60

[[tasks]]
name = "c"
foc_id = 3
inter_arrival_ms = 100
deadline_ms = 100
wcet_ms = 10
"#,
    );
    let daemon = Daemon::from_config(&config).unwrap();
    assert_eq!(daemon.allocate_configured(&config).await, 3);
    let opt = daemon.optimizer();
    let unused: Vec<usize> = daemon.controller.get_unused_cores().iter().map(|p| p.id).collect();
    assert_eq!(unused, vec![2, 3]);

    assert!(opt.change_core("b", 0).await);
    assert!(opt.change_core("c", 1).await);
    assert!(!opt.change_core("c", 2).await);

    let report = opt.tick().await;
    assert_eq!(report.migrations.len(), 1);
    assert_eq!(report.migrations[0].task, "a");
    assert_eq!(report.migrations[0].to, 1);
    assert_eq!(opt.task("a").await.unwrap().core, 1);
    assert_eq!(
        daemon.run_queues.queued_names(1).last().map(String::as_str),
        Some("a")
    );
    assert!(opt.competitors(2).await.is_empty());
    assert!(opt.competitors(3).await.is_empty());
}

#[test]
fn core_count_falls_back_to_host_probe() {
    let config = load(
        r#"
[controller]
num_rqs = 1
"#,
    );
    let daemon = Daemon::from_config(&config).unwrap();
    let expected = match host_cores() {
        0 => DEFAULT_NUM_PCORES,
        n => n,
    };
    assert_eq!(daemon.controller.pcores().len(), expected);
    assert_eq!(daemon.optimizer().num_cores(), expected);
}

#[tokio::test]
async fn rip_list_drives_task_to_the_ended_log() {
    let config = load(TWO_CORE_UTILIZATION);
    let daemon = Daemon::from_config(&config).unwrap();
    daemon.allocate_configured(&config).await;
    let opt = daemon.optimizer();

    assert!(opt.scheduling_allowed("a").await);
    daemon.rip_list.push(rip(100, DeathCause::Finished));
    opt.tick().await;
    assert_eq!(opt.task("a").await.unwrap().newest_job.foc_id, 101);

    daemon.rip_list.push(rip(200, DeathCause::Killed));
    opt.tick().await;

    assert!(opt.task("b").await.is_none());
    let ended = opt.ended_task("b").await.unwrap();
    assert_eq!(ended.last_foc_id, 200);
    assert_eq!(ended.cause_of_death, DeathCause::Killed);
    assert!(!opt.scheduling_allowed("b").await);
    assert_eq!(opt.task_names().await, vec!["a"]);
}

#[tokio::test]
async fn poll_loop_runs_until_shutdown() {
    let config = load(TWO_CORE_UTILIZATION);
    let daemon = Daemon::from_config(&config).unwrap();
    daemon.allocate_configured(&config).await;

    assert!(daemon.optimizer().start_optimizing().await);
    daemon.optimizer().last_job_started("a").await;
    daemon.rip_list.push(rip(100, DeathCause::Finished));

    tokio::time::sleep(Duration::from_millis(100)).await;

    let ended = daemon.shutdown().await;
    assert!(!daemon.optimizer().is_optimizing().await);
    assert_eq!(ended.len(), 1);
    assert_eq!(ended[0].name, "a");
    assert_eq!(ended[0].cause_of_death, DeathCause::Finished);
}

#[tokio::test]
async fn set_goal_switches_strategy_at_runtime() {
    let config = load(TWO_CORE_UTILIZATION);
    let daemon = Daemon::from_config(&config).unwrap();
    let opt = daemon.optimizer();

    assert!(opt.set_goal(r#"{"goal":"fairness","accept":3}"#).await);
    let goal = opt.goal().await;
    assert_eq!(goal.accept, 3);
    assert_eq!(goal.query_intervall_ms, 1000);

    assert!(!opt.set_goal("not json").await);
    assert_eq!(opt.goal().await, goal);
}

#[test]
fn zero_rip_list_capacity_fails_startup() {
    let config = load(
        r#"
[controller]
num_rqs = 1
rip_list_capacity = 0
"#,
    );
    assert!(matches!(
        Daemon::from_config(&config),
        Err(ControllerError::Optimizer(OptError::InvalidCapability(_)))
    ));
}

#[test]
fn invalid_config_is_rejected_on_load() {
    let file = write_config(
        r#"
[controller]
num_rqs = 1

[goal]
goal = "none"
query_intervall_ms = 0
"#,
    );
    assert!(ControllerConfig::from_file(file.path()).is_err());
}
