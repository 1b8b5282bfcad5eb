//! Integration tests for sandbox-init
//!
//! These run the supervisor against real /bin/sh workloads. Signal
//! dispositions and the child set are process-wide, so every test holds the
//! same lock.

use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use sandbox_init::{InitError, InitSupervisor, ProcessStatus, SupervisorState, WorkloadSpec};

static INTEGRATION_TEST_LOCK: Mutex<()> = Mutex::new(());

/// A workload exiting normally has its code mirrored
#[test]
fn supervisor_mirrors_normal_exit_code() {
    let _lock = INTEGRATION_TEST_LOCK.lock();

    let spec = WorkloadSpec::new("/bin/sh").args(["-c", "exit 7"]);
    let mut supervisor = InitSupervisor::new();

    let code = supervisor.run(&spec).unwrap();

    assert_eq!(code, 7);
    assert_eq!(supervisor.state(), SupervisorState::WorkloadExited(7));
    assert_eq!(
        supervisor.primary().unwrap().status,
        ProcessStatus::Exited(7)
    );
}

/// A successful workload yields exit code zero
#[test]
fn supervisor_mirrors_success() {
    let _lock = INTEGRATION_TEST_LOCK.lock();

    let spec = WorkloadSpec::new("/bin/true");
    let mut supervisor = InitSupervisor::new();

    assert_eq!(supervisor.run(&spec).unwrap(), 0);
}

/// Death by signal maps to 128+N
#[test]
fn supervisor_mirrors_signal_death() {
    let _lock = INTEGRATION_TEST_LOCK.lock();

    let spec = WorkloadSpec::new("/bin/sh").args(["-c", "kill -KILL $$"]);
    let mut supervisor = InitSupervisor::new();

    let code = supervisor.run(&spec).unwrap();

    assert_eq!(code, 137);
    assert_eq!(
        supervisor.primary().unwrap().status,
        ProcessStatus::Signaled(Signal::SIGKILL)
    );
}

/// A still-running orphan does not wedge the loop or distort the exit code
#[test]
fn supervisor_ignores_outstanding_orphans() {
    let _lock = INTEGRATION_TEST_LOCK.lock();

    let spec = WorkloadSpec::new("/bin/sh").args(["-c", "sleep 1 & exit 3"]);
    let mut supervisor = InitSupervisor::new();

    assert_eq!(supervisor.run(&spec).unwrap(), 3);
}

/// Children exiting alongside the primary are all collected in the same cycle
#[test]
fn supervisor_drains_coalesced_exits() {
    let _lock = INTEGRATION_TEST_LOCK.lock();

    let spec = WorkloadSpec::new("/bin/sh").args(["-c", "true & true & exit 4"]);
    let mut supervisor = InitSupervisor::new();

    assert_eq!(supervisor.run(&spec).unwrap(), 4);
}

/// A terminal signal sent to the supervisor reaches the workload, whose
/// signal death then propagates as 128+SIGTERM
#[test]
fn supervisor_forwards_sigterm_to_workload() {
    let _lock = INTEGRATION_TEST_LOCK.lock();

    let spec = WorkloadSpec::new("/bin/sh").args(["-c", "sleep 5"]);
    let mut supervisor = InitSupervisor::new();
    supervisor.initialize().unwrap();
    supervisor.spawn(&spec).unwrap();

    let killer = thread::spawn(|| {
        thread::sleep(Duration::from_millis(300));
        kill(Pid::this(), Signal::SIGTERM).unwrap();
    });

    let code = supervisor.reap_loop().unwrap();
    killer.join().unwrap();

    assert_eq!(code, 143);
}

/// Spawn failure is fatal and the supervisor never tracks a workload
#[test]
fn supervisor_spawn_failure_is_fatal() {
    let _lock = INTEGRATION_TEST_LOCK.lock();

    let spec = WorkloadSpec::new("/does/not/exist");
    let mut supervisor = InitSupervisor::new();

    let err = supervisor.run(&spec).unwrap_err();

    assert!(matches!(err, InitError::Spawn(_)));
    assert_eq!(supervisor.state(), SupervisorState::Initialized);
    assert!(supervisor.primary().is_none());
}

/// A second spawn after the workload exited is rejected without touching
/// the recorded status
#[test]
fn supervisor_rejects_spawn_after_exit() {
    let _lock = INTEGRATION_TEST_LOCK.lock();

    let spec = WorkloadSpec::new("/bin/sh").args(["-c", "exit 4"]);
    let mut supervisor = InitSupervisor::new();
    assert_eq!(supervisor.run(&spec).unwrap(), 4);

    let err = supervisor.spawn(&spec).unwrap_err();

    assert!(matches!(err, InitError::InvalidState(_)));
    assert_eq!(supervisor.state(), SupervisorState::WorkloadExited(4));
}

/// The spec's environment is the workload's whole environment
#[test]
fn supervisor_passes_spec_environment() {
    let _lock = INTEGRATION_TEST_LOCK.lock();

    let spec = WorkloadSpec::new("/bin/sh")
        .args(["-c", "exit $WORKLOAD_CODE"])
        .env("WORKLOAD_CODE", "11");
    let mut supervisor = InitSupervisor::new();

    assert_eq!(supervisor.run(&spec).unwrap(), 11);
}

/// The workload starts in the requested working directory
#[test]
fn supervisor_applies_working_directory() {
    let _lock = INTEGRATION_TEST_LOCK.lock();

    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().canonicalize().unwrap();

    let spec = WorkloadSpec::new("/bin/sh")
        .args(["-c", r#"test "$(pwd)" = "$EXPECTED""#])
        .env("EXPECTED", dir.to_str().unwrap())
        .current_dir(dir.to_str().unwrap());
    let mut supervisor = InitSupervisor::new();

    assert_eq!(supervisor.run(&spec).unwrap(), 0);
}
