//! Init supervisor: lifecycle state machine and reap loop

use log::{debug, info, warn};
use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::errors::{InitError, Result};
use crate::signals::Notification;
use crate::supervision::backend::{ProcessBackend, Reaped, UnixProcessBackend};
use crate::utils;
use crate::workload::{ProcessRecord, ProcessStatus, WorkloadSpec};

/// Exit code for supervisor-level failures before the workload could be
/// supervised (signal setup or spawn)
pub const SUPERVISOR_FAILURE_CODE: i32 = 1;

/// Supervisor lifecycle. No transition goes backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    Initialized,
    WorkloadRunning,
    WorkloadExited(i32),
}

/// PID-1 supervisor for a single workload.
///
/// Owns all bookkeeping; the only blocking point is the backend's
/// notification wait, and all reaping is non-blocking polls drained to
/// exhaustion, so a single control flow covers signal handling and reap
/// bookkeeping without races.
pub struct InitSupervisor<B: ProcessBackend> {
    backend: B,
    state: SupervisorState,
    primary: Option<ProcessRecord>,
}

impl InitSupervisor<UnixProcessBackend> {
    /// Supervisor over the real process backend
    pub fn new() -> Self {
        Self::with_backend(UnixProcessBackend::new())
    }
}

impl Default for InitSupervisor<UnixProcessBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: ProcessBackend> InitSupervisor<B> {
    /// Supervisor over a caller-provided backend
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend,
            state: SupervisorState::NotStarted,
            primary: None,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Bookkeeping for the primary workload, once spawned
    pub fn primary(&self) -> Option<&ProcessRecord> {
        self.primary.as_ref()
    }

    /// Install signal handling. Failure is unrecoverable: without SIGCHLD
    /// delivery the process table would leak zombies.
    pub fn initialize(&mut self) -> Result<()> {
        if self.state != SupervisorState::NotStarted {
            return Err(InitError::InvalidState(format!(
                "initialize called in state {:?}",
                self.state
            )));
        }

        self.backend.install_notifier()?;
        debug!(
            "init supervisor ready (pid={}, uid={}, gid={}, cwd={})",
            utils::get_pid(),
            utils::get_uid(),
            utils::get_gid(),
            utils::current_dir_lossy()
        );
        self.state = SupervisorState::Initialized;
        Ok(())
    }

    /// Launch the primary workload. Only valid once, from `Initialized`.
    pub fn spawn(&mut self, spec: &WorkloadSpec) -> Result<ProcessRecord> {
        match self.state {
            SupervisorState::Initialized => {}
            SupervisorState::NotStarted => {
                return Err(InitError::InvalidState(
                    "spawn before initialize".to_string(),
                ))
            }
            SupervisorState::WorkloadRunning => {
                return Err(InitError::InvalidState(
                    "workload already running".to_string(),
                ))
            }
            SupervisorState::WorkloadExited(_) => {
                return Err(InitError::InvalidState(
                    "workload already exited".to_string(),
                ))
            }
        }

        let pid = self.backend.spawn(spec)?;
        let record = ProcessRecord::running(pid);
        self.primary = Some(record);
        self.state = SupervisorState::WorkloadRunning;
        info!("workload {} running (pid {})", spec.program, pid);
        Ok(record)
    }

    /// Block on notifications until the primary workload's exit is recorded,
    /// reaping every exited child along the way. Returns the exit code to
    /// mirror.
    pub fn reap_loop(&mut self) -> Result<i32> {
        loop {
            match self.state {
                SupervisorState::WorkloadExited(code) => return Ok(code),
                SupervisorState::WorkloadRunning => {}
                other => {
                    return Err(InitError::InvalidState(format!(
                        "reap loop entered in state {:?}",
                        other
                    )))
                }
            }

            match self.backend.wait_notification()? {
                Notification::ChildEvent => self.drain_exited(),
                Notification::Terminal(signal) => self.forward_signal(signal),
            }
        }
    }

    /// Re-send a terminal signal to the workload's process group so
    /// terminal-initiated signals reach the workload instead of being
    /// absorbed here.
    pub fn forward_signal(&mut self, signal: Signal) {
        let record = match self.primary {
            Some(record) if record.status == ProcessStatus::Running => record,
            _ => return,
        };

        info!(
            "forwarding {} to workload process group {}",
            signal, record.pid
        );
        if let Err(e) = self.backend.signal_group(record.pid, signal) {
            warn!("failed to forward {}: {}", signal, e);
        }
    }

    /// initialize + spawn + reap loop. The returned code is the workload's
    /// exit code, or 128+N if it died by signal N.
    pub fn run(&mut self, spec: &WorkloadSpec) -> Result<i32> {
        self.initialize()?;
        self.spawn(spec)?;
        self.reap_loop()
    }

    // Signals coalesce, so one notification may cover many exits: poll until
    // no exited child remains.
    fn drain_exited(&mut self) {
        loop {
            match self.backend.try_reap() {
                Ok(Reaped::Child { pid, status }) => self.record_exit(pid, status),
                Ok(Reaped::None) => break,
                Err(e) => {
                    warn!("reap failed: {}", e);
                    break;
                }
            }
        }
    }

    fn record_exit(&mut self, pid: Pid, status: ProcessStatus) {
        match self.primary {
            Some(ref mut record) if record.pid == pid => {
                record.status = status;
                if let Some(code) = status.exit_code() {
                    info!("workload {:?}, mirroring exit code {}", status, code);
                    self.state = SupervisorState::WorkloadExited(code);
                }
            }
            _ => debug!("reaped orphan process {}", pid),
        }
    }
}
