//! Process backend: the supervisor's view of the OS

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;

use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::prctl;
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{chdir, execve, fork, setpgid, ForkResult, Pid};

use crate::errors::{InitError, Result};
use crate::signals::{self, Notification, SignalNotifier};
use crate::utils;
use crate::workload::{ProcessStatus, WorkloadSpec};

/// Outcome of one non-blocking reap poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaped {
    /// A child was collected
    Child { pid: Pid, status: ProcessStatus },
    /// No exited children remain right now
    None,
}

/// OS operations the supervisor depends on.
///
/// Implemented for real by [`UnixProcessBackend`]; tests drive the
/// supervisor through a scripted implementation instead.
pub trait ProcessBackend {
    /// Install signal handling; must precede any other operation
    fn install_notifier(&mut self) -> Result<()>;

    /// Block until the next signal notification
    fn wait_notification(&mut self) -> Result<Notification>;

    /// Create the workload process, placed in its own process group
    fn spawn(&mut self, spec: &WorkloadSpec) -> Result<Pid>;

    /// One non-blocking poll for any exited child
    fn try_reap(&mut self) -> Result<Reaped>;

    /// Deliver `signal` to the process group led by `pid`
    fn signal_group(&mut self, pid: Pid, signal: Signal) -> Result<()>;
}

/// Real backend on top of fork/execve/waitpid
#[derive(Default)]
pub struct UnixProcessBackend {
    notifier: Option<SignalNotifier>,
}

impl UnixProcessBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProcessBackend for UnixProcessBackend {
    fn install_notifier(&mut self) -> Result<()> {
        self.notifier = Some(signals::install()?);

        // Outside a PID namespace orphans only reparent to us if we are a
        // subreaper. Best-effort: real PID 1 does not need it.
        if !utils::is_pid1() {
            if let Err(e) = prctl::set_child_subreaper(true) {
                warn!("failed to mark process as child subreaper: {}", e);
            }
        }

        Ok(())
    }

    fn wait_notification(&mut self) -> Result<Notification> {
        match &self.notifier {
            Some(notifier) => notifier.wait(),
            None => Err(InitError::InvalidState(
                "signal notifier not installed".to_string(),
            )),
        }
    }

    fn spawn(&mut self, spec: &WorkloadSpec) -> Result<Pid> {
        spec.validate()?;
        let program = spec.resolve_program()?;

        // Marshal everything before forking; the child only execs.
        let program_cstr = CString::new(program.as_os_str().as_bytes())
            .map_err(|_| InitError::Spawn("program path contains nul byte".to_string()))?;

        let mut argv: Vec<CString> = Vec::with_capacity(spec.args.len() + 1);
        argv.push(
            CString::new(spec.program.clone())
                .map_err(|_| InitError::Spawn("program name contains nul byte".to_string()))?,
        );
        for arg in &spec.args {
            argv.push(
                CString::new(arg.clone())
                    .map_err(|_| InitError::Spawn("argument contains nul byte".to_string()))?,
            );
        }

        let envp = spec
            .env
            .iter()
            .map(|(k, v)| CString::new(format!("{}={}", k, v)))
            .collect::<std::result::Result<Vec<CString>, _>>()
            .map_err(|_| InitError::Spawn("environment contains nul byte".to_string()))?;

        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                // Both sides call setpgid so the group exists before either
                // proceeds; losing the race after exec reports EACCES.
                let _ = setpgid(child, child);
                debug!("spawned workload {} (pid {})", spec.program, child);
                Ok(child)
            }
            Ok(ForkResult::Child) => {
                let _ = setpgid(Pid::from_raw(0), Pid::from_raw(0));
                if let Some(cwd) = &spec.cwd {
                    if let Err(e) = chdir(cwd.as_str()) {
                        eprintln!("chdir {} failed: {}", cwd, e);
                        unsafe { libc::_exit(127) }
                    }
                }
                let _ = execve(&program_cstr, &argv, &envp);
                // Only reachable when exec fails after the pre-flight checks
                eprintln!("execve {} failed: {}", program.display(), Errno::last());
                unsafe { libc::_exit(127) }
            }
            Err(e) => Err(InitError::Spawn(format!("fork failed: {}", e))),
        }
    }

    fn try_reap(&mut self) -> Result<Reaped> {
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(pid, code)) => {
                    return Ok(Reaped::Child {
                        pid,
                        status: ProcessStatus::Exited(code),
                    })
                }
                Ok(WaitStatus::Signaled(pid, signal, _core)) => {
                    return Ok(Reaped::Child {
                        pid,
                        status: ProcessStatus::Signaled(signal),
                    })
                }
                Ok(WaitStatus::StillAlive) => return Ok(Reaped::None),
                Ok(_) => continue,
                Err(Errno::ECHILD) => return Ok(Reaped::None),
                Err(e) => return Err(InitError::Syscall(format!("waitpid failed: {}", e))),
            }
        }
    }

    fn signal_group(&mut self, pid: Pid, signal: Signal) -> Result<()> {
        match killpg(pid, signal) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => {
                debug!("process group {} already gone", pid);
                Ok(())
            }
            Err(e) => Err(InitError::Syscall(format!(
                "killpg({}, {}) failed: {}",
                pid, signal, e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serial_guard;

    #[test]
    fn spawn_rejects_missing_executable() {
        let mut backend = UnixProcessBackend::new();
        let spec = WorkloadSpec::new("/does/not/exist");
        let err = backend.spawn(&spec).unwrap_err();
        assert!(matches!(err, InitError::Spawn(_)));
    }

    #[test]
    fn spawn_rejects_empty_program() {
        let mut backend = UnixProcessBackend::new();
        let err = backend.spawn(&WorkloadSpec::new("")).unwrap_err();
        assert!(matches!(err, InitError::Spawn(_)));
    }

    #[test]
    fn wait_notification_requires_install() {
        let mut backend = UnixProcessBackend::new();
        assert!(matches!(
            backend.wait_notification(),
            Err(InitError::InvalidState(_))
        ));
    }

    #[test]
    fn spawn_runs_program_and_reports_exit() {
        let _guard = serial_guard();
        let mut backend = UnixProcessBackend::new();
        let spec = WorkloadSpec::new("/bin/sh").args(["-c", "exit 5"]);

        let pid = backend.spawn(&spec).unwrap();
        match waitpid(pid, None).unwrap() {
            WaitStatus::Exited(reaped, code) => {
                assert_eq!(reaped, pid);
                assert_eq!(code, 5);
            }
            other => panic!("unexpected wait status: {:?}", other),
        }
    }

    #[test]
    fn spawn_honors_working_directory() {
        let _guard = serial_guard();
        let tmp = tempfile::tempdir().unwrap();
        let marker = tmp.path().join("marker");

        let mut backend = UnixProcessBackend::new();
        let spec = WorkloadSpec::new("/bin/sh")
            .args(["-c", ": > marker"])
            .current_dir(tmp.path().to_str().unwrap());

        let pid = backend.spawn(&spec).unwrap();
        let _ = waitpid(pid, None).unwrap();
        assert!(marker.exists());
    }

    #[test]
    fn spawn_places_child_in_own_group() {
        let _guard = serial_guard();
        let mut backend = UnixProcessBackend::new();
        let spec = WorkloadSpec::new("/bin/sh").args(["-c", "sleep 10"]);

        let pid = backend.spawn(&spec).unwrap();
        backend.signal_group(pid, Signal::SIGKILL).unwrap();

        match waitpid(pid, None).unwrap() {
            WaitStatus::Signaled(reaped, signal, _) => {
                assert_eq!(reaped, pid);
                assert_eq!(signal, Signal::SIGKILL);
            }
            other => panic!("unexpected wait status: {:?}", other),
        }
    }

    #[test]
    fn try_reap_without_children_is_none() {
        let _guard = serial_guard();
        let mut backend = UnixProcessBackend::new();
        assert_eq!(backend.try_reap().unwrap(), Reaped::None);
    }

    #[test]
    fn signal_group_tolerates_missing_group() {
        let mut backend = UnixProcessBackend::new();
        // A PID far above pid_max that cannot name a live group
        let bogus = Pid::from_raw(i32::MAX - 1);
        assert!(backend.signal_group(bogus, Signal::SIGTERM).is_ok());
    }
}
