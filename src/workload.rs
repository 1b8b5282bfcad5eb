//! Workload description and process bookkeeping

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::errors::{InitError, Result};
use crate::utils;

/// Description of the single workload the supervisor launches.
///
/// `env` is the complete environment handed to the child (execve semantics).
/// Callers that want pass-through compose it with [`WorkloadSpec::inherit_env`].
#[derive(Debug, Clone, Default)]
pub struct WorkloadSpec {
    /// Program to execute (absolute path, relative path, or bare name
    /// resolved against PATH)
    pub program: String,
    /// Program arguments (argv[1..])
    pub args: Vec<String>,
    /// Complete child environment
    pub env: Vec<(String, String)>,
    /// Working directory for the child (inherited if unset)
    pub cwd: Option<String>,
}

impl WorkloadSpec {
    /// Create a spec for `program` with no arguments and an empty environment
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Append an argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable, replacing an earlier entry with the same key
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.env.retain(|(k, _)| *k != key);
        self.env.push((key, value.into()));
        self
    }

    /// Extend the environment with the supervisor's own, keeping entries
    /// already present in the spec
    pub fn inherit_env(mut self) -> Self {
        for (key, value) in std::env::vars() {
            if !self.env.iter().any(|(k, _)| *k == key) {
                self.env.push((key, value));
            }
        }
        self
    }

    /// Set the child working directory
    pub fn current_dir(mut self, dir: impl Into<String>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Check the spec is well-formed enough to exec
    pub fn validate(&self) -> Result<()> {
        if self.program.is_empty() {
            return Err(InitError::Spawn("empty program name".to_string()));
        }
        if self.program.contains('\0') {
            return Err(InitError::Spawn("program name contains nul byte".to_string()));
        }
        if self.args.iter().any(|a| a.contains('\0')) {
            return Err(InitError::Spawn("argument contains nul byte".to_string()));
        }
        for (key, value) in &self.env {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                return Err(InitError::Spawn(format!("invalid environment key: {:?}", key)));
            }
            if value.contains('\0') {
                return Err(InitError::Spawn(format!(
                    "environment value for {} contains nul byte",
                    key
                )));
            }
        }
        Ok(())
    }

    /// Resolve the program to an executable path before forking.
    ///
    /// Names containing `/` are taken as paths and must point at an
    /// executable file. Bare names are searched in the spec's PATH, falling
    /// back to the supervisor's own.
    pub fn resolve_program(&self) -> Result<PathBuf> {
        if self.program.contains('/') {
            let path = PathBuf::from(&self.program);
            if is_executable(&path) {
                return Ok(path);
            }
            return Err(InitError::Spawn(format!(
                "no such executable: {}",
                self.program
            )));
        }

        let search_path = self
            .env
            .iter()
            .find(|(k, _)| k == "PATH")
            .map(|(_, v)| v.clone())
            .or_else(|| std::env::var("PATH").ok())
            .unwrap_or_else(|| "/usr/local/bin:/usr/bin:/bin".to_string());

        for dir in search_path.split(':').filter(|d| !d.is_empty()) {
            let candidate = Path::new(dir).join(&self.program);
            if is_executable(&candidate) {
                return Ok(candidate);
            }
        }

        Err(InitError::Spawn(format!(
            "{}: not found in PATH",
            self.program
        )))
    }
}

fn is_executable(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

/// Last observed state of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Spawned and not yet reaped
    Running,
    /// Exited normally with a code
    Exited(i32),
    /// Terminated by a signal
    Signaled(Signal),
}

impl ProcessStatus {
    /// Exit code to mirror for this status, if terminal
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessStatus::Running => None,
            ProcessStatus::Exited(code) => Some(*code),
            ProcessStatus::Signaled(signal) => Some(utils::signal_exit_code(*signal)),
        }
    }
}

/// Bookkeeping entry for the primary workload process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessRecord {
    /// Child PID
    pub pid: Pid,
    /// Last observed status
    pub status: ProcessStatus,
}

impl ProcessRecord {
    /// Record for a freshly spawned process
    pub fn running(pid: Pid) -> Self {
        Self {
            pid,
            status: ProcessStatus::Running,
        }
    }
}
