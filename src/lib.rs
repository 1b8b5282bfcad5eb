//! sandbox-init: PID-1 init supervisor for sandboxed workloads
//!
//! The smallest init a sandbox needs: it becomes PID 1 inside an
//! already-constructed isolated environment, launches a single workload,
//! reaps every orphan reparented to it, forwards terminal signals to the
//! workload's process group, and exits with the workload's own status
//! (128+N for death by signal N).
//!
//! # Modules
//!
//! - **workload**: Workload description and process bookkeeping
//! - **signals**: Self-pipe boundary turning signal delivery into blocking waits
//! - **supervision**: Process backend and the init supervisor itself
//!
//! # Example
//!
//! ```ignore
//! use sandbox_init::{InitSupervisor, WorkloadSpec};
//!
//! let spec = WorkloadSpec::new("/bin/sh")
//!     .args(["-c", "exec my-workload"])
//!     .inherit_env();
//!
//! let mut supervisor = InitSupervisor::new();
//! let code = supervisor.run(&spec)?;
//! std::process::exit(code);
//! ```

// Core modules
pub mod errors;
pub mod utils;

// Layered modules
pub mod signals;
pub mod supervision;
pub mod workload;

// Public API
pub use errors::{InitError, Result};
pub use signals::{Notification, SignalNotifier};
pub use supervision::{
    InitSupervisor, ProcessBackend, Reaped, SupervisorState, UnixProcessBackend,
    SUPERVISOR_FAILURE_CODE,
};
pub use workload::{ProcessRecord, ProcessStatus, WorkloadSpec};
