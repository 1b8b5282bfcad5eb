//! Supervision layer: process backend and init supervisor
//!
//! This module carries the PID-1 duties of the crate: spawning the workload
//! in its own process group, draining exited children, forwarding terminal
//! signals, and mirroring the workload's termination as the supervisor's
//! own exit status.
//!
//! The [`ProcessBackend`] trait is the seam between supervisor bookkeeping
//! and the OS so the reap loop can be driven by a scripted backend in tests.

pub mod backend;
pub mod supervisor;

pub use backend::{ProcessBackend, Reaped, UnixProcessBackend};
pub use supervisor::{InitSupervisor, SupervisorState, SUPERVISOR_FAILURE_CODE};
