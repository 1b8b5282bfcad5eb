//! Utility functions for supervisor operations

use nix::sys::signal::Signal;

/// Check if running as PID 1 (init inside a PID namespace)
pub fn is_pid1() -> bool {
    std::process::id() == 1
}

/// Get own PID
pub fn get_pid() -> u32 {
    std::process::id()
}

/// Get current effective UID
pub fn get_uid() -> u32 {
    unsafe { libc::geteuid() }
}

/// Get current effective GID
pub fn get_gid() -> u32 {
    unsafe { libc::getegid() }
}

/// Current working directory, or "?" if it cannot be read
pub fn current_dir_lossy() -> String {
    std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "?".to_string())
}

/// Exit code reported for a workload killed by `signal`, per shell convention
pub fn signal_exit_code(signal: Signal) -> i32 {
    128 + signal as i32
}
