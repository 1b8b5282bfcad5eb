//! Async-signal boundary for the supervisor
//!
//! Signal delivery is translated into bytes on a self-pipe so the reap loop
//! stays ordinary blocking control flow. The handler itself only does
//! async-signal-safe work: one `write` of the signal number, with errno
//! saved and restored.

use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicI32, Ordering};

use nix::errno::Errno;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::pipe;

use crate::errors::{InitError, Result};

/// Signals the supervisor installs handlers for
pub const HANDLED_SIGNALS: [Signal; 3] = [Signal::SIGCHLD, Signal::SIGTERM, Signal::SIGINT];

/// A decoded signal notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// A child changed state; the reap loop must drain exited children
    ChildEvent,
    /// A terminal signal to forward to the workload
    Terminal(Signal),
}

impl Notification {
    fn decode(byte: u8) -> Self {
        match Signal::try_from(byte as i32) {
            Ok(signal @ (Signal::SIGTERM | Signal::SIGINT)) => Notification::Terminal(signal),
            _ => Notification::ChildEvent,
        }
    }
}

// Write end of the self-pipe, shared with the handler. -1 until installed.
static NOTIFY_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn notify_handler(signo: libc::c_int) {
    let fd = NOTIFY_FD.load(Ordering::Relaxed);
    if fd < 0 {
        return;
    }
    unsafe {
        let saved_errno = *libc::__errno_location();
        let byte = signo as u8;
        libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        *libc::__errno_location() = saved_errno;
    }
}

/// Owner of the self-pipe read end
pub struct SignalNotifier {
    rx: OwnedFd,
    tx: RawFd,
}

impl Drop for SignalNotifier {
    // Unregister the write end so the handler never touches a widowed pipe.
    // A newer notifier may already have replaced it; then the old write end
    // is closed and nothing is cleared here.
    fn drop(&mut self) {
        if NOTIFY_FD
            .compare_exchange(self.tx, -1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            unsafe {
                libc::close(self.tx);
            }
        }
    }
}

impl SignalNotifier {
    /// Block until the next signal notification
    pub fn wait(&self) -> Result<Notification> {
        let mut buf = [0u8; 1];
        loop {
            let n = unsafe {
                libc::read(self.rx.as_raw_fd(), buf.as_mut_ptr() as *mut libc::c_void, 1)
            };
            if n == 1 {
                return Ok(Notification::decode(buf[0]));
            }
            if n == 0 {
                return Err(InitError::Syscall("notification pipe closed".to_string()));
            }
            match Errno::last() {
                Errno::EINTR => continue,
                errno => {
                    return Err(InitError::Syscall(format!(
                        "read on notification pipe failed: {}",
                        errno
                    )))
                }
            }
        }
    }
}

/// Install handlers for child-state and terminal signals.
///
/// Replaces any previously installed self-pipe. Fails with `SignalSetup` if
/// the pipe or any handler cannot be installed; the caller treats this as
/// fatal since init duties depend on it.
pub fn install() -> Result<SignalNotifier> {
    let (rx, tx) =
        pipe().map_err(|e| InitError::SignalSetup(format!("pipe failed: {}", e)))?;

    set_fd_flags(rx.as_raw_fd(), false)?;
    set_fd_flags(tx.as_raw_fd(), true)?;

    let tx = tx.into_raw_fd();
    let old = NOTIFY_FD.swap(tx, Ordering::SeqCst);
    if old >= 0 {
        unsafe {
            libc::close(old);
        }
    }

    let action = SigAction::new(
        SigHandler::Handler(notify_handler),
        SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP,
        SigSet::empty(),
    );
    for signal in HANDLED_SIGNALS {
        unsafe { sigaction(signal, &action) }
            .map_err(|e| InitError::SignalSetup(format!("sigaction({}) failed: {}", signal, e)))?;
    }

    Ok(SignalNotifier { rx, tx })
}

// CLOEXEC everywhere; the write end is also non-blocking so a full pipe can
// never wedge the handler.
fn set_fd_flags(fd: RawFd, nonblocking: bool) -> Result<()> {
    unsafe {
        let fd_flags = libc::fcntl(fd, libc::F_GETFD);
        if fd_flags < 0 || libc::fcntl(fd, libc::F_SETFD, fd_flags | libc::FD_CLOEXEC) < 0 {
            return Err(InitError::SignalSetup(format!(
                "fcntl(FD_CLOEXEC) failed: {}",
                Errno::last()
            )));
        }
        if nonblocking {
            let fl_flags = libc::fcntl(fd, libc::F_GETFL);
            if fl_flags < 0 || libc::fcntl(fd, libc::F_SETFL, fl_flags | libc::O_NONBLOCK) < 0 {
                return Err(InitError::SignalSetup(format!(
                    "fcntl(O_NONBLOCK) failed: {}",
                    Errno::last()
                )));
            }
        }
    }
    Ok(())
}
