//! Process signal handling for the task loop.
//!
//! The first SIGINT only raises a stop flag that the task loop checks before
//! each fetch. A second SIGINT, or any SIGTERM, ends the process on the spot.
//! Handlers are installed for the lifetime of a [`SignalGuard`] and the
//! previous dispositions come back when it is dropped.

use crate::error::{Result, WorkerError};
use nix::libc;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::os::fd::BorrowedFd;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Exit status after a forced SIGINT (128 + 2).
pub const SIGINT_EXIT_CODE: i32 = 130;
/// Exit status after SIGTERM (128 + 15).
pub const SIGTERM_EXIT_CODE: i32 = 143;

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);
static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Async-signal-safe write to stderr.
fn write_stderr(msg: &[u8]) {
    // SAFETY: fd 2 stays open for the life of the process.
    let fd = unsafe { BorrowedFd::borrow_raw(libc::STDERR_FILENO) };
    let _ = nix::unistd::write(fd, msg);
}

extern "C" fn on_sigint(_: libc::c_int) {
    if STOP_REQUESTED.swap(true, Ordering::SeqCst) {
        write_stderr(b"Received second SIGINT, exiting now\n");
        // SAFETY: _exit is async-signal-safe.
        unsafe { libc::_exit(SIGINT_EXIT_CODE) };
    }
    write_stderr(b"Received SIGINT, exiting after this task completes (press Ctrl-C again to force)\n");
}

extern "C" fn on_sigterm(_: libc::c_int) {
    write_stderr(b"Received SIGTERM, exiting now\n");
    // SAFETY: _exit is async-signal-safe.
    unsafe { libc::_exit(SIGTERM_EXIT_CODE) };
}

fn action(handler: extern "C" fn(libc::c_int)) -> SigAction {
    SigAction::new(SigHandler::Handler(handler), SaFlags::SA_RESTART, SigSet::empty())
}

/// Installed SIGINT/SIGTERM handlers. At most one guard exists per process.
pub struct SignalGuard {
    previous_int: SigAction,
    previous_term: SigAction,
}

impl SignalGuard {
    pub fn install() -> Result<Self> {
        if INSTALLED.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::SignalsInstalled);
        }
        STOP_REQUESTED.store(false, Ordering::SeqCst);

        // SAFETY: both handlers only touch atomics and call async-signal-safe
        // functions.
        let previous_int = match unsafe { sigaction(Signal::SIGINT, &action(on_sigint)) } {
            Ok(previous) => previous,
            Err(e) => {
                INSTALLED.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        let previous_term = match unsafe { sigaction(Signal::SIGTERM, &action(on_sigterm)) } {
            Ok(previous) => previous,
            Err(e) => {
                // SAFETY: restoring a disposition the OS handed back to us.
                let _ = unsafe { sigaction(Signal::SIGINT, &previous_int) };
                INSTALLED.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        debug!("signal handlers installed");
        Ok(SignalGuard {
            previous_int,
            previous_term,
        })
    }

    pub fn stop_requested(&self) -> bool {
        stop_requested()
    }
}

/// Whether a first SIGINT has arrived while a guard is installed.
pub fn stop_requested() -> bool {
    STOP_REQUESTED.load(Ordering::SeqCst)
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        // SAFETY: restoring dispositions the OS handed back to us.
        unsafe {
            let _ = sigaction(Signal::SIGTERM, &self.previous_term);
            let _ = sigaction(Signal::SIGINT, &self.previous_int);
        }
        STOP_REQUESTED.store(false, Ordering::SeqCst);
        INSTALLED.store(false, Ordering::SeqCst);
        debug!("signal handlers restored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::raise;
    use parking_lot::{const_mutex, Mutex};

    static SERIAL: Mutex<()> = const_mutex(());

    fn current(signal: Signal) -> SigHandler {
        let default_action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        unsafe {
            let previous = sigaction(signal, &default_action).unwrap();
            sigaction(signal, &previous).unwrap();
            previous.handler()
        }
    }

    #[test]
    fn test_single_guard() {
        let _serial = SERIAL.lock();
        let guard = SignalGuard::install().unwrap();
        assert!(matches!(SignalGuard::install(), Err(WorkerError::SignalsInstalled)));
        drop(guard);

        let again = SignalGuard::install().unwrap();
        drop(again);
    }

    #[test]
    fn test_first_sigint_sets_flag() {
        let _serial = SERIAL.lock();
        let guard = SignalGuard::install().unwrap();
        assert!(!guard.stop_requested());

        raise(Signal::SIGINT).unwrap();
        assert!(guard.stop_requested());
    }

    #[test]
    fn test_previous_handlers_restored() {
        let _serial = SERIAL.lock();
        let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        let original = unsafe { sigaction(Signal::SIGINT, &ignore).unwrap() };

        {
            let _guard = SignalGuard::install().unwrap();
            assert!(matches!(current(Signal::SIGINT), SigHandler::Handler(_)));
        }
        assert_eq!(current(Signal::SIGINT), SigHandler::SigIgn);

        unsafe { sigaction(Signal::SIGINT, &original).unwrap() };
    }
}
