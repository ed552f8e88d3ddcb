//! # Signal Mapper
//!
//! Maps POSIX `kill` onto the host's native primitives. Only three signals
//! mean anything to another process:
//!
//! - `0` probes for existence,
//! - `SIGINT` becomes a console control event,
//! - `SIGKILL` becomes a forced termination.
//!
//! Any signal sent to the calling process itself (other than `0` and
//! `SIGKILL`) is delivered in-process with `raise`.

use std::io;

use crate::compat::Pid;
use crate::control::ProcessControl;
use crate::kernel_interface::{ConsoleEvent, NativeExit, NativeProcessApi, ProcessAccess};
use crate::{ProcError, Result};

/// `SIGINT` signal number
pub const SIGINT: i32 = Signal::SIGINT as i32;

/// `SIGKILL` signal number
pub const SIGKILL: i32 = Signal::SIGKILL as i32;

/// Signal numbers (POSIX)
#[allow(missing_docs)]
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    SIGHUP = 1,
    SIGINT = 2,
    SIGQUIT = 3,
    SIGILL = 4,
    SIGTRAP = 5,
    SIGABRT = 6,
    SIGBUS = 7,
    SIGFPE = 8,
    SIGKILL = 9,
    SIGUSR1 = 10,
    SIGSEGV = 11,
    SIGUSR2 = 12,
    SIGPIPE = 13,
    SIGALRM = 14,
    SIGTERM = 15,
    SIGSTKFLT = 16,
    SIGCHLD = 17,
    SIGCONT = 18,
    SIGSTOP = 19,
    SIGTSTP = 20,
    SIGTTIN = 21,
    SIGTTOU = 22,
    SIGURG = 23,
    SIGXCPU = 24,
    SIGXFSZ = 25,
    SIGVTALRM = 26,
    SIGPROF = 27,
    SIGWINCH = 28,
    SIGIO = 29,
    SIGPWR = 30,
    SIGSYS = 31,
}

const SIGNALS: [Signal; 31] = [
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGILL,
    Signal::SIGTRAP,
    Signal::SIGABRT,
    Signal::SIGBUS,
    Signal::SIGFPE,
    Signal::SIGKILL,
    Signal::SIGUSR1,
    Signal::SIGSEGV,
    Signal::SIGUSR2,
    Signal::SIGPIPE,
    Signal::SIGALRM,
    Signal::SIGTERM,
    Signal::SIGSTKFLT,
    Signal::SIGCHLD,
    Signal::SIGCONT,
    Signal::SIGSTOP,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
    Signal::SIGURG,
    Signal::SIGXCPU,
    Signal::SIGXFSZ,
    Signal::SIGVTALRM,
    Signal::SIGPROF,
    Signal::SIGWINCH,
    Signal::SIGIO,
    Signal::SIGPWR,
    Signal::SIGSYS,
];

impl Signal {
    /// Signal with this number, if any
    pub fn from_i32(sig: i32) -> Option<Self> {
        let index = usize::try_from(sig).ok()?.checked_sub(1)?;
        SIGNALS.get(index).copied()
    }
}

impl TryFrom<i32> for Signal {
    type Error = ProcError;

    fn try_from(sig: i32) -> Result<Self> {
        Signal::from_i32(sig).ok_or_else(|| ProcError::InvalidArgument(format!("signal {}", sig)))
    }
}

impl<N: NativeProcessApi> ProcessControl<N> {
    /// Send `sig` to `pid`
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for a negative pid, pid `0` with anything but
    ///   `SIGINT`, or a signal with no native mapping.
    /// - `NoSuchProcess` if the target cannot be opened or has already
    ///   exited.
    /// - `QueryFailed` / `DeliveryFailed` if a native primitive fails.
    pub fn signal(&self, pid: Pid, sig: i32) -> Result<()> {
        let result = self.signal_inner(pid, sig);
        log::debug!(
            "kill({}, {:?}) -> {:?}",
            pid,
            Signal::from_i32(sig).ok_or(sig),
            result.as_ref().map_err(ProcError::to_errno)
        );
        self.stats.record_signal(result.is_ok());
        result
    }

    fn signal_inner(&self, pid: Pid, sig: i32) -> Result<()> {
        if pid < 0 || (pid == 0 && sig != SIGINT) {
            return Err(ProcError::InvalidArgument(format!(
                "cannot send signal {} to pid {}",
                sig, pid
            )));
        }

        if pid == self.native.current_pid() && sig != 0 && sig != SIGKILL {
            return match self.native.raise(sig) {
                0 => Ok(()),
                ret => Err(ProcError::DeliveryFailed(io::Error::new(
                    io::ErrorKind::Other,
                    format!("raise({}) returned {}", sig, ret),
                ))),
            };
        }

        match sig {
            0 => self
                .native
                .open_process(pid, ProcessAccess::Query)
                .map(drop)
                .ok_or(ProcError::NoSuchProcess(pid)),
            SIGINT => {
                let event = if pid == 0 {
                    ConsoleEvent::CtrlC
                } else {
                    ConsoleEvent::CtrlBreak
                };
                self.native
                    .console_event(event, pid)
                    .map_err(ProcError::DeliveryFailed)
            }
            SIGKILL => self.force_terminate(pid),
            _ => Err(ProcError::InvalidArgument(format!(
                "signal {} has no native mapping",
                sig
            ))),
        }
    }

    /// Forcefully terminate a running process, tracked or not
    fn force_terminate(&self, pid: Pid) -> Result<()> {
        let tracked = self.table.find_by_pid(pid);
        let opened;
        let handle = match &tracked {
            Some(child) => child.handle().as_ref(),
            None => {
                opened = self
                    .native
                    .open_process(pid, ProcessAccess::QueryTerminate)
                    .ok_or(ProcError::NoSuchProcess(pid))?;
                &opened
            }
        };

        match self.native.exit_status(handle).map_err(ProcError::QueryFailed)? {
            NativeExit::StillActive => self
                .native
                .terminate(handle, 0)
                .map_err(ProcError::DeliveryFailed),
            _ => Err(ProcError::NoSuchProcess(pid)),
        }
    }
}
