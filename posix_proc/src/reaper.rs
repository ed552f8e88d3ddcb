//! Status Reaper
//!
//! Reads a tracked child's native exit state, turns it into a POSIX
//! status and retires the slot. A child's status is consumed exactly once:
//! the slot is freed only if it still holds the handle the caller looked
//! at, so of two concurrent reapers only one sees `Exited`.

use std::io;

use crate::compat::{EncodedStatus, Pid};
use crate::control::ProcessControl;
use crate::kernel_interface::{NativeExit, NativeProcessApi, Timeout, WaitOutcome};
use crate::table::LiveChild;
use crate::{ProcError, Result};

/// Outcome of one status poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// Child has not terminated; nothing changed
    StillRunning,
    /// Child terminated; its slot is now free
    Exited {
        /// Pid of the reaped child
        pid: Pid,
        /// Encoded wait status
        status: EncodedStatus,
    },
}

impl<N: NativeProcessApi> ProcessControl<N> {
    /// Poll one tracked child
    ///
    /// # Errors
    ///
    /// - `QueryFailed` if the native status query (or the finalizing wait)
    ///   fails; the slot is released.
    /// - `NotFound` if another caller reaped the child first.
    pub fn poll_status(&self, child: &LiveChild<N::Handle>) -> Result<PollStatus> {
        let exit = match self.native.exit_status(child.handle()) {
            Ok(exit) => exit,
            Err(e) => return Err(self.abandon(child, e)),
        };

        let status = match exit {
            NativeExit::StillActive => return Ok(PollStatus::StillRunning),
            NativeExit::Exited(code) => EncodedStatus::from_exit_code(code),
            NativeExit::Signaled(sig) => EncodedStatus::from_signal(sig),
        };

        // Make sure the process object is finalized before the handle goes.
        match self.native.wait_one(child.handle(), Timeout::Infinite) {
            WaitOutcome::Signalled(_) => {}
            WaitOutcome::Failed(e) => return Err(self.abandon(child, e)),
            other => {
                let e = io::Error::new(
                    io::ErrorKind::Other,
                    format!("finalizing wait returned {:?}", other),
                );
                return Err(self.abandon(child, e));
            }
        }

        if !self.table.release_if_holds(child.slot(), child.handle()) {
            log::debug!("Child {} already reaped by another waiter", child.pid());
            return Err(ProcError::NotFound(child.pid()));
        }

        self.stats.record_reap();
        log::debug!("Reaped child {}: {:?}", child.pid(), status);
        Ok(PollStatus::Exited {
            pid: child.pid(),
            status,
        })
    }

    fn abandon(&self, child: &LiveChild<N::Handle>, e: io::Error) -> ProcError {
        log::debug!("Status query for child {} failed: {}", child.pid(), e);
        self.table.release_if_holds(child.slot(), child.handle());
        ProcError::QueryFailed(e)
    }
}
