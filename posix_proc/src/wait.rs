//! Wait Dispatcher
//!
//! `waitpid` for tracked children: a specific pid or any child, blocking or
//! not. Only children created through the same [`ProcessControl`] are
//! visible; process groups are not supported.

use bitflags::bitflags;

use crate::compat::{EncodedStatus, Pid, ANY_CHILD};
use crate::control::ProcessControl;
use crate::kernel_interface::{NativeProcessApi, Timeout, WaitOutcome};
use crate::reaper::PollStatus;
use crate::{ProcError, Result};

bitflags! {
    /// `waitpid` options
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WaitOptions: i32 {
        /// Return at once if no child has terminated
        const NOHANG = 1;
    }
}

/// Which child a wait is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTarget {
    /// Any tracked child
    Any,
    /// The tracked child with this pid
    Pid(Pid),
}

impl WaitTarget {
    /// Interpret a `waitpid` pid argument
    ///
    /// `-1` is any child; positive values name one child. Process-group
    /// targets (`0` and below `-1`) are rejected.
    pub fn from_raw(pid: Pid) -> Result<Self> {
        match pid {
            ANY_CHILD => Ok(WaitTarget::Any),
            pid if pid > 0 => Ok(WaitTarget::Pid(pid)),
            pid => Err(ProcError::InvalidArgument(format!(
                "process group wait target {}",
                pid
            ))),
        }
    }

    /// Pid argument form
    pub fn raw(self) -> Pid {
        match self {
            WaitTarget::Any => ANY_CHILD,
            WaitTarget::Pid(pid) => pid,
        }
    }
}

/// A child whose termination was consumed by a wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reaped {
    /// Pid of the child
    pub pid: Pid,
    /// Encoded wait status
    pub status: EncodedStatus,
}

impl<N: NativeProcessApi> ProcessControl<N> {
    /// Wait for a tracked child to terminate
    ///
    /// Returns `Ok(None)` when nothing terminated: a non-blocking wait found
    /// only running children, or a blocking wait gave up after too many
    /// unexpected native outcomes.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no tracked child matches (`-1` for "any").
    /// - `Interrupted` if the native wait woke for another reason.
    /// - `QueryFailed` from the reaper, or if the native wait-any failed.
    pub fn wait(&self, target: WaitTarget, options: WaitOptions) -> Result<Option<Reaped>> {
        let timeout = Timeout::from_options(options);
        log::debug!("wait({:?}, {:?})", target, options);

        let result = match target {
            WaitTarget::Any => self.wait_any_child(timeout),
            WaitTarget::Pid(pid) => self.wait_child(pid, timeout),
        };
        if let Ok(None) = result {
            self.stats.record_wait_timeout();
        }
        result
    }

    fn wait_any_child(&self, timeout: Timeout) -> Result<Option<Reaped>> {
        loop {
            let mut running = Vec::new();
            for child in self.table.live_children() {
                match self.poll_status(&child) {
                    Ok(PollStatus::Exited { pid, status }) => {
                        return Ok(Some(Reaped { pid, status }))
                    }
                    Ok(PollStatus::StillRunning) => running.push(child),
                    // Reaped by a concurrent waiter since the snapshot.
                    Err(ProcError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            if running.is_empty() {
                return Err(ProcError::NotFound(ANY_CHILD));
            }

            let handles: Vec<_> = running.iter().map(|c| c.handle().as_ref()).collect();
            let index = match self.native.wait_any(&handles, timeout) {
                WaitOutcome::Signalled(index) => index,
                WaitOutcome::TimedOut => return Ok(None),
                WaitOutcome::Interrupted => return Err(ProcError::Interrupted),
                WaitOutcome::Failed(e) => return Err(ProcError::QueryFailed(e)),
            };

            let fired = running.get(index).ok_or(ProcError::NotFound(ANY_CHILD))?;
            let Some(cause) = self.table.find_by_handle(fired.handle()) else {
                log::debug!("Child {} reaped elsewhere, rescanning", fired.pid());
                continue;
            };
            match self.poll_status(&cause) {
                Ok(PollStatus::Exited { pid, status }) => return Ok(Some(Reaped { pid, status })),
                Ok(PollStatus::StillRunning) => return Ok(None),
                Err(ProcError::NotFound(_)) => {
                    log::debug!("Child {} reaped elsewhere, rescanning", cause.pid());
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn wait_child(&self, pid: Pid, timeout: Timeout) -> Result<Option<Reaped>> {
        let child = self.table.find_by_pid(pid).ok_or(ProcError::NotFound(pid))?;
        let mut retried = 0u32;

        loop {
            if let PollStatus::Exited { pid, status } = self.poll_status(&child)? {
                return Ok(Some(Reaped { pid, status }));
            }

            match self.native.wait_one(child.handle(), timeout) {
                WaitOutcome::Signalled(_) => {}
                WaitOutcome::Interrupted => return Err(ProcError::Interrupted),
                _ if timeout == Timeout::Immediate => return Ok(None),
                WaitOutcome::TimedOut => {}
                WaitOutcome::Failed(e) => {
                    retried += 1;
                    log::debug!("Wait on child {} failed ({}), retry {}", pid, e, retried);
                    if retried > self.max_wait_retries {
                        return Ok(None);
                    }
                }
            }
        }
    }
}
