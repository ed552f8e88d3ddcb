//! # Kernel Interface - Native Process API Bridge
//!
//! The seam between the POSIX contracts and the host's handle-based
//! process primitives. Everything above this module speaks in slots, pids
//! and encoded statuses; everything below speaks in native handles and
//! native exit codes.
//!
//! ## Backends
//!
//! ```text
//!                 NativeProcessApi
//!                        │
//!        ┌───────────────┼────────────────┐
//!        ▼               ▼                ▼
//!  ┌───────────┐   ┌───────────┐   ┌────────────┐
//!  │  Win32    │   │   unix    │   │    fake    │
//!  │ (handles) │   │ (polling) │   │  (tests)   │
//!  └───────────┘   └───────────┘   └────────────┘
//! ```
//!
//! Native handles are closed when dropped, so ownership of a handle is
//! ownership of the Rust value.

use std::fs::File;
use std::io;
use std::path::PathBuf;

use crate::compat::Pid;
use crate::spawn::CreationFlags;
use crate::wait::WaitOptions;

pub mod resolver;

#[cfg(unix)]
pub mod unix;
#[cfg(windows)]
pub mod windows;

#[cfg(test)]
pub(crate) mod fake;

/// Backend used for the real host
#[cfg(unix)]
pub type HostNative = unix::UnixNative;

/// Backend used for the real host
#[cfg(windows)]
pub type HostNative = windows::WindowsNative;

/// Longest command line the native creation primitive accepts (UTF-16 units)
pub const MAX_COMMAND_LINE: usize = 32767;

/// Native exit-code value that means "has not exited yet"
pub const STILL_ACTIVE: u32 = 259;

/// How long a native wait may block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Check once and return
    Immediate,
    /// Block until a handle is signalled
    Infinite,
}

impl Timeout {
    /// Timeout implied by `waitpid` options
    #[inline]
    pub fn from_options(options: WaitOptions) -> Self {
        if options.contains(WaitOptions::NOHANG) {
            Timeout::Immediate
        } else {
            Timeout::Infinite
        }
    }
}

/// Result of a native wait on one or several handles
#[derive(Debug)]
pub enum WaitOutcome {
    /// Handle at this index is signalled (its process has terminated)
    Signalled(usize),
    /// Nothing signalled within the timeout
    TimedOut,
    /// Woken for a reason other than a handle (alertable wait, APC)
    Interrupted,
    /// The wait primitive itself failed
    Failed(io::Error),
}

/// Native view of a process's termination state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeExit {
    /// Still running
    StillActive,
    /// Exited with this native code
    Exited(u32),
    /// Killed by this signal (hosts with real signals only)
    Signaled(i32),
}

/// Access requested when opening a process that is not a tracked child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessAccess {
    /// Query information only
    Query,
    /// Query information and terminate
    QueryTerminate,
}

/// Console control event broadcast for `SIGINT`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleEvent {
    /// Ctrl+C, sent to the caller's whole console group
    CtrlC,
    /// Ctrl+Break, sent to one process group
    CtrlBreak,
}

/// Security attributes for the created process and thread handles
///
/// Only the Windows backend acts on these. The unix backend ignores
/// `inherit_handles`: descriptors opened through std are close-on-exec, and
/// the child's standard streams are wired either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityAttributes {
    /// Whether the child inherits the caller's inheritable handles (Windows)
    pub inherit_handles: bool,
}

impl Default for SecurityAttributes {
    fn default() -> Self {
        Self {
            inherit_handles: true,
        }
    }
}

/// Owned native stream type of the host
#[cfg(unix)]
pub type RawStdio = std::os::fd::OwnedFd;
/// Owned native stream type of the host
#[cfg(windows)]
pub type RawStdio = std::os::windows::io::OwnedHandle;

/// An owned native stream handed to a child as stdin, stdout or stderr
#[derive(Debug)]
pub struct StdioHandle(RawStdio);

impl StdioHandle {
    /// Unwrap into the owned native handle
    pub fn into_inner(self) -> RawStdio {
        self.0
    }
}

impl From<File> for StdioHandle {
    fn from(file: File) -> Self {
        Self(file.into())
    }
}

impl From<RawStdio> for StdioHandle {
    fn from(raw: RawStdio) -> Self {
        Self(raw)
    }
}

/// Everything the native creation primitive needs, already prepared
#[derive(Debug)]
pub struct LaunchRequest<'a> {
    /// Full command line, program name included
    pub command_line: Option<&'a str>,
    /// Executable to run instead of the command line's first word
    pub program: Option<&'a str>,
    /// Handle inheritance
    pub security: SecurityAttributes,
    /// Explicit stdin; inherited from the caller when absent
    pub stdin: Option<StdioHandle>,
    /// Explicit stdout; inherited from the caller when absent
    pub stdout: Option<StdioHandle>,
    /// Explicit stderr; inherited from the caller when absent
    pub stderr: Option<StdioHandle>,
    /// Creation and priority flags
    pub flags: CreationFlags,
}

/// A freshly created process: its id and process handle
///
/// The thread handle is never part of this; backends close it before
/// returning.
#[derive(Debug)]
pub struct Launched<H> {
    /// Native process id
    pub pid: Pid,
    /// Process handle
    pub process: H,
}

/// Native process primitives the emulation layer is built on
pub trait NativeProcessApi: Send + Sync {
    /// Owned process handle, closed on drop
    type Handle: Send + Sync + 'static;

    /// Create a new process
    fn launch(&self, request: LaunchRequest<'_>) -> io::Result<Launched<Self::Handle>>;

    /// Non-blocking exit code query
    fn exit_status(&self, handle: &Self::Handle) -> io::Result<NativeExit>;

    /// Wait for one handle
    fn wait_one(&self, handle: &Self::Handle, timeout: Timeout) -> WaitOutcome;

    /// Wait for the first of several handles
    fn wait_any(&self, handles: &[&Self::Handle], timeout: Timeout) -> WaitOutcome;

    /// Open an arbitrary process by id
    fn open_process(&self, pid: Pid, access: ProcessAccess) -> Option<Self::Handle>;

    /// Forcefully terminate, setting the exit code where the host allows it
    fn terminate(&self, handle: &Self::Handle, exit_code: u32) -> io::Result<()>;

    /// Broadcast a console control event to a process group (0 = caller's console)
    fn console_event(&self, event: ConsoleEvent, group: Pid) -> io::Result<()>;

    /// Deliver a signal to the calling process; returns the C `raise` result
    fn raise(&self, sig: i32) -> i32;

    /// Id of the calling process
    fn current_pid(&self) -> Pid;

    /// Id of the caller's parent, if the host can tell
    fn parent_pid(&self) -> Option<Pid>;

    /// Path of the running executable
    fn executable_path(&self) -> Option<PathBuf>;
}
