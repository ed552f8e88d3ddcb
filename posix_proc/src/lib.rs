//! # POSIX-Proc: process-control emulation layer
//!
//! Emulates POSIX `spawn` / `waitpid` / `kill` on hosts whose native
//! process model is handle based: processes are created fresh (never
//! duplicated), their status is read from a handle, and there is no unified
//! signal delivery.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │        POSIX shims (spawn / waitpid / kill / getppid)       │
//! └───────────────────────────┬─────────────────────────────────┘
//!                             │
//!              ┌──────────────┼──────────────┐
//!              ▼              ▼              ▼
//!     ┌────────────┐  ┌────────────┐  ┌────────────┐
//!     │   Child    │  │    Wait    │  │   Signal   │
//!     │  Creator   │  │ Dispatcher │  │   Mapper   │
//!     └─────┬──────┘  └─────┬──────┘  └─────┬──────┘
//!           │               ▼               │
//!           │        ┌────────────┐         │
//!           │        │   Status   │         │
//!           │        │   Reaper   │         │
//!           │        └─────┬──────┘         │
//!           ▼              ▼                ▼
//!     ┌────────────────────────────────────────────┐
//!     │     Child Slot Table (pid → handle)        │
//!     └────────────────────┬───────────────────────┘
//!                          ▼
//!     ┌────────────────────────────────────────────┐
//!     │  Native interface (Win32 / unix / fake)    │
//!     └────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use posix_proc::{ChildSpec, ProcessControl, HostNative, WaitOptions, WaitTarget};
//!
//! let control = ProcessControl::new(HostNative::default(), 16);
//! let child = control.create_child(ChildSpec::command("exit 7"))?;
//! let reaped = control.wait(WaitTarget::Pid(child.pid()), WaitOptions::empty())?;
//! assert_eq!(reaped.map(|r| r.status.exit_code()), Some(7));
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod compat;
pub mod config;
pub mod control;
pub mod identity;
pub mod kernel_interface;
pub mod reaper;
pub mod signals;
pub mod spawn;
pub mod table;
pub mod translation;
pub mod wait;

// Re-exports for public API
pub use compat::{EncodedStatus, Pid, ANY_CHILD};
pub use config::{get_config, ProcConfig, PROC_CONFIG};
pub use control::ProcessControl;
pub use kernel_interface::{
    ConsoleEvent, HostNative, NativeExit, NativeProcessApi, ProcessAccess, SecurityAttributes,
    StdioHandle, Timeout, WaitOutcome,
};
pub use reaper::PollStatus;
pub use signals::{Signal, SIGINT, SIGKILL};
pub use spawn::{ChildSpec, CreationFlags, ReplacedProcess, SpawnMode, SpawnOutcome};
pub use table::{ChildSlotTable, LiveChild, SlotId};
pub use translation::{argv0, errno, fork, getppid, global, kill, progname, spawn, waitpid};
pub use wait::{Reaped, WaitOptions, WaitTarget};

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

/// POSIX-Proc version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result alias used across the crate
pub type Result<T> = core::result::Result<T, ProcError>;

/// POSIX-Proc error types
#[derive(Debug, thiserror::Error)]
pub enum ProcError {
    /// Malformed pid, signal number, spawn mode or command
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Every slot of the child table is reserved or live
    #[error("child table full ({capacity} slots)")]
    ResourceExhausted {
        /// Table capacity
        capacity: usize,
    },
    /// No tracked child matches the pid (`-1` means "any child")
    #[error("no tracked child for pid {0}")]
    NotFound(Pid),
    /// Signal target could not be opened or has already exited
    #[error("no such process: {0}")]
    NoSuchProcess(Pid),
    /// Command line longer than the native limit
    #[error("command line too long: {len} > {max} units")]
    CommandTooLong {
        /// Length of the rejected command line, in UTF-16 units
        len: usize,
        /// Native limit
        max: usize,
    },
    /// Native process creation failed
    #[error("process creation failed: {0}")]
    CreationFailed(#[source] io::Error),
    /// Native status or identity query failed
    #[error("native query failed: {0}")]
    QueryFailed(#[source] io::Error),
    /// Native signal or termination primitive failed
    #[error("signal delivery failed: {0}")]
    DeliveryFailed(#[source] io::Error),
    /// Wait aborted by an unexpected wakeup
    #[error("wait interrupted")]
    Interrupted,
    /// Blocking wait for a spawned child gave up; the child is still tracked
    #[error("gave up waiting for child {0}")]
    WaitAbandoned(Pid),
    /// Operation cannot be provided on this platform
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),
}

impl ProcError {
    /// Convert to POSIX errno value
    pub fn to_errno(&self) -> i32 {
        match self {
            ProcError::InvalidArgument(_) => 22,         // EINVAL
            ProcError::ResourceExhausted { .. } => 11,   // EAGAIN
            ProcError::NotFound(_) => 10,                // ECHILD
            ProcError::NoSuchProcess(_) => 3,            // ESRCH
            ProcError::CommandTooLong { .. } => 7,       // E2BIG
            ProcError::CreationFailed(e) => match e.kind() {
                io::ErrorKind::NotFound => 2,            // ENOENT
                io::ErrorKind::PermissionDenied => 13,   // EACCES
                _ => 8,                                  // ENOEXEC
            },
            ProcError::QueryFailed(_) => 10,             // ECHILD
            ProcError::DeliveryFailed(_) => 1,           // EPERM
            ProcError::Interrupted => 4,                 // EINTR
            ProcError::WaitAbandoned(_) => 4,            // EINTR
            ProcError::NotSupported(_) => 38,            // ENOSYS
        }
    }
}

/// Operation counters for one [`ProcessControl`]
///
/// Relaxed atomics; the numbers are observational only.
#[derive(Debug)]
pub struct ProcStats {
    spawned: AtomicU64,
    spawn_failures: AtomicU64,
    reaped: AtomicU64,
    wait_timeouts: AtomicU64,
    signals_delivered: AtomicU64,
    signal_failures: AtomicU64,
}

impl Default for ProcStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcStats {
    /// Create new statistics tracker
    pub const fn new() -> Self {
        Self {
            spawned: AtomicU64::new(0),
            spawn_failures: AtomicU64::new(0),
            reaped: AtomicU64::new(0),
            wait_timeouts: AtomicU64::new(0),
            signals_delivered: AtomicU64::new(0),
            signal_failures: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn record_spawn(&self, ok: bool) {
        if ok {
            self.spawned.fetch_add(1, Ordering::Relaxed);
        } else {
            self.spawn_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_reap(&self) {
        self.reaped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_wait_timeout(&self) {
        self.wait_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_signal(&self, ok: bool) {
        if ok {
            self.signals_delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.signal_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Generate a snapshot
    pub fn report(&self) -> ProcReport {
        ProcReport {
            spawned: self.spawned.load(Ordering::Relaxed),
            spawn_failures: self.spawn_failures.load(Ordering::Relaxed),
            reaped: self.reaped.load(Ordering::Relaxed),
            wait_timeouts: self.wait_timeouts.load(Ordering::Relaxed),
            signals_delivered: self.signals_delivered.load(Ordering::Relaxed),
            signal_failures: self.signal_failures.load(Ordering::Relaxed),
        }
    }

    /// Reset all statistics
    pub fn reset(&self) {
        self.spawned.store(0, Ordering::Relaxed);
        self.spawn_failures.store(0, Ordering::Relaxed);
        self.reaped.store(0, Ordering::Relaxed);
        self.wait_timeouts.store(0, Ordering::Relaxed);
        self.signals_delivered.store(0, Ordering::Relaxed);
        self.signal_failures.store(0, Ordering::Relaxed);
    }
}

/// Statistics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcReport {
    /// Children launched
    pub spawned: u64,
    /// Creation attempts that failed
    pub spawn_failures: u64,
    /// Children whose terminal status was consumed
    pub reaped: u64,
    /// Waits that returned without a status
    pub wait_timeouts: u64,
    /// Signals delivered successfully
    pub signals_delivered: u64,
    /// Signals that failed or were rejected
    pub signal_failures: u64,
}

/// Initialize POSIX-Proc
///
/// Loads `POSIX_PROC_CONFIG` into the global configuration and builds the
/// process-wide [`ProcessControl`]. Calling it is optional: the shims
/// initialize lazily, but then ignore any configuration set afterwards.
///
/// # Errors
///
/// Returns `ProcError::InvalidArgument` if the environment configuration
/// contains a malformed value.
pub fn init() -> Result<()> {
    log::info!("POSIX-Proc v{} initializing...", VERSION);

    PROC_CONFIG.load_from_env()?;
    log::debug!("Configuration: {}", PROC_CONFIG.export_config());

    let control = global();
    log::info!(
        "POSIX-Proc initialized: {} child slots",
        control.table().capacity()
    );
    Ok(())
}
