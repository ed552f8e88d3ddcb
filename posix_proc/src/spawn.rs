//! Child Creator
//!
//! Creates a native process from a prepared command line, wires its
//! standard streams and registers it in the child table. Creation never
//! duplicates the caller: `fork` has no counterpart here.

use bitflags::bitflags;

use crate::compat::{spawn_modes, Pid};
use crate::control::ProcessControl;
use crate::kernel_interface::{
    LaunchRequest, NativeProcessApi, SecurityAttributes, StdioHandle, MAX_COMMAND_LINE,
};
use crate::table::LiveChild;
use crate::wait::{Reaped, WaitOptions, WaitTarget};
use crate::{ProcError, Result};

bitflags! {
    /// Process creation flags (native `dwCreationFlags` values)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CreationFlags: u32 {
        /// Child gets its own console
        const DETACHED_PROCESS = 0x0000_0008;
        /// Child gets a new console
        const NEW_CONSOLE = 0x0000_0010;
        /// Child leads a new process group
        const NEW_PROCESS_GROUP = 0x0000_0200;
        /// Console child without a window
        const NO_WINDOW = 0x0800_0000;

        /// Normal priority class, added when no class is given
        const NORMAL_PRIORITY = 0x0000_0020;
        /// Idle priority class
        const IDLE_PRIORITY = 0x0000_0040;
        /// High priority class
        const HIGH_PRIORITY = 0x0000_0080;
        /// Realtime priority class
        const REALTIME_PRIORITY = 0x0000_0100;
        /// Below-normal priority class
        const BELOW_NORMAL_PRIORITY = 0x0000_4000;
        /// Above-normal priority class
        const ABOVE_NORMAL_PRIORITY = 0x0000_8000;

        /// Every priority class bit
        const PRIORITY_CLASSES = Self::NORMAL_PRIORITY.bits()
            | Self::IDLE_PRIORITY.bits()
            | Self::HIGH_PRIORITY.bits()
            | Self::REALTIME_PRIORITY.bits()
            | Self::BELOW_NORMAL_PRIORITY.bits()
            | Self::ABOVE_NORMAL_PRIORITY.bits();
    }
}

/// What to run and how to wire it
///
/// At least one of the command line and the program path must be set.
#[derive(Debug, Default)]
pub struct ChildSpec {
    command_line: Option<String>,
    program: Option<String>,
    security: Option<SecurityAttributes>,
    stdin: Option<StdioHandle>,
    stdout: Option<StdioHandle>,
    stderr: Option<StdioHandle>,
    flags: CreationFlags,
}

impl ChildSpec {
    /// Empty specification
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a command line
    pub fn command(line: impl Into<String>) -> Self {
        Self::new().command_line(line)
    }

    /// Set the command line
    pub fn command_line(mut self, line: impl Into<String>) -> Self {
        self.command_line = Some(line.into());
        self
    }

    /// Run this executable instead of resolving the command line's first word
    pub fn program(mut self, path: impl Into<String>) -> Self {
        self.program = Some(path.into());
        self
    }

    /// Override handle inheritance
    pub fn security(mut self, security: SecurityAttributes) -> Self {
        self.security = Some(security);
        self
    }

    /// Explicit stdin
    pub fn stdin(mut self, handle: impl Into<StdioHandle>) -> Self {
        self.stdin = Some(handle.into());
        self
    }

    /// Explicit stdout
    pub fn stdout(mut self, handle: impl Into<StdioHandle>) -> Self {
        self.stdout = Some(handle.into());
        self
    }

    /// Explicit stderr
    pub fn stderr(mut self, handle: impl Into<StdioHandle>) -> Self {
        self.stderr = Some(handle.into());
        self
    }

    /// Creation flags
    pub fn flags(mut self, flags: CreationFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// How `spawn` treats the created child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnMode {
    /// Wait for the child and return its status
    Wait,
    /// Return the child's pid immediately
    NoWait,
    /// Run the child in place of the caller
    Overlay,
}

impl SpawnMode {
    /// From a `P_*` value
    pub fn from_raw(mode: i32) -> Result<Self> {
        match mode {
            spawn_modes::P_WAIT => Ok(SpawnMode::Wait),
            spawn_modes::P_NOWAIT => Ok(SpawnMode::NoWait),
            spawn_modes::P_OVERLAY => Ok(SpawnMode::Overlay),
            other => Err(ProcError::InvalidArgument(format!("spawn mode {}", other))),
        }
    }
}

/// Result of [`ProcessControl::create_process`]
#[derive(Debug)]
pub enum SpawnOutcome {
    /// Child is running in the background
    Background(Pid),
    /// Child ran to completion
    Completed(Reaped),
    /// Child ran to completion in place of the caller, which must now exit
    ProcessWillBeReplaced(ReplacedProcess),
}

/// Exit the caller must perform after an overlay spawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "an overlaid caller must exit with the child's code"]
pub struct ReplacedProcess {
    exit_code: i32,
}

impl ReplacedProcess {
    /// Exit code the caller should terminate with
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Terminate the calling process with the child's exit code
    pub fn exit(self) -> ! {
        log::debug!("Replaced process exiting with {}", self.exit_code);
        std::process::exit(self.exit_code)
    }
}

impl<N: NativeProcessApi> ProcessControl<N> {
    /// Create and register a child
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if neither command line nor program is given, or
    ///   (strict mode) if either contains a NUL.
    /// - `ResourceExhausted` if the table is full; nothing is launched.
    /// - `CommandTooLong` if the command line exceeds the native limit.
    /// - `CreationFailed` if the native launch fails.
    pub fn create_child(&self, spec: ChildSpec) -> Result<LiveChild<N::Handle>> {
        let result = self.create_child_inner(spec);
        match &result {
            Ok(child) => log::debug!("Created child {} in slot {}", child.pid(), child.slot().index()),
            Err(e) => log::debug!("Child creation failed: {}", e),
        }
        self.stats.record_spawn(result.is_ok());
        result
    }

    fn create_child_inner(&self, spec: ChildSpec) -> Result<LiveChild<N::Handle>> {
        if spec.command_line.is_none() && spec.program.is_none() {
            return Err(ProcError::InvalidArgument(
                "neither command line nor program given".into(),
            ));
        }

        let reservation = self.table.reserve_free_slot()?;

        let mut flags = spec.flags;
        if !flags.intersects(CreationFlags::PRIORITY_CLASSES) {
            flags |= CreationFlags::NORMAL_PRIORITY;
        }

        let command_line = spec
            .command_line
            .as_deref()
            .map(|line| self.terminate_at_nul(line))
            .transpose()?;
        let program = spec
            .program
            .as_deref()
            .map(|path| self.terminate_at_nul(path))
            .transpose()?;

        if let Some(line) = command_line {
            let len = line.encode_utf16().count();
            if len > MAX_COMMAND_LINE {
                return Err(ProcError::CommandTooLong {
                    len,
                    max: MAX_COMMAND_LINE,
                });
            }
        }

        let request = LaunchRequest {
            command_line,
            program,
            security: spec.security.unwrap_or_default(),
            stdin: spec.stdin,
            stdout: spec.stdout,
            stderr: spec.stderr,
            flags,
        };
        let launched = self.native.launch(request).map_err(ProcError::CreationFailed)?;

        Ok(reservation.populate(launched.pid, launched.process))
    }

    /// Cut a native string at its first NUL, or reject it in strict mode
    fn terminate_at_nul<'a>(&self, s: &'a str) -> Result<&'a str> {
        match s.find('\0') {
            None => Ok(s),
            Some(_) if self.strict_mode => {
                Err(ProcError::InvalidArgument("interior NUL in command".into()))
            }
            Some(end) => Ok(&s[..end]),
        }
    }

    /// Create a child and treat it according to `mode`
    ///
    /// In [`SpawnMode::Overlay`] the child is waited for and the caller gets
    /// [`SpawnOutcome::ProcessWillBeReplaced`]; exiting is left to it.
    ///
    /// If a blocking wait gives up, the error is `WaitAbandoned(pid)` and the
    /// child stays tracked under that pid.
    pub fn create_process(&self, spec: ChildSpec, mode: SpawnMode) -> Result<SpawnOutcome> {
        let child = self.create_child(spec)?;
        let pid = child.pid();
        drop(child);

        match mode {
            SpawnMode::NoWait => Ok(SpawnOutcome::Background(pid)),
            SpawnMode::Wait => Ok(SpawnOutcome::Completed(self.wait_for_completion(pid)?)),
            SpawnMode::Overlay => {
                let reaped = self.wait_for_completion(pid)?;
                Ok(SpawnOutcome::ProcessWillBeReplaced(ReplacedProcess {
                    exit_code: reaped.status.shell_code(),
                }))
            }
        }
    }

    fn wait_for_completion(&self, pid: Pid) -> Result<Reaped> {
        self.wait(WaitTarget::Pid(pid), WaitOptions::empty())?
            .ok_or(ProcError::WaitAbandoned(pid))
    }
}
