//! unix backend
//!
//! Processes are created with `std::process::Command`. There is no
//! wait-any-with-timeout primitive that leaves the exit status readable
//! afterwards, so waits poll `try_wait` (which caches the status once
//! reaped) at the configured interval.
//!
//! Command lines run through `/bin/sh -c` unless an explicit program is
//! given, in which case the command line's words become that program's
//! arguments (the first word is its `argv[0]`).

use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use spin::Mutex;

use super::resolver::Capability;
use super::{
    ConsoleEvent, LaunchRequest, Launched, NativeExit, NativeProcessApi, ProcessAccess,
    StdioHandle, Timeout, WaitOutcome,
};
use crate::compat::Pid;
use crate::config::get_config;
use crate::spawn::CreationFlags;

/// Shell used for bare command lines
const SHELL: &str = "/bin/sh";

type GetPpidFn = unsafe extern "C" fn() -> libc::pid_t;

static GETPPID: Capability<GetPpidFn> = unsafe { Capability::new(None, "getppid") };

/// Process handle on unix
#[derive(Debug)]
pub enum UnixProcess {
    /// Created by this backend; its status is owned by us
    Spawned {
        /// Process id
        pid: Pid,
        /// std child, reaped through `try_wait`
        child: Mutex<Child>,
    },
    /// Opened by pid; only liveness is observable
    Opened {
        /// Process id
        pid: Pid,
    },
}

impl UnixProcess {
    /// Process id behind the handle
    pub fn pid(&self) -> Pid {
        match self {
            UnixProcess::Spawned { pid, .. } | UnixProcess::Opened { pid } => *pid,
        }
    }
}

/// Native API implemented on unix
#[derive(Debug, Clone)]
pub struct UnixNative {
    poll_interval: Duration,
}

impl Default for UnixNative {
    fn default() -> Self {
        Self::new(Duration::from_millis(u64::from(get_config().get_poll_interval_ms())))
    }
}

impl UnixNative {
    /// Backend polling at the given interval
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    fn build_command(request: &LaunchRequest<'_>) -> io::Result<Command> {
        let command = match (request.program, request.command_line) {
            (Some(program), Some(line)) => {
                let words = split_command_line(line);
                let mut command = Command::new(program);
                if let Some((arg0, args)) = words.split_first() {
                    command.arg0(arg0).args(args);
                }
                command
            }
            (Some(program), None) => Command::new(program),
            (None, Some(line)) => {
                let mut command = Command::new(SHELL);
                command.arg("-c").arg(line);
                command
            }
            (None, None) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "neither program nor command line",
                ))
            }
        };
        Ok(command)
    }

    fn poll<F>(&self, timeout: Timeout, mut check: F) -> WaitOutcome
    where
        F: FnMut() -> Option<WaitOutcome>,
    {
        loop {
            if let Some(outcome) = check() {
                return outcome;
            }
            if timeout == Timeout::Immediate {
                return WaitOutcome::TimedOut;
            }
            thread::sleep(self.poll_interval);
        }
    }
}

fn stdio(handle: Option<StdioHandle>) -> Stdio {
    match handle {
        Some(handle) => Stdio::from(handle.into_inner()),
        None => Stdio::inherit(),
    }
}

fn native_exit(status: std::process::ExitStatus) -> NativeExit {
    match (status.code(), status.signal()) {
        (Some(code), _) => NativeExit::Exited(code as u32),
        (None, Some(sig)) => NativeExit::Signaled(sig),
        (None, None) => NativeExit::Exited(0),
    }
}

/// `kill(pid, sig)` as an `io::Result`
fn send_signal(pid: Pid, sig: i32) -> io::Result<()> {
    // SAFETY: kill has no memory-safety preconditions.
    if unsafe { libc::kill(pid, sig) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Whether `pid` names an existing process we may query
fn process_exists(pid: Pid, need_signal_permission: bool) -> bool {
    match send_signal(pid, 0) {
        Ok(()) => true,
        Err(e) => !need_signal_permission && e.raw_os_error() == Some(libc::EPERM),
    }
}

/// Split a command line into words: whitespace separated, double quotes group
pub(crate) fn split_command_line(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                in_word = true;
            }
            '\\' if chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
                in_word = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

impl NativeProcessApi for UnixNative {
    type Handle = UnixProcess;

    fn launch(&self, mut request: LaunchRequest<'_>) -> io::Result<Launched<UnixProcess>> {
        let mut command = Self::build_command(&request)?;

        command
            .stdin(stdio(request.stdin.take()))
            .stdout(stdio(request.stdout.take()))
            .stderr(stdio(request.stderr.take()));

        if request
            .flags
            .intersects(CreationFlags::NEW_PROCESS_GROUP | CreationFlags::DETACHED_PROCESS)
        {
            command.process_group(0);
        }
        log::trace!(
            "unix launch: program={:?} flags={:?}",
            request.program,
            request.flags
        );

        let child = command.spawn()?;
        let pid = child.id() as Pid;
        Ok(Launched {
            pid,
            process: UnixProcess::Spawned {
                pid,
                child: Mutex::new(child),
            },
        })
    }

    fn exit_status(&self, handle: &UnixProcess) -> io::Result<NativeExit> {
        match handle {
            UnixProcess::Spawned { child, .. } => Ok(child
                .lock()
                .try_wait()?
                .map_or(NativeExit::StillActive, native_exit)),
            UnixProcess::Opened { pid } => {
                if process_exists(*pid, false) {
                    Ok(NativeExit::StillActive)
                } else {
                    Err(io::Error::from_raw_os_error(libc::ESRCH))
                }
            }
        }
    }

    fn wait_one(&self, handle: &UnixProcess, timeout: Timeout) -> WaitOutcome {
        self.wait_any(&[handle], timeout)
    }

    fn wait_any(&self, handles: &[&UnixProcess], timeout: Timeout) -> WaitOutcome {
        if handles.is_empty() {
            return WaitOutcome::Failed(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no handles to wait on",
            ));
        }
        self.poll(timeout, || {
            for (index, handle) in handles.iter().enumerate() {
                match self.exit_status(handle) {
                    Ok(NativeExit::StillActive) => {}
                    Ok(_) => return Some(WaitOutcome::Signalled(index)),
                    // An opened pid that vanished has terminated.
                    Err(_) if matches!(handle, UnixProcess::Opened { .. }) => {
                        return Some(WaitOutcome::Signalled(index))
                    }
                    Err(e) => return Some(WaitOutcome::Failed(e)),
                }
            }
            None
        })
    }

    fn open_process(&self, pid: Pid, access: ProcessAccess) -> Option<UnixProcess> {
        if pid <= 0 {
            return None;
        }
        process_exists(pid, access == ProcessAccess::QueryTerminate)
            .then_some(UnixProcess::Opened { pid })
    }

    fn terminate(&self, handle: &UnixProcess, _exit_code: u32) -> io::Result<()> {
        // unix cannot choose the exit code of a killed process.
        match handle {
            UnixProcess::Spawned { child, .. } => child.lock().kill(),
            UnixProcess::Opened { pid } => send_signal(*pid, libc::SIGKILL),
        }
    }

    fn console_event(&self, event: ConsoleEvent, group: Pid) -> io::Result<()> {
        match event {
            // kill(0, ...) reaches the caller's whole process group.
            ConsoleEvent::CtrlC => send_signal(0, libc::SIGINT),
            ConsoleEvent::CtrlBreak => send_signal(group, libc::SIGINT),
        }
    }

    fn raise(&self, sig: i32) -> i32 {
        // SAFETY: raise has no memory-safety preconditions.
        unsafe { libc::raise(sig) }
    }

    fn current_pid(&self) -> Pid {
        std::process::id() as Pid
    }

    fn parent_pid(&self) -> Option<Pid> {
        let getppid = GETPPID.probe()?;
        // SAFETY: the capability was declared with getppid's exact signature.
        Some(unsafe { getppid() })
    }

    fn executable_path(&self) -> Option<PathBuf> {
        std::env::current_exe().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel_interface::SecurityAttributes;

    #[test]
    fn test_split_command_line() {
        assert_eq!(split_command_line("sh -c  \"exit 4\""), vec!["sh", "-c", "exit 4"]);
        assert_eq!(split_command_line("  a \"\" b  "), vec!["a", "", "b"]);
        assert_eq!(split_command_line("echo \\\"hi\\\""), vec!["echo", "\"hi\""]);
        assert!(split_command_line("   ").is_empty());
    }

    #[test]
    fn test_open_process_rejects_non_positive_pids() {
        let native = UnixNative::default();
        assert!(native.open_process(0, ProcessAccess::Query).is_none());
        assert!(native.open_process(-5, ProcessAccess::Query).is_none());
    }

    #[test]
    fn test_open_self_for_query() {
        let native = UnixNative::default();
        let own = native.current_pid();
        let handle = native.open_process(own, ProcessAccess::Query).unwrap();
        assert_eq!(handle.pid(), own);
        assert_eq!(native.exit_status(&handle).unwrap(), NativeExit::StillActive);
    }

    #[test]
    fn test_parent_pid_matches_std() {
        let native = UnixNative::default();
        assert_eq!(
            native.parent_pid().map(|p| p as u32),
            Some(std::os::unix::process::parent_id())
        );
    }

    #[test]
    fn test_inherit_handles_does_not_change_launch() {
        let native = UnixNative::default();
        for inherit_handles in [true, false] {
            let launched = native
                .launch(LaunchRequest {
                    command_line: Some("exit 3"),
                    program: None,
                    security: SecurityAttributes { inherit_handles },
                    stdin: None,
                    stdout: None,
                    stderr: None,
                    flags: CreationFlags::empty(),
                })
                .unwrap();
            assert!(matches!(
                native.wait_one(&launched.process, Timeout::Infinite),
                WaitOutcome::Signalled(0)
            ));
            assert_eq!(native.exit_status(&launched.process).unwrap(), NativeExit::Exited(3));
        }
    }
}
