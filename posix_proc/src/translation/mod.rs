//! # POSIX Shims
//!
//! C-style entry points over a process-wide [`ProcessControl`]: results
//! come back as the usual sentinels (`-1` on failure, `0` for "nothing yet")
//! and the failure cause is left in a thread-local [`errno`].
//!
//! ## Mapping
//!
//! | Call      | Typed operation                     |
//! |-----------|-------------------------------------|
//! | `spawn`   | [`ProcessControl::create_process`]  |
//! | `waitpid` | [`ProcessControl::wait`]            |
//! | `kill`    | [`ProcessControl::signal`]          |
//! | `getppid` | [`ProcessControl::parent_id`]       |
//! | `fork`    | always fails with `ENOSYS`          |

use std::cell::Cell;

use crate::compat::Pid;
use crate::config::get_config;
use crate::control::ProcessControl;
use crate::kernel_interface::{HostNative, NativeProcessApi};
use crate::spawn::{ChildSpec, SpawnMode, SpawnOutcome};
use crate::wait::{WaitOptions, WaitTarget};
use crate::{ProcError, Result};

thread_local! {
    static ERRNO: Cell<i32> = const { Cell::new(0) };
}

static GLOBAL: spin::Once<ProcessControl<HostNative>> = spin::Once::new();

/// Process-wide control, built from the global configuration on first use
pub fn global() -> &'static ProcessControl<HostNative> {
    GLOBAL.call_once(|| {
        log::debug!("Building process-wide control: {}", get_config().export_config());
        ProcessControl::with_config(HostNative::default(), get_config())
    })
}

/// Last error number set by a shim on this thread
pub fn errno() -> i32 {
    ERRNO.with(Cell::get)
}

fn set_errno(value: i32) {
    ERRNO.with(|errno| errno.set(value));
}

/// Record `e` in errno and return the failure sentinel
fn fail(call: &str, e: ProcError) -> i32 {
    log::trace!("{} failed: {}", call, e);
    set_errno(e.to_errno());
    -1
}

/// `waitpid(pid, stat_loc, options)`
///
/// Returns the reaped pid, `0` if nothing terminated, `-1` on failure.
pub fn waitpid(pid: Pid, stat_loc: Option<&mut i32>, options: i32) -> Pid {
    waitpid_on(global(), pid, stat_loc, options)
}

/// `kill(pid, sig)`: `0` on success, `-1` on failure
pub fn kill(pid: Pid, sig: i32) -> i32 {
    kill_on(global(), pid, sig)
}

/// `spawn(mode, cmd, prog)`
///
/// - `P_NOWAIT`: the child's pid.
/// - `P_WAIT`: the child's exit code (`128 + signal` if it was killed).
/// - `P_OVERLAY`: does not return; the caller exits with the child's code.
///
/// `-1` on failure.
pub fn spawn(mode: i32, cmd: Option<&str>, prog: Option<&str>) -> Pid {
    match spawn_on(global(), mode, cmd, prog) {
        Ok(SpawnOutcome::ProcessWillBeReplaced(replaced)) => replaced.exit(),
        other => spawn_result(other),
    }
}

/// `getppid()`: `0` when unknown
pub fn getppid() -> Pid {
    global().parent_id()
}

/// Full path of the running executable
pub fn argv0() -> String {
    global().own_executable_path()
}

/// File name of the running executable
pub fn progname() -> String {
    global().own_executable_name()
}

/// `fork()`: duplicating the caller is impossible here
pub fn fork() -> Pid {
    fail("fork", ProcError::NotSupported("fork"))
}

fn waitpid_on<N: NativeProcessApi>(
    control: &ProcessControl<N>,
    pid: Pid,
    stat_loc: Option<&mut i32>,
    options: i32,
) -> Pid {
    let result = WaitOptions::from_bits(options)
        .ok_or_else(|| ProcError::InvalidArgument(format!("wait options {:#x}", options)))
        .and_then(|options| Ok((WaitTarget::from_raw(pid)?, options)))
        .and_then(|(target, options)| control.wait(target, options));

    match result {
        Ok(Some(reaped)) => {
            if let Some(stat_loc) = stat_loc {
                *stat_loc = reaped.status.raw();
            }
            reaped.pid
        }
        Ok(None) => 0,
        Err(e) => fail("waitpid", e),
    }
}

fn kill_on<N: NativeProcessApi>(control: &ProcessControl<N>, pid: Pid, sig: i32) -> i32 {
    match control.signal(pid, sig) {
        Ok(()) => 0,
        Err(e) => fail("kill", e),
    }
}

fn spawn_on<N: NativeProcessApi>(
    control: &ProcessControl<N>,
    mode: i32,
    cmd: Option<&str>,
    prog: Option<&str>,
) -> Result<SpawnOutcome> {
    let mode = SpawnMode::from_raw(mode)?;
    let mut spec = ChildSpec::new();
    if let Some(cmd) = cmd {
        spec = spec.command_line(cmd);
    }
    if let Some(prog) = prog {
        spec = spec.program(prog);
    }
    control.create_process(spec, mode)
}

/// Sentinel for every outcome a shim can return to its caller
fn spawn_result(result: Result<SpawnOutcome>) -> Pid {
    match result {
        Ok(SpawnOutcome::Background(pid)) => pid,
        Ok(SpawnOutcome::Completed(reaped)) => reaped.status.shell_code(),
        Ok(SpawnOutcome::ProcessWillBeReplaced(replaced)) => replaced.exit_code(),
        Err(e) => fail("spawn", e),
    }
}
