//! Scripted native backend for unit tests
//!
//! Processes never run: tests decide when they exit, how queries fail and
//! what the next wait reports. An infinite wait with nothing able to fire
//! returns `Failed` instead of hanging the test.

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use spin::Mutex;

use super::{
    ConsoleEvent, LaunchRequest, Launched, NativeExit, NativeProcessApi, ProcessAccess, Timeout,
    WaitOutcome,
};
use crate::compat::Pid;
use crate::spawn::CreationFlags;

/// First pid handed out
pub(crate) const FIRST_PID: Pid = 1000;

/// Pid reported for the calling process
pub(crate) const OWN_PID: Pid = 42;

/// What the last `launch` was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LaunchRecord {
    pub command_line: Option<String>,
    pub program: Option<String>,
    pub flags: CreationFlags,
    pub inherit_handles: bool,
    pub explicit_stdio: [bool; 3],
}

#[derive(Debug)]
pub(crate) struct FakeProcess {
    pid: Pid,
    exit: Mutex<Option<NativeExit>>,
    exit_on_wait: Mutex<Option<u32>>,
    query_fails: Mutex<bool>,
    finalize_delay: Mutex<Option<Duration>>,
}

impl FakeProcess {
    fn new(pid: Pid) -> Self {
        Self {
            pid,
            exit: Mutex::new(None),
            exit_on_wait: Mutex::new(None),
            query_fails: Mutex::new(false),
            finalize_delay: Mutex::new(None),
        }
    }

    fn has_exited(&self) -> bool {
        self.exit.lock().is_some()
    }
}

/// Handle onto a fake process; counts closes
#[derive(Debug)]
pub(crate) struct FakeHandle {
    process: Arc<FakeProcess>,
    closed: Arc<AtomicUsize>,
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct FakeState {
    processes: Vec<Arc<FakeProcess>>,
    fail_launch: Option<io::ErrorKind>,
    fail_console: bool,
    parent: Option<Pid>,
    executable: Option<PathBuf>,
    raised: Vec<i32>,
    console_events: Vec<(ConsoleEvent, Pid)>,
    terminated: Vec<(Pid, u32)>,
    last_launch: Option<LaunchRecord>,
    wait_script: VecDeque<WaitOutcome>,
    next_exit_on_wait: Option<u32>,
}

#[derive(Debug)]
pub(crate) struct FakeNative {
    next_pid: AtomicI32,
    launches: AtomicUsize,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
    state: Mutex<FakeState>,
}

impl Default for FakeNative {
    fn default() -> Self {
        Self {
            next_pid: AtomicI32::new(FIRST_PID),
            launches: AtomicUsize::new(0),
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
            state: Mutex::new(FakeState {
                processes: vec![Arc::new(FakeProcess::new(OWN_PID))],
                parent: Some(7),
                executable: Some(PathBuf::from("/opt/tools/bin/fake-shell")),
                ..FakeState::default()
            }),
        }
    }
}

impl FakeNative {
    fn find(&self, pid: Pid) -> Option<Arc<FakeProcess>> {
        self.state
            .lock()
            .processes
            .iter()
            .find(|p| p.pid == pid)
            .cloned()
    }

    fn handle(&self, process: Arc<FakeProcess>) -> FakeHandle {
        FakeHandle {
            process,
            closed: Arc::clone(&self.closed),
        }
    }

    /// Make `pid` exit now with `code`
    pub fn exit_with(&self, pid: Pid, code: u32) {
        if let Some(p) = self.find(pid) {
            *p.exit.lock() = Some(NativeExit::Exited(code));
        }
    }

    /// Make `pid` exit with `code` once something blocks on it
    pub fn exit_on_wait(&self, pid: Pid, code: u32) {
        if let Some(p) = self.find(pid) {
            *p.exit_on_wait.lock() = Some(code);
        }
    }

    /// Make the next launched process exit with `code` once something blocks on it
    pub fn exit_next_launch_on_wait(&self, code: u32) {
        self.state.lock().next_exit_on_wait = Some(code);
    }

    /// Make exit-code queries on `pid` fail
    pub fn fail_queries(&self, pid: Pid) {
        if let Some(p) = self.find(pid) {
            *p.query_fails.lock() = true;
        }
    }

    /// Make `pid` die from a signal
    pub fn kill_by_signal(&self, pid: Pid, sig: i32) {
        if let Some(p) = self.find(pid) {
            *p.exit.lock() = Some(NativeExit::Signaled(sig));
        }
    }

    /// Make waits that observe `pid`'s exit take `delay`
    pub fn slow_finalize(&self, pid: Pid, delay: Duration) {
        if let Some(p) = self.find(pid) {
            *p.finalize_delay.lock() = Some(delay);
        }
    }

    /// A running process this layer did not create
    pub fn spawn_untracked(&self) -> Pid {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .processes
            .push(Arc::new(FakeProcess::new(pid)));
        pid
    }

    pub fn is_running(&self, pid: Pid) -> bool {
        self.find(pid).map_or(false, |p| !p.has_exited())
    }

    pub fn fail_launch(&self, kind: io::ErrorKind) {
        self.state.lock().fail_launch = Some(kind);
    }

    pub fn fail_console_events(&self) {
        self.state.lock().fail_console = true;
    }

    pub fn set_parent(&self, parent: Option<Pid>) {
        self.state.lock().parent = parent;
    }

    pub fn set_executable(&self, path: Option<PathBuf>) {
        self.state.lock().executable = path;
    }

    /// Queue an outcome for the next `wait_one` / `wait_any`
    pub fn script_wait(&self, outcome: WaitOutcome) {
        self.state.lock().wait_script.push_back(outcome);
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn raised(&self) -> Vec<i32> {
        self.state.lock().raised.clone()
    }

    pub fn console_events(&self) -> Vec<(ConsoleEvent, Pid)> {
        self.state.lock().console_events.clone()
    }

    pub fn terminated(&self) -> Vec<(Pid, u32)> {
        self.state.lock().terminated.clone()
    }

    pub fn last_launch(&self) -> Option<LaunchRecord> {
        self.state.lock().last_launch.clone()
    }
}

impl NativeProcessApi for FakeNative {
    type Handle = FakeHandle;

    fn launch(&self, request: LaunchRequest<'_>) -> io::Result<Launched<FakeHandle>> {
        let mut state = self.state.lock();
        state.last_launch = Some(LaunchRecord {
            command_line: request.command_line.map(str::to_owned),
            program: request.program.map(str::to_owned),
            flags: request.flags,
            inherit_handles: request.security.inherit_handles,
            explicit_stdio: [
                request.stdin.is_some(),
                request.stdout.is_some(),
                request.stderr.is_some(),
            ],
        });
        if let Some(kind) = state.fail_launch {
            return Err(io::Error::from(kind));
        }

        self.launches.fetch_add(1, Ordering::SeqCst);
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let process = Arc::new(FakeProcess::new(pid));
        *process.exit_on_wait.lock() = state.next_exit_on_wait.take();
        state.processes.push(Arc::clone(&process));
        drop(state);

        Ok(Launched {
            pid,
            process: self.handle(process),
        })
    }

    fn exit_status(&self, handle: &FakeHandle) -> io::Result<NativeExit> {
        if *handle.process.query_fails.lock() {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        Ok(handle.process.exit.lock().unwrap_or(NativeExit::StillActive))
    }

    fn wait_one(&self, handle: &FakeHandle, timeout: Timeout) -> WaitOutcome {
        self.wait_any(&[handle], timeout)
    }

    fn wait_any(&self, handles: &[&FakeHandle], timeout: Timeout) -> WaitOutcome {
        if let Some(outcome) = self.state.lock().wait_script.pop_front() {
            return outcome;
        }
        if let Some(index) = handles.iter().position(|h| h.process.has_exited()) {
            let delay = *handles[index].process.finalize_delay.lock();
            if let Some(delay) = delay {
                thread::sleep(delay);
            }
            return WaitOutcome::Signalled(index);
        }
        if timeout == Timeout::Immediate {
            return WaitOutcome::TimedOut;
        }
        for (index, handle) in handles.iter().enumerate() {
            if let Some(code) = handle.process.exit_on_wait.lock().take() {
                *handle.process.exit.lock() = Some(NativeExit::Exited(code));
                return WaitOutcome::Signalled(index);
            }
        }
        WaitOutcome::Failed(io::Error::new(
            io::ErrorKind::WouldBlock,
            "infinite wait with nothing scheduled to exit",
        ))
    }

    fn open_process(&self, pid: Pid, _access: ProcessAccess) -> Option<FakeHandle> {
        let process = self.find(pid).filter(|p| !p.has_exited())?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        Some(self.handle(process))
    }

    fn terminate(&self, handle: &FakeHandle, exit_code: u32) -> io::Result<()> {
        let mut exit = handle.process.exit.lock();
        if exit.is_some() {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        *exit = Some(NativeExit::Exited(exit_code));
        drop(exit);
        self.state
            .lock()
            .terminated
            .push((handle.process.pid, exit_code));
        Ok(())
    }

    fn console_event(&self, event: ConsoleEvent, group: Pid) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.fail_console {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        state.console_events.push((event, group));
        Ok(())
    }

    fn raise(&self, sig: i32) -> i32 {
        self.state.lock().raised.push(sig);
        0
    }

    fn current_pid(&self) -> Pid {
        OWN_PID
    }

    fn parent_pid(&self) -> Option<Pid> {
        self.state.lock().parent
    }

    fn executable_path(&self) -> Option<PathBuf> {
        self.state.lock().executable.clone()
    }
}
