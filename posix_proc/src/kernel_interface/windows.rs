//! Win32 backend
//!
//! Direct mapping onto the Win32 process API: `CreateProcessW`,
//! `GetExitCodeProcess`, `WaitForMultipleObjects`, `OpenProcess`,
//! `TerminateProcess`, `GenerateConsoleCtrlEvent`. The parent pid comes from
//! `NtQueryInformationProcess`, which is probed at runtime.

use core::ffi::c_void;
use std::io;
use std::iter;
use std::mem;
use std::os::windows::ffi::OsStringExt;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};
use std::path::PathBuf;
use std::ptr;

use windows_sys::Win32::Foundation::{
    SetHandleInformation, HANDLE, HANDLE_FLAG_INHERIT, STILL_ACTIVE, WAIT_FAILED, WAIT_OBJECT_0,
    WAIT_TIMEOUT,
};
use windows_sys::Win32::Security::SECURITY_ATTRIBUTES;
use windows_sys::Win32::System::Console::{
    GenerateConsoleCtrlEvent, GetStdHandle, CTRL_BREAK_EVENT, CTRL_C_EVENT, STD_ERROR_HANDLE,
    STD_INPUT_HANDLE, STD_OUTPUT_HANDLE,
};
use windows_sys::Win32::System::LibraryLoader::GetModuleFileNameW;
use windows_sys::Win32::System::Threading::{
    CreateProcessW, GetCurrentProcess, GetCurrentProcessId, GetExitCodeProcess, OpenProcess,
    TerminateProcess, WaitForMultipleObjects, INFINITE,
    PROCESS_INFORMATION, PROCESS_QUERY_INFORMATION, PROCESS_TERMINATE, STARTF_USESTDHANDLES,
    STARTUPINFOW,
};

use super::resolver::Capability;
use super::{
    ConsoleEvent, LaunchRequest, Launched, NativeExit, NativeProcessApi, ProcessAccess,
    StdioHandle, Timeout, WaitOutcome,
};
use crate::compat::Pid;

/// `MAXIMUM_WAIT_OBJECTS`
const MAX_WAIT_OBJECTS: usize = 64;

/// Sleep between chunk sweeps when more than 64 handles are waited on
const CHUNK_SWEEP_MS: u32 = 10;

/// `MAX_PATH`
const MAX_PATH: usize = 260;

/// Upper bound for the module path buffer (long-path aware)
const MAX_LONG_PATH: usize = 32768;

type NtQueryInformationProcessFn =
    unsafe extern "system" fn(HANDLE, i32, *mut c_void, u32, *mut u32) -> i32;

static NT_QUERY_INFORMATION_PROCESS: Capability<NtQueryInformationProcessFn> =
    unsafe { Capability::new(Some("ntdll.dll"), "NtQueryInformationProcess") };

/// `PROCESS_BASIC_INFORMATION`
#[repr(C)]
struct ProcessBasicInformation {
    exit_status: i32,
    peb_base_address: *mut c_void,
    affinity_mask: usize,
    base_priority: usize,
    unique_process_id: usize,
    parent_process_id: usize,
}

/// Owned Win32 process handle
#[derive(Debug)]
pub struct WindowsProcess(OwnedHandle);

impl WindowsProcess {
    fn raw(&self) -> HANDLE {
        self.0.as_raw_handle() as HANDLE
    }

    /// Take ownership of a raw handle, rejecting null
    fn from_raw(raw: HANDLE) -> Option<Self> {
        if raw.is_null() {
            None
        } else {
            // SAFETY: raw is a live handle we own and nothing else closes.
            Some(Self(unsafe { OwnedHandle::from_raw_handle(raw as _) }))
        }
    }
}

/// Native API implemented on Win32
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsNative;

fn last_error() -> io::Error {
    io::Error::last_os_error()
}

fn check(ok: i32) -> io::Result<()> {
    if ok != 0 {
        Ok(())
    } else {
        Err(last_error())
    }
}

fn timeout_ms(timeout: Timeout) -> u32 {
    match timeout {
        Timeout::Immediate => 0,
        Timeout::Infinite => INFINITE,
    }
}

/// Map a wait result for `count` handles
fn wait_outcome(ret: u32, count: usize) -> WaitOutcome {
    if ret == WAIT_TIMEOUT {
        return WaitOutcome::TimedOut;
    }
    if ret == WAIT_FAILED {
        return WaitOutcome::Failed(last_error());
    }
    match ret.checked_sub(WAIT_OBJECT_0) {
        Some(index) if (index as usize) < count => WaitOutcome::Signalled(index as usize),
        Some(index) if index as usize == count => WaitOutcome::Interrupted,
        _ => WaitOutcome::Failed(io::Error::new(
            io::ErrorKind::Other,
            format!("unexpected wait result {:#x}", ret),
        )),
    }
}

/// Mark a caller-supplied stdio handle inheritable, or fall back to ours
fn stdio_handle(handle: &Option<StdioHandle>, std_id: u32) -> io::Result<HANDLE> {
    match handle {
        Some(handle) => {
            let raw = handle_raw(handle);
            // SAFETY: raw is a live handle owned by the request.
            check(unsafe { SetHandleInformation(raw, HANDLE_FLAG_INHERIT, HANDLE_FLAG_INHERIT) })?;
            Ok(raw)
        }
        // SAFETY: GetStdHandle has no preconditions.
        None => Ok(unsafe { GetStdHandle(std_id) }),
    }
}

fn handle_raw(handle: &StdioHandle) -> HANDLE {
    handle.0.as_raw_handle() as HANDLE
}

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(iter::once(0)).collect()
}

impl NativeProcessApi for WindowsNative {
    type Handle = WindowsProcess;

    fn launch(&self, request: LaunchRequest<'_>) -> io::Result<Launched<WindowsProcess>> {
        let mut sa = SECURITY_ATTRIBUTES {
            nLength: mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
            lpSecurityDescriptor: ptr::null_mut(),
            bInheritHandle: i32::from(request.security.inherit_handles),
        };

        // SAFETY: STARTUPINFOW is a plain C struct; all-zero is its documented default.
        let mut startup: STARTUPINFOW = unsafe { mem::zeroed() };
        startup.cb = mem::size_of::<STARTUPINFOW>() as u32;
        startup.dwFlags = STARTF_USESTDHANDLES;
        startup.hStdInput = stdio_handle(&request.stdin, STD_INPUT_HANDLE)?;
        startup.hStdOutput = stdio_handle(&request.stdout, STD_OUTPUT_HANDLE)?;
        startup.hStdError = stdio_handle(&request.stderr, STD_ERROR_HANDLE)?;

        let program = request.program.map(to_wide);
        let mut command_line = request.command_line.map(to_wide);
        // SAFETY: PROCESS_INFORMATION is a plain C struct filled in by CreateProcessW.
        let mut info: PROCESS_INFORMATION = unsafe { mem::zeroed() };

        // SAFETY: every pointer is null or points into a live, NUL-terminated
        // buffer or a struct initialized above; command_line is mutable as
        // CreateProcessW requires.
        let created = unsafe {
            CreateProcessW(
                program.as_ref().map_or(ptr::null(), |p| p.as_ptr()),
                command_line.as_mut().map_or(ptr::null_mut(), |c| c.as_mut_ptr()),
                &mut sa,
                &mut sa,
                sa.bInheritHandle,
                request.flags.bits(),
                ptr::null(),
                ptr::null(),
                &startup,
                &mut info,
            )
        };
        check(created)?;

        // The creator never keeps the primary thread handle.
        drop(WindowsProcess::from_raw(info.hThread));
        let process = WindowsProcess::from_raw(info.hProcess)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "null process handle"))?;

        Ok(Launched {
            pid: info.dwProcessId as Pid,
            process,
        })
    }

    fn exit_status(&self, handle: &WindowsProcess) -> io::Result<NativeExit> {
        let mut code = 0u32;
        // SAFETY: live process handle, valid out pointer.
        check(unsafe { GetExitCodeProcess(handle.raw(), &mut code) })?;
        if code == STILL_ACTIVE as u32 {
            Ok(NativeExit::StillActive)
        } else {
            Ok(NativeExit::Exited(code))
        }
    }

    fn wait_one(&self, handle: &WindowsProcess, timeout: Timeout) -> WaitOutcome {
        let raw = handle.raw();
        // SAFETY: one live handle.
        let ret = unsafe { WaitForMultipleObjects(1, &raw, 0, timeout_ms(timeout)) };
        wait_outcome(ret, 1)
    }

    fn wait_any(&self, handles: &[&WindowsProcess], timeout: Timeout) -> WaitOutcome {
        let raw: Vec<HANDLE> = handles.iter().map(|h| h.raw()).collect();

        if raw.len() <= MAX_WAIT_OBJECTS {
            // SAFETY: raw holds raw.len() live handles.
            let ret = unsafe {
                WaitForMultipleObjects(raw.len() as u32, raw.as_ptr(), 0, timeout_ms(timeout))
            };
            return wait_outcome(ret, raw.len());
        }

        // More handles than one wait accepts: sweep the chunks without
        // blocking, sleeping between sweeps unless the caller asked not to.
        loop {
            for (chunk_index, chunk) in raw.chunks(MAX_WAIT_OBJECTS).enumerate() {
                // SAFETY: chunk holds chunk.len() live handles.
                let ret = unsafe { WaitForMultipleObjects(chunk.len() as u32, chunk.as_ptr(), 0, 0) };
                match wait_outcome(ret, chunk.len()) {
                    WaitOutcome::TimedOut => {}
                    WaitOutcome::Signalled(i) => {
                        return WaitOutcome::Signalled(chunk_index * MAX_WAIT_OBJECTS + i)
                    }
                    other => return other,
                }
            }
            if timeout == Timeout::Immediate {
                return WaitOutcome::TimedOut;
            }
            std::thread::sleep(std::time::Duration::from_millis(u64::from(CHUNK_SWEEP_MS)));
        }
    }

    fn open_process(&self, pid: Pid, access: ProcessAccess) -> Option<WindowsProcess> {
        let rights = match access {
            ProcessAccess::Query => PROCESS_QUERY_INFORMATION,
            ProcessAccess::QueryTerminate => PROCESS_TERMINATE | PROCESS_QUERY_INFORMATION,
        };
        // SAFETY: OpenProcess has no memory-safety preconditions.
        let raw = unsafe { OpenProcess(rights, 0, pid as u32) };
        WindowsProcess::from_raw(raw)
    }

    fn terminate(&self, handle: &WindowsProcess, exit_code: u32) -> io::Result<()> {
        // SAFETY: live process handle opened with terminate rights.
        check(unsafe { TerminateProcess(handle.raw(), exit_code) })
    }

    fn console_event(&self, event: ConsoleEvent, group: Pid) -> io::Result<()> {
        let event = match event {
            ConsoleEvent::CtrlC => CTRL_C_EVENT,
            ConsoleEvent::CtrlBreak => CTRL_BREAK_EVENT,
        };
        // SAFETY: GenerateConsoleCtrlEvent has no memory-safety preconditions.
        check(unsafe { GenerateConsoleCtrlEvent(event, group as u32) })
    }

    fn raise(&self, sig: i32) -> i32 {
        // SAFETY: CRT raise has no memory-safety preconditions.
        unsafe { libc::raise(sig) }
    }

    fn current_pid(&self) -> Pid {
        // SAFETY: no preconditions.
        unsafe { GetCurrentProcessId() as Pid }
    }

    fn parent_pid(&self) -> Option<Pid> {
        let query = NT_QUERY_INFORMATION_PROCESS.probe()?;
        // SAFETY: all-zero is a valid value for this plain C struct.
        let mut info: ProcessBasicInformation = unsafe { mem::zeroed() };
        let mut len = 0u32;
        // SAFETY: the pseudo-handle is always valid; class 0 fills exactly
        // PROCESS_BASIC_INFORMATION into the buffer we pass.
        let status = unsafe {
            query(
                GetCurrentProcess(),
                0,
                &mut info as *mut ProcessBasicInformation as *mut c_void,
                mem::size_of::<ProcessBasicInformation>() as u32,
                &mut len,
            )
        };
        (status == 0).then_some(info.parent_process_id as Pid)
    }

    fn executable_path(&self) -> Option<PathBuf> {
        let mut capacity = MAX_PATH + 1;
        loop {
            let mut buf = vec![0u16; capacity];
            // SAFETY: null module = this executable; buf has `capacity` units.
            let len = unsafe { GetModuleFileNameW(ptr::null_mut(), buf.as_mut_ptr(), capacity as u32) }
                as usize;
            if len == 0 {
                return None;
            }
            if len < capacity || capacity >= MAX_LONG_PATH {
                buf.truncate(len);
                return Some(PathBuf::from(std::ffi::OsString::from_wide(&buf)));
            }
            capacity = (capacity * 2).min(MAX_LONG_PATH);
        }
    }
}
