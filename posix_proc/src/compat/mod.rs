//! # POSIX Compatibility Types
//!
//! Types shared by the caller-facing contracts: pids and the encoded wait
//! status.

use core::fmt;

/// POSIX process ID
pub type Pid = i32;

/// `waitpid` target meaning "any tracked child"
pub const ANY_CHILD: Pid = -1;

/// `waitpid` option flags (POSIX values)
pub mod wait_flags {
    /// Return immediately if no child has exited
    pub const WNOHANG: i32 = 1;
}

/// `spawn` mode values (CRT `_spawn` family)
pub mod spawn_modes {
    /// Block until the child exits, return its status
    pub const P_WAIT: i32 = 0;
    /// Return the child's pid immediately
    pub const P_NOWAIT: i32 = 1;
    /// Replace the caller with the child
    pub const P_OVERLAY: i32 = 2;
}

/// POSIX wait status, as stored through `waitpid`'s `stat_loc`
///
/// Normal exit with code `E` encodes as `E << 8`; termination by signal
/// `S` encodes as `S` in the low seven bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct EncodedStatus(i32);

impl EncodedStatus {
    /// Encode a normal exit
    #[inline]
    pub const fn from_exit_code(code: u32) -> Self {
        Self(code.wrapping_shl(8) as i32)
    }

    /// Encode a termination by signal
    #[inline]
    pub const fn from_signal(sig: i32) -> Self {
        Self(sig & 0x7f)
    }

    /// Wrap a raw status word
    #[inline]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Raw status word
    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// `WIFEXITED`
    #[inline]
    pub const fn exited(self) -> bool {
        self.0 & 0x7f == 0
    }

    /// `WEXITSTATUS`
    #[inline]
    pub const fn exit_code(self) -> u32 {
        (self.0 as u32) >> 8
    }

    /// `WIFSIGNALED`
    #[inline]
    pub const fn signaled(self) -> bool {
        let sig = self.0 & 0x7f;
        sig != 0 && sig != 0x7f
    }

    /// `WTERMSIG`
    #[inline]
    pub const fn term_signal(self) -> Option<i32> {
        if self.signaled() {
            Some(self.0 & 0x7f)
        } else {
            None
        }
    }

    /// Exit code a shell would report: the code itself, or 128 + signal
    pub const fn shell_code(self) -> i32 {
        match self.term_signal() {
            Some(sig) => 128 + sig,
            None => self.exit_code() as i32,
        }
    }
}

impl fmt::Debug for EncodedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.term_signal() {
            Some(sig) => write!(f, "EncodedStatus(signal {})", sig),
            None => write!(f, "EncodedStatus(exit {})", self.exit_code()),
        }
    }
}
