//! Identity Queries
//!
//! Parent pid and own executable path. These never fail: an unavailable
//! answer degrades to `0` or an empty string.

use crate::compat::Pid;
use crate::control::ProcessControl;
use crate::kernel_interface::NativeProcessApi;

impl<N: NativeProcessApi> ProcessControl<N> {
    /// Parent process id, or `0` when the host cannot tell
    pub fn parent_id(&self) -> Pid {
        self.native.parent_pid().unwrap_or_else(|| {
            log::debug!("Parent pid unavailable");
            0
        })
    }

    /// Full path of the running executable, or empty
    pub fn own_executable_path(&self) -> String {
        match self.native.executable_path() {
            Some(path) => path.to_string_lossy().into_owned(),
            None => {
                log::debug!("Executable path unavailable");
                String::new()
            }
        }
    }

    /// File name of the running executable, or empty
    pub fn own_executable_name(&self) -> String {
        strip_directory(&self.own_executable_path()).to_owned()
    }
}

/// Last component of a path, splitting on both `/` and `\`
pub fn strip_directory(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel_interface::fake::FakeNative;
    use std::path::PathBuf;

    #[test]
    fn test_strip_directory() {
        assert_eq!(strip_directory("/usr/bin/ruby"), "ruby");
        assert_eq!(strip_directory("C:\\Tools\\mruby.exe"), "mruby.exe");
        assert_eq!(strip_directory("C:/mixed\\style/app.exe"), "app.exe");
        assert_eq!(strip_directory("plain"), "plain");
        assert_eq!(strip_directory("trailing/"), "");
        assert_eq!(strip_directory(""), "");
    }

    #[test]
    fn test_identity_from_backend() {
        let control = ProcessControl::new(FakeNative::default(), 1);
        assert_eq!(control.parent_id(), 7);
        assert_eq!(control.own_executable_path(), "/opt/tools/bin/fake-shell");
        assert_eq!(control.own_executable_name(), "fake-shell");
    }

    #[test]
    fn test_identity_degrades_softly() {
        let control = ProcessControl::new(FakeNative::default(), 1);
        control.native().set_parent(None);
        control.native().set_executable(None);
        assert_eq!(control.parent_id(), 0);
        assert_eq!(control.own_executable_path(), "");
        assert_eq!(control.own_executable_name(), "");

        control
            .native()
            .set_executable(Some(PathBuf::from("C:\\Program Files\\app.exe")));
        assert_eq!(control.own_executable_name(), "app.exe");
    }
}
