//! Process Handle Resolver
//!
//! Locates native entry points that are not present on every platform
//! revision. A [`Capability`] is probed once, on first use, and the result
//! (present or absent) is cached for the life of the process.

use core::ffi::c_void;
use core::mem;

/// A lazily probed native function of type `F`
///
/// `F` is a function-pointer type such as
/// `unsafe extern "C" fn() -> i32`.
pub struct Capability<F> {
    /// Module to look the symbol up in (`None` = already-loaded global scope)
    module: Option<&'static str>,
    /// Exported symbol name
    symbol: &'static str,
    /// Probe result
    resolved: spin::Once<Option<F>>,
}

impl<F: Copy> Capability<F> {
    /// Declare a capability
    ///
    /// # Safety
    /// `F` must be a function-pointer type whose signature and ABI match the
    /// exported symbol exactly.
    pub const unsafe fn new(module: Option<&'static str>, symbol: &'static str) -> Self {
        Self {
            module,
            symbol,
            resolved: spin::Once::new(),
        }
    }

    /// The function pointer, or `None` if the host does not export it
    pub fn probe(&self) -> Option<F> {
        *self.resolved.call_once(|| {
            let address = lookup_symbol(self.module, self.symbol)?;
            log::debug!(
                "Capability {}!{} resolved at {:p}",
                self.module.unwrap_or("<global>"),
                self.symbol,
                address
            );
            if mem::size_of::<F>() != mem::size_of::<*mut c_void>() {
                return None;
            }
            // SAFETY: the constructor's contract guarantees F is a function
            // pointer matching the symbol, and the sizes were checked above.
            Some(unsafe { mem::transmute_copy::<*mut c_void, F>(&address) })
        })
    }

    /// Whether the probe has already run
    pub fn is_probed(&self) -> bool {
        self.resolved.is_completed()
    }

    /// Symbol name
    pub fn symbol(&self) -> &'static str {
        self.symbol
    }
}

/// Resolve a symbol's address without loading new modules
#[cfg(unix)]
fn lookup_symbol(module: Option<&str>, symbol: &str) -> Option<*mut c_void> {
    use std::ffi::CString;

    let name = CString::new(symbol).ok()?;
    let scope = match module {
        None => libc::RTLD_DEFAULT,
        Some(module) => {
            let module = CString::new(module).ok()?;
            // SAFETY: valid NUL-terminated string; RTLD_NOLOAD never loads code.
            let handle =
                unsafe { libc::dlopen(module.as_ptr(), libc::RTLD_LAZY | libc::RTLD_NOLOAD) };
            if handle.is_null() {
                log::trace!("Module {:?} not loaded", module);
                return None;
            }
            handle
        }
    };

    // SAFETY: scope is RTLD_DEFAULT or a live module handle; name is NUL-terminated.
    let address = unsafe { libc::dlsym(scope, name.as_ptr()) };
    (!address.is_null()).then_some(address)
}

/// Resolve a symbol's address without loading new modules
#[cfg(windows)]
fn lookup_symbol(module: Option<&str>, symbol: &str) -> Option<*mut c_void> {
    use std::ffi::CString;
    use windows_sys::Win32::System::LibraryLoader::{GetModuleHandleA, GetProcAddress};

    let name = CString::new(symbol).ok()?;
    let module_name = module.map(CString::new).transpose().ok()?;
    let module_ptr = module_name
        .as_ref()
        .map_or(core::ptr::null(), |m| m.as_ptr() as *const u8);

    // SAFETY: null (the executable) or a NUL-terminated module name.
    let handle = unsafe { GetModuleHandleA(module_ptr) };
    if handle.is_null() {
        log::trace!("Module {:?} not loaded", module);
        return None;
    }

    // SAFETY: live module handle and NUL-terminated export name.
    let proc = unsafe { GetProcAddress(handle, name.as_ptr() as *const u8) }?;
    Some(proc as *mut c_void)
}
