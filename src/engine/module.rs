//! # Module
//!
//! Resolves exported functions inside modules already loaded in the process. Modules are never loaded
//! by the lookup: hooking a function in a module nobody loaded would have no effect anyway.

use std::ffi::CString;

use crate::engine::Status;

/// Resolves `function` exported by the loaded module `module`
///
/// Returns [`Status::ModuleNotFound`] if the module isn't loaded and [`Status::FunctionNotFound`] if it
/// doesn't export `function`.
pub fn resolve(module: &str, function: &str) -> Result<*const (), Status> {
    let function = CString::new(function).map_err(|_| Status::FunctionNotFound)?;
    let address = platform::resolve(module, &function)?;
    tracing::debug!(module, ?function, ?address, "resolved function");
    Ok(address)
}

#[cfg(unix)]
mod platform {
    use std::ffi::{CStr, CString};

    use crate::engine::Status;

    /// Looks the symbol up with `dlsym` on a `RTLD_NOLOAD` handle
    pub(super) fn resolve(module: &str, function: &CStr) -> Result<*const (), Status> {
        let module = CString::new(module).map_err(|_| Status::ModuleNotFound)?;

        // SAFETY: both strings are nul-terminated; RTLD_NOLOAD only succeeds for loaded modules and the
        // extra reference it takes is dropped before returning
        unsafe {
            let handle = libc::dlopen(module.as_ptr(), libc::RTLD_NOW | libc::RTLD_NOLOAD);
            if handle.is_null() {
                return Err(Status::ModuleNotFound);
            }
            let address = libc::dlsym(handle, function.as_ptr());
            libc::dlclose(handle);

            if address.is_null() {
                Err(Status::FunctionNotFound)
            } else {
                Ok(address as *const ())
            }
        }
    }
}

#[cfg(windows)]
mod platform {
    use std::ffi::CStr;
    use std::iter;

    use windows_sys::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};

    use crate::engine::Status;

    /// Looks the export up with `GetProcAddress` on the module's handle
    pub(super) fn resolve(module: &str, function: &CStr) -> Result<*const (), Status> {
        let module: Vec<u16> = module.encode_utf16().chain(iter::once(0)).collect();

        // SAFETY: both strings are nul-terminated; GetModuleHandleW doesn't take a reference
        unsafe {
            let handle = GetModuleHandleW(module.as_ptr());
            if handle.is_null() {
                return Err(Status::ModuleNotFound);
            }
            GetProcAddress(handle, function.as_ptr().cast())
                .map(|address| address as *const ())
                .ok_or(Status::FunctionNotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::resolve;
    use crate::engine::Status;

    #[test]
    /// Modules that aren't loaded are never loaded by the lookup
    fn test_module_not_found() {
        assert_eq!(
            resolve("hookguard-no-such-module.so", "main"),
            Err(Status::ModuleNotFound)
        );
    }

    #[test]
    /// Names with interior nul bytes can't exist
    fn test_invalid_names() {
        assert_eq!(resolve("libc\0.so", "getpid"), Err(Status::ModuleNotFound));
        assert_eq!(resolve("libc.so.6", "get\0pid"), Err(Status::FunctionNotFound));
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    /// Exports of loaded modules resolve, missing ones don't
    fn test_resolve_libc() {
        let address = resolve("libc.so.6", "getpid").unwrap();
        assert!(!address.is_null());
        assert_eq!(
            resolve("libc.so.6", "hookguard_no_such_function"),
            Err(Status::FunctionNotFound)
        );
    }
}
