//! # Engine
//!
//! The hooking engine is the collaborator that actually patches code. Hooks never talk to it directly:
//! every call goes through an [`EngineContext`], which reference-counts the engine's initialization and
//! translates its [`Status`] codes into [`crate::Error`].

use thiserror::Error;

pub mod adapter;
pub mod context;
#[cfg(test)]
pub(crate) mod fake;
pub mod inline;
pub mod module;

pub use context::EngineContext;
pub use inline::InlineEngine;

/// Native status codes reported by an [`Engine`]
///
/// Besides the failure kinds of [`crate::Error`], this includes the "already in the requested state"
/// codes that the adapter treats as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Status {
    /// Unknown error
    #[error("unknown error")]
    Unknown,
    /// The engine is already initialized
    #[error("engine already initialized")]
    AlreadyInitialized,
    /// The engine is not initialized yet, or already uninitialized
    #[error("engine not initialized")]
    NotInitialized,
    /// The hook for the target is already created
    #[error("hook already created")]
    AlreadyCreated,
    /// The hook for the target is not created yet
    #[error("hook not created")]
    NotCreated,
    /// The hook for the target is already enabled
    #[error("hook already enabled")]
    Enabled,
    /// The hook for the target is not enabled yet, or already disabled
    #[error("hook already disabled")]
    Disabled,
    /// The pointer does not point into allocated, executable memory
    #[error("address is not executable")]
    NotExecutable,
    /// The target function cannot be hooked
    #[error("function cannot be hooked")]
    UnsupportedFunction,
    /// Failed to allocate memory
    #[error("memory allocation failed")]
    MemoryAlloc,
    /// Failed to change the memory protection
    #[error("memory protection change failed")]
    MemoryProtect,
    /// The module is not loaded
    #[error("module not loaded")]
    ModuleNotFound,
    /// The function is not found
    #[error("function not found")]
    FunctionNotFound,
}

/// Contract of a hooking engine
///
/// Engines are driven exclusively through an [`EngineContext`], which holds its lock around every call,
/// so implementations may assume calls never overlap.
pub trait Engine: Send + 'static {
    /// Initializes the engine. Returns [`Status::AlreadyInitialized`] when called twice
    fn initialize(&mut self) -> Result<(), Status>;

    /// Whether the engine is currently initialized
    fn is_initialized(&self) -> bool;

    /// Uninitializes the engine, removing any hook still registered. Returns [`Status::NotInitialized`]
    /// when the engine is not initialized
    fn uninitialize(&mut self) -> Result<(), Status>;

    /// Creates a disabled hook redirecting `target` to `detour`, returning the address of the original.
    ///
    /// # Safety
    ///
    /// `target` and `detour` must be functions of the same signature
    unsafe fn create_hook(
        &mut self,
        target: *const (),
        detour: *const (),
    ) -> Result<*const (), Status>;

    /// Creates a disabled hook on `function` exported by the loaded module `module`, returning the
    /// address of the original and the resolved target.
    ///
    /// # Safety
    ///
    /// The resolved function and `detour` must have the same signature
    unsafe fn create_hook_by_name(
        &mut self,
        module: &str,
        function: &str,
        detour: *const (),
    ) -> Result<(*const (), *const ()), Status> {
        let target = module::resolve(module, function)?;
        let original = self.create_hook(target, detour)?;
        Ok((original, target))
    }

    /// Starts redirecting `target` to its detour.
    ///
    /// # Safety
    ///
    /// No thread may be executing the first bytes of `target` while they are rewritten
    unsafe fn enable_hook(&mut self, target: *const ()) -> Result<(), Status>;

    /// Stops redirecting `target`.
    ///
    /// # Safety
    ///
    /// Same as [`Engine::enable_hook`]
    unsafe fn disable_hook(&mut self, target: *const ()) -> Result<(), Status>;

    /// Removes the hook on `target`, restoring it if enabled.
    ///
    /// # Safety
    ///
    /// Nothing may still be executing in the hook's trampoline
    unsafe fn remove_hook(&mut self, target: *const ()) -> Result<(), Status>;
}

#[cfg(test)]
mod tests {
    use super::Status;

    #[test]
    /// Statuses render as short diagnostics
    fn test_status_to_string() {
        assert_eq!(Status::NotExecutable.to_string(), "address is not executable");
        assert_eq!(Status::Enabled.to_string(), "hook already enabled");
    }
}
