//! # Adapter
//!
//! Thin pass-through from hooks to the engine. Each call runs under the context lock and maps the
//! engine's [`Status`] into [`Error`]. Statuses meaning "already in the requested state" are success,
//! which keeps enabling, disabling, removing and (un)initializing idempotent.

use crate::engine::{Engine, EngineContext, Status};
use crate::error::{Error, Result};

/// Maps an engine result, treating `benign` as success
pub(crate) fn absorb(result: std::result::Result<(), Status>, benign: Status) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(status) if status == benign => {
            tracing::debug!(%status, "ignoring benign engine status");
            Ok(())
        }
        Err(status) => Err(Error::from(status)),
    }
}

/// Initializes `engine`; an engine that is already initialized is fine
pub(crate) fn initialize<E: Engine>(engine: &mut E) -> Result<()> {
    absorb(engine.initialize(), Status::AlreadyInitialized)
}

/// Uninitializes `engine`; an engine that is not initialized is fine
pub(crate) fn uninitialize<E: Engine>(engine: &mut E) -> Result<()> {
    absorb(engine.uninitialize(), Status::NotInitialized)
}

impl<E: Engine> EngineContext<E> {
    /// Installs a disabled hook on `target`, returning the original's address
    ///
    /// # Safety
    ///
    /// See [`Engine::create_hook`]
    pub(crate) unsafe fn install_by_address(
        &self,
        target: *const (),
        detour: *const (),
    ) -> Result<*const ()> {
        let mut shared = self.lock();
        shared
            .engine
            .create_hook(target, detour)
            .map_err(Error::from)
    }

    /// Resolves `function` in `module` and installs a disabled hook on it, returning the original's
    /// address and the resolved target
    ///
    /// # Safety
    ///
    /// See [`Engine::create_hook_by_name`]
    pub(crate) unsafe fn install_by_symbol(
        &self,
        module: &str,
        function: &str,
        detour: *const (),
    ) -> Result<(*const (), *const ())> {
        let mut shared = self.lock();
        shared
            .engine
            .create_hook_by_name(module, function, detour)
            .map_err(Error::from)
    }

    /// Enables or disables the hook on `target`
    ///
    /// # Safety
    ///
    /// See [`Engine::enable_hook`]
    pub(crate) unsafe fn set_enabled(&self, target: *const (), enable: bool) -> Result<()> {
        let mut shared = self.lock();
        if enable {
            absorb(shared.engine.enable_hook(target), Status::Enabled)
        } else {
            absorb(shared.engine.disable_hook(target), Status::Disabled)
        }
    }

    /// Removes the hook on `target`; a hook the engine no longer knows is already removed
    ///
    /// # Safety
    ///
    /// See [`Engine::remove_hook`]
    pub(crate) unsafe fn remove(&self, target: *const ()) -> Result<()> {
        let mut shared = self.lock();
        absorb(shared.engine.remove_hook(target), Status::NotCreated)
    }
}
