//! Recording engine for tests. It never patches anything: a hook's original is its target, so calling the
//! original runs the real, unhooked function.

use std::collections::{HashMap, HashSet};

use crate::engine::{Engine, Status};

/// Engine that tracks calls and can be told to refuse operations
#[derive(Debug, Default)]
pub(crate) struct FakeEngine {
    /// Whether the engine is initialized
    pub(crate) initialized: bool,
    /// Number of `initialize` calls
    pub(crate) initialize_calls: usize,
    /// Number of `uninitialize` calls
    pub(crate) uninitialize_calls: usize,
    /// Status returned by `initialize`, if it should fail
    pub(crate) fail_initialize: Option<Status>,
    /// Status returned by `uninitialize`, if it should fail
    pub(crate) fail_uninitialize: Option<Status>,
    /// Installed hooks: target to enabled flag
    pub(crate) hooks: HashMap<usize, bool>,
    /// Targets `create_hook` refuses, with the status to report
    pub(crate) refused: HashMap<usize, Status>,
    /// Targets `enable_hook` refuses, with the status to report
    pub(crate) refused_enable: HashMap<usize, Status>,
    /// Loaded modules
    pub(crate) modules: HashSet<String>,
    /// Exported symbols: (module, function) to address
    pub(crate) symbols: HashMap<(String, String), usize>,
}

impl FakeEngine {
    /// Registers `address` as `function` exported by `module`
    pub(crate) fn export(&mut self, module: &str, function: &str, address: *const ()) {
        self.modules.insert(module.to_owned());
        self.symbols
            .insert((module.to_owned(), function.to_owned()), address as usize);
    }

    /// Whether the hook on `target` is installed and enabled
    pub(crate) fn is_enabled(&self, target: *const ()) -> bool {
        self.hooks.get(&(target as usize)).copied().unwrap_or(false)
    }

    /// Fails unless initialized
    fn check_initialized(&self) -> Result<(), Status> {
        if self.initialized {
            Ok(())
        } else {
            Err(Status::NotInitialized)
        }
    }

    /// Sets the enabled flag of an installed hook, reporting `already` if it had that value
    fn toggle(&mut self, target: *const (), enable: bool, already: Status) -> Result<(), Status> {
        self.check_initialized()?;
        let enabled = self
            .hooks
            .get_mut(&(target as usize))
            .ok_or(Status::NotCreated)?;
        if *enabled == enable {
            return Err(already);
        }
        *enabled = enable;
        Ok(())
    }
}

impl Engine for FakeEngine {
    fn initialize(&mut self) -> Result<(), Status> {
        self.initialize_calls += 1;
        if let Some(status) = self.fail_initialize {
            return Err(status);
        }
        if self.initialized {
            return Err(Status::AlreadyInitialized);
        }
        self.initialized = true;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn uninitialize(&mut self) -> Result<(), Status> {
        self.uninitialize_calls += 1;
        self.check_initialized()?;
        if let Some(status) = self.fail_uninitialize {
            return Err(status);
        }
        self.hooks.clear();
        self.initialized = false;
        Ok(())
    }

    unsafe fn create_hook(
        &mut self,
        target: *const (),
        _detour: *const (),
    ) -> Result<*const (), Status> {
        self.check_initialized()?;
        if let Some(status) = self.refused.get(&(target as usize)) {
            return Err(*status);
        }
        if self.hooks.contains_key(&(target as usize)) {
            return Err(Status::AlreadyCreated);
        }
        self.hooks.insert(target as usize, false);
        Ok(target)
    }

    unsafe fn create_hook_by_name(
        &mut self,
        module: &str,
        function: &str,
        detour: *const (),
    ) -> Result<(*const (), *const ()), Status> {
        if !self.modules.contains(module) {
            return Err(Status::ModuleNotFound);
        }
        let target = *self
            .symbols
            .get(&(module.to_owned(), function.to_owned()))
            .ok_or(Status::FunctionNotFound)? as *const ();
        let original = self.create_hook(target, detour)?;
        Ok((original, target))
    }

    unsafe fn enable_hook(&mut self, target: *const ()) -> Result<(), Status> {
        if let Some(status) = self.refused_enable.get(&(target as usize)) {
            return Err(*status);
        }
        self.toggle(target, true, Status::Enabled)
    }

    unsafe fn disable_hook(&mut self, target: *const ()) -> Result<(), Status> {
        self.toggle(target, false, Status::Disabled)
    }

    unsafe fn remove_hook(&mut self, target: *const ()) -> Result<(), Status> {
        self.check_initialized()?;
        self.hooks
            .remove(&(target as usize))
            .map(|_| ())
            .ok_or(Status::NotCreated)
    }
}
