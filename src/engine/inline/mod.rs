//! # Inline engine
//!
//! The default [`Engine`]: overwrites the first bytes of a target with a relative `jmp` into a
//! [`Trampoline`] allocated next to it. The trampoline forwards to the detour and keeps a relocated copy
//! of the overwritten instructions, which is what the hook's original points to.
//!
//! Code is process-wide, so the created hooks are too: they live in one registry shared by every
//! `InlineEngine`, and a target hooked through one engine reports [`Status::AlreadyCreated`] to all
//! others. Each engine only enables, disables and removes the hooks it created itself.
//!
//! Threads are not suspended while patching; callers must make sure nothing runs the first bytes of a
//! target while its hook is enabled or disabled.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use lazy_static::lazy_static;
use region::Protection;

use self::trampoline::Trampoline;
use crate::code::x64::jmp_rel;
use crate::engine::{Engine, Status};
use crate::patcher::byte::{BytePatchGuard, BytePatcher};
use crate::patcher::mem::{PermissionWrapper, PermissionWrapperGuard};
use crate::patcher::Patcher;

mod trampoline;

lazy_static! {
    /// Hooks of every inline engine by target address
    static ref HOOKS: Mutex<HashMap<usize, Entry>> = Mutex::new(HashMap::new());
}

/// Locks the process-wide hook registry
fn registry() -> MutexGuard<'static, HashMap<usize, Entry>> {
    HOOKS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Guard of the jump written over an enabled target
type JumpGuard = PermissionWrapperGuard<BytePatchGuard>;

/// One created hook
struct Entry {
    /// Jump over the target while enabled. Declared first so it is restored before the trampoline it
    /// jumps to is freed
    jump: Option<JumpGuard>,
    /// Relay and relocated prologue
    trampoline: Trampoline,
}

// SAFETY: the raw pointers held by the patch guard point into code that isn't tied to any thread
unsafe impl Send for Entry {}

/// x86-64 inline hooking engine
pub struct InlineEngine {
    /// Whether the engine is initialized
    initialized: bool,
    /// Targets of the hooks this engine created
    owned: HashSet<usize>,
    /// Writes jumps into read-only code
    patcher: PermissionWrapper<BytePatcher>,
}

impl InlineEngine {
    /// Creates an uninitialized engine
    pub fn new() -> Self {
        Self {
            initialized: false,
            owned: HashSet::new(),
            patcher: PermissionWrapper::new(BytePatcher::new()),
        }
    }

    /// Number of hooks this engine currently holds
    pub fn hook_count(&self) -> usize {
        self.owned.len()
    }

    /// Fails unless initialized
    fn check_initialized(&self) -> Result<(), Status> {
        if self.initialized {
            Ok(())
        } else {
            Err(Status::NotInitialized)
        }
    }

    /// Checks that `target` was hooked by this engine
    fn check_owned(&self, target: *const ()) -> Result<usize, Status> {
        self.check_initialized()?;
        let target = target as usize;
        if self.owned.contains(&target) {
            Ok(target)
        } else {
            Err(Status::NotCreated)
        }
    }

    /// Removes every hook this engine created, restoring their targets
    fn remove_owned(&mut self) {
        if self.owned.is_empty() {
            return;
        }
        tracing::debug!(count = self.owned.len(), "removing remaining hooks");
        let removed: Vec<Entry> = {
            let mut hooks = registry();
            self.owned
                .drain()
                .filter_map(|target| hooks.remove(&target))
                .collect()
        };
        drop(removed);
    }
}

impl Default for InlineEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InlineEngine {
    fn drop(&mut self) {
        self.remove_owned();
    }
}

impl std::fmt::Debug for InlineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InlineEngine")
            .field("initialized", &self.initialized)
            .field("hooks", &self.owned.len())
            .finish()
    }
}

/// Returns the end of the executable region containing `address`
fn executable_end(address: usize) -> Result<usize, Status> {
    let region = region::query(address as *const u8).map_err(|_| Status::NotExecutable)?;
    if region.protection().contains(Protection::EXECUTE) {
        Ok(region.as_range().end)
    } else {
        Err(Status::NotExecutable)
    }
}

impl Engine for InlineEngine {
    fn initialize(&mut self) -> Result<(), Status> {
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
        self.check_initialized()?;
        self.remove_owned();
        self.initialized = false;
        Ok(())
    }

    unsafe fn create_hook(
        &mut self,
        target: *const (),
        detour: *const (),
    ) -> Result<*const (), Status> {
        self.check_initialized()?;
        let (target, detour) = (target as usize, detour as usize);

        // held until the entry is inserted, so two engines can't both claim the target
        let mut hooks = registry();
        if hooks.contains_key(&target) {
            return Err(Status::AlreadyCreated);
        }

        let readable_end = executable_end(target)?;
        executable_end(detour)?;

        let trampoline = Trampoline::build(target, readable_end, detour)?;
        let original = trampoline.original();
        hooks.insert(
            target,
            Entry {
                jump: None,
                trampoline,
            },
        );
        self.owned.insert(target);
        Ok(original)
    }

    unsafe fn enable_hook(&mut self, target: *const ()) -> Result<(), Status> {
        let address = self.check_owned(target)?;
        let mut hooks = registry();
        let entry = hooks.get_mut(&address).ok_or(Status::NotCreated)?;
        if entry.jump.is_some() {
            return Err(Status::Enabled);
        }

        // the trampoline was allocated within rel32 reach of the target
        let jump = jmp_rel(address, entry.trampoline.relay()).ok_or(Status::MemoryAlloc)?;
        let guard = self.patcher.patch(address as *mut u8, &jump).map_err(|error| {
            tracing::warn!(?target, %error, "failed to write hook jump");
            Status::MemoryProtect
        })?;
        tracing::debug!(
            ?target,
            relocated = entry.trampoline.prologue_len(),
            "hook enabled"
        );
        entry.jump = Some(guard);
        Ok(())
    }

    unsafe fn disable_hook(&mut self, target: *const ()) -> Result<(), Status> {
        let address = self.check_owned(target)?;
        let mut hooks = registry();
        let entry = hooks.get_mut(&address).ok_or(Status::NotCreated)?;
        let jump = entry.jump.take().ok_or(Status::Disabled)?;
        drop(jump);
        tracing::debug!(?target, "hook disabled");
        Ok(())
    }

    unsafe fn remove_hook(&mut self, target: *const ()) -> Result<(), Status> {
        let address = self.check_owned(target)?;
        self.owned.remove(&address);
        let entry = registry().remove(&address);
        entry.map(drop).ok_or(Status::NotCreated)
    }
}
