//! # Hook
//!
//! This module covers [`Hook`], the owner of one installed hook. A hook redirects calls from a target
//! function to a detour while keeping the original callable.
//!
//! Every created hook holds a reference on an [`EngineContext`]: the engine is initialized when the first
//! hook is created and uninitialized when the last one goes away. Dropping a hook removes it before
//! releasing its reference, so the engine never outlives the hooks it created, nor the other way around.

use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr;
use std::sync::Arc;

use lazy_static::lazy_static;

use crate::engine::{Engine, EngineContext, InlineEngine};
use crate::error::{Error, Result};
use crate::function::Function;

lazy_static! {
    /// Context of hooks created without an explicit one
    static ref DEFAULT_CONTEXT: Arc<EngineContext<InlineEngine>> =
        Arc::new(EngineContext::new(InlineEngine::new()));
}

/// An installed hook redirecting a function of type `F` to a detour of the same type
///
/// A `Hook` is either created, owning the hook and a reference on its engine, or uncreated: the state of
/// [`Hook::default`], of a handle whose creation failed, and of a handle emptied by [`Hook::take`].
/// Operations on an uncreated handle fail with [`Error::NotCreated`].
///
/// Hooks can't be cloned. Dropping a created hook removes it, restoring the target, and releases its
/// engine reference; failures while doing so are logged.
pub struct Hook<F: Function, E: Engine = InlineEngine> {
    /// Intercepted function
    target: *const (),
    /// Replacement function
    detour: *const (),
    /// Entry point running the target's original code
    original: *const (),
    /// Whether calls to `target` are redirected
    enabled: bool,
    /// Engine holding the hook, present iff created
    context: Option<Arc<EngineContext<E>>>,
    /// Signature of the target, detour and original
    _signature: PhantomData<F>,
}

// SAFETY: the pointers are never dereferenced by the handle itself and shared access only reads them or
// calls the original, which is as thread-safe as the target function was
unsafe impl<F: Function, E: Engine> Send for Hook<F, E> {}
// SAFETY: see above
unsafe impl<F: Function, E: Engine> Sync for Hook<F, E> {}

impl<F: Function> Hook<F> {
    /// Hooks `target` with `detour` using the process-wide inline engine, enabling it right away if
    /// `enable` is set
    ///
    /// # Safety
    ///
    /// - `target` must be safe to patch: no thread may be running its first instructions while the hook
    ///   is created, enabled, disabled or removed
    /// - `detour` must uphold whatever contract callers of `target` rely on
    pub unsafe fn create(target: F, detour: F, enable: bool) -> Result<Self> {
        Self::create_with(&DEFAULT_CONTEXT, target, detour, enable)
    }

    /// Hooks `function` exported by the loaded `module` with `detour` using the process-wide inline
    /// engine
    ///
    /// # Safety
    ///
    /// The exported function must have the signature `F`. See also [`Hook::create`].
    pub unsafe fn create_by_name(
        module: &str,
        function: &str,
        detour: F,
        enable: bool,
    ) -> Result<Self> {
        Self::create_by_name_with(&DEFAULT_CONTEXT, module, function, detour, enable)
    }
}

impl<F: Function, E: Engine> Hook<F, E> {
    /// Hooks `target` with `detour` using the engine of `context`
    ///
    /// # Safety
    ///
    /// See [`Hook::create`]
    pub unsafe fn create_with(
        context: &Arc<EngineContext<E>>,
        target: F,
        detour: F,
        enable: bool,
    ) -> Result<Self> {
        let (target, detour) = (target.to_ptr(), detour.to_ptr());
        Self::install(context, detour, enable, |context| {
            context
                .install_by_address(target, detour)
                .map(|original| (original, target))
        })
    }

    /// Hooks `function` exported by the loaded `module` with `detour` using the engine of `context`
    ///
    /// # Safety
    ///
    /// See [`Hook::create_by_name`]
    pub unsafe fn create_by_name_with(
        context: &Arc<EngineContext<E>>,
        module: &str,
        function: &str,
        detour: F,
        enable: bool,
    ) -> Result<Self> {
        let detour = detour.to_ptr();
        Self::install(context, detour, enable, |context| {
            context.install_by_symbol(module, function, detour)
        })
    }

    /// Takes an engine reference, runs `install` and enables the result if requested.
    ///
    /// Whatever was acquired is given back when a step fails.
    unsafe fn install(
        context: &Arc<EngineContext<E>>,
        detour: *const (),
        enable: bool,
        install: impl FnOnce(&EngineContext<E>) -> Result<(*const (), *const ())>,
    ) -> Result<Self> {
        context.acquire()?;
        let (original, target) = match install(context) {
            Ok(addresses) => addresses,
            Err(error) => {
                if let Err(release) = context.release() {
                    tracing::warn!(%release, "failed to release engine after failed install");
                }
                return Err(error);
            }
        };
        tracing::debug!(?target, ?detour, ?original, "hook created");

        let mut hook = Self {
            target,
            detour,
            original,
            enabled: false,
            context: Some(Arc::clone(context)),
            _signature: PhantomData,
        };
        if enable {
            // dropping the half-made hook removes it and releases the reference
            hook.enable()?;
        }
        Ok(hook)
    }

    /// Starts or stops redirecting the target to the detour.
    ///
    /// Asking for the current state succeeds without touching the engine; the state only changes when
    /// the engine call succeeds.
    pub fn set_enabled(&mut self, enable: bool) -> Result<()> {
        if self.enabled == enable {
            return Ok(());
        }
        let context = self.context.as_ref().ok_or(Error::NotCreated)?;
        // SAFETY: creating the hook required the target to be safe to patch
        unsafe { context.set_enabled(self.target, enable)? };
        self.enabled = enable;
        Ok(())
    }

    /// Starts redirecting the target to the detour
    pub fn enable(&mut self) -> Result<()> {
        self.set_enabled(true)
    }

    /// Stops redirecting the target to the detour
    pub fn disable(&mut self) -> Result<()> {
        self.set_enabled(false)
    }

    /// Calls the original target function, bypassing the detour
    ///
    /// # Safety
    ///
    /// The call must be valid for `F` with these arguments, and the hook must not be removed by another
    /// thread while the call runs.
    pub unsafe fn call_original(&self, args: F::Arguments) -> Result<F::Output> {
        if !self.is_created() {
            return Err(Error::NotCreated);
        }
        let original = F::from_ptr(self.original);
        Ok(original.call(args))
    }

    /// Removes the hook and releases its engine reference, reporting the first failure
    pub fn remove(mut self) -> Result<()> {
        let (removed, released) = self.destroy();
        removed.and(released)
    }

    /// Moves the hook out, leaving an uncreated handle behind
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }

    /// Whether the handle owns a hook
    pub fn is_created(&self) -> bool {
        self.context.is_some()
    }

    /// Whether calls to the target are redirected
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Address of the intercepted function; null if uncreated
    pub fn target_address(&self) -> *const () {
        self.target
    }

    /// Address of the detour; null if uncreated
    pub fn detour_address(&self) -> *const () {
        self.detour
    }

    /// Address running the original code; null if uncreated
    pub fn original_address(&self) -> *const () {
        self.original
    }

    /// Removes the hook, then releases the engine reference, leaving the handle uncreated.
    ///
    /// Both steps always run. Returns the result of each.
    fn destroy(&mut self) -> (Result<()>, Result<()>) {
        let Some(context) = self.context.take() else {
            return (Ok(()), Ok(()));
        };
        let target = mem::replace(&mut self.target, ptr::null());
        self.detour = ptr::null();
        self.original = ptr::null();
        self.enabled = false;

        // SAFETY: creating the hook required the target to be safe to patch
        let removed = unsafe { context.remove(target) };
        let released = context.release();
        tracing::debug!(?target, "hook destroyed");
        (removed, released)
    }
}

impl<F: Function, E: Engine> Default for Hook<F, E> {
    fn default() -> Self {
        Self {
            target: ptr::null(),
            detour: ptr::null(),
            original: ptr::null(),
            enabled: false,
            context: None,
            _signature: PhantomData,
        }
    }
}

impl<F: Function, E: Engine> Drop for Hook<F, E> {
    fn drop(&mut self) {
        let target = self.target;
        let (removed, released) = self.destroy();
        if let Err(error) = removed {
            tracing::warn!(?target, %error, "failed to remove hook");
        }
        if let Err(error) = released {
            tracing::warn!(?target, %error, "failed to release hooking engine");
        }
    }
}

impl<F: Function, E: Engine> fmt::Debug for Hook<F, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("target", &self.target)
            .field("detour", &self.detour)
            .field("original", &self.original)
            .field("enabled", &self.enabled)
            .field("created", &self.is_created())
            .finish()
    }
}
