//! # Panicking
//!
//! A facade over [`crate::hook::Hook`] for callers that would rather unwind than handle `Result`s.
//!
//! Every operation delegates to the core handle and passes its result through [`value_or_panic`]: a
//! failure panics with the [`Error`] itself as payload, so it can be recovered with
//! [`std::panic::catch_unwind`] and [`Box::downcast`]. When built with `panic = "abort"` the error is
//! logged and the process aborted instead.

use std::fmt;
use std::sync::Arc;

use crate::engine::{Engine, EngineContext, InlineEngine};
use crate::error::{Error, Result};
use crate::function::Function;
use crate::hook;

/// Unwraps `result`, panicking with its [`Error`] as payload
#[track_caller]
pub fn value_or_panic<T>(result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(error) => fail(error),
    }
}

#[cfg(not(panic = "abort"))]
#[track_caller]
/// Unwinds with `error` as payload
fn fail(error: Error) -> ! {
    std::panic::panic_any(error)
}

#[cfg(panic = "abort")]
/// Aborting would drop the error on the floor, so it's logged first
fn fail(error: Error) -> ! {
    tracing::error!(%error, "hook operation failed");
    std::process::abort()
}

/// [`hook::Hook`] whose operations panic instead of returning errors
pub struct Hook<F: Function, E: Engine = InlineEngine> {
    /// Wrapped handle
    inner: hook::Hook<F, E>,
}

impl<F: Function> Hook<F> {
    /// See [`hook::Hook::create`]
    ///
    /// # Safety
    ///
    /// See [`hook::Hook::create`]
    #[track_caller]
    pub unsafe fn create(target: F, detour: F, enable: bool) -> Self {
        value_or_panic(hook::Hook::create(target, detour, enable)).into()
    }

    /// See [`hook::Hook::create_by_name`]
    ///
    /// # Safety
    ///
    /// See [`hook::Hook::create_by_name`]
    #[track_caller]
    pub unsafe fn create_by_name(module: &str, function: &str, detour: F, enable: bool) -> Self {
        value_or_panic(hook::Hook::create_by_name(module, function, detour, enable)).into()
    }
}

impl<F: Function, E: Engine> Hook<F, E> {
    /// See [`hook::Hook::create_with`]
    ///
    /// # Safety
    ///
    /// See [`hook::Hook::create`]
    #[track_caller]
    pub unsafe fn create_with(
        context: &Arc<EngineContext<E>>,
        target: F,
        detour: F,
        enable: bool,
    ) -> Self {
        value_or_panic(hook::Hook::create_with(context, target, detour, enable)).into()
    }

    /// See [`hook::Hook::create_by_name_with`]
    ///
    /// # Safety
    ///
    /// See [`hook::Hook::create_by_name`]
    #[track_caller]
    pub unsafe fn create_by_name_with(
        context: &Arc<EngineContext<E>>,
        module: &str,
        function: &str,
        detour: F,
        enable: bool,
    ) -> Self {
        value_or_panic(hook::Hook::create_by_name_with(
            context, module, function, detour, enable,
        ))
        .into()
    }

    #[track_caller]
    /// See [`hook::Hook::set_enabled`]
    pub fn set_enabled(&mut self, enable: bool) {
        value_or_panic(self.inner.set_enabled(enable))
    }

    #[track_caller]
    /// See [`hook::Hook::enable`]
    pub fn enable(&mut self) {
        value_or_panic(self.inner.enable())
    }

    #[track_caller]
    /// See [`hook::Hook::disable`]
    pub fn disable(&mut self) {
        value_or_panic(self.inner.disable())
    }

    /// See [`hook::Hook::call_original`]
    ///
    /// # Safety
    ///
    /// See [`hook::Hook::call_original`]
    #[track_caller]
    pub unsafe fn call_original(&self, args: F::Arguments) -> F::Output {
        value_or_panic(self.inner.call_original(args))
    }

    #[track_caller]
    /// See [`hook::Hook::remove`]
    pub fn remove(self) {
        value_or_panic(self.inner.remove())
    }

    /// See [`hook::Hook::take`]
    pub fn take(&mut self) -> Self {
        self.inner.take().into()
    }

    /// The wrapped handle
    pub fn inner(&self) -> &hook::Hook<F, E> {
        &self.inner
    }

    /// Unwraps the core handle
    pub fn into_inner(self) -> hook::Hook<F, E> {
        self.inner
    }

    /// Whether the handle owns a hook
    pub fn is_created(&self) -> bool {
        self.inner.is_created()
    }

    /// Whether calls to the target are redirected
    pub fn is_enabled(&self) -> bool {
        self.inner.is_enabled()
    }

    /// See [`hook::Hook::target_address`]
    pub fn target_address(&self) -> *const () {
        self.inner.target_address()
    }

    /// See [`hook::Hook::detour_address`]
    pub fn detour_address(&self) -> *const () {
        self.inner.detour_address()
    }

    /// See [`hook::Hook::original_address`]
    pub fn original_address(&self) -> *const () {
        self.inner.original_address()
    }
}

impl<F: Function, E: Engine> Default for Hook<F, E> {
    fn default() -> Self {
        hook::Hook::default().into()
    }
}

impl<F: Function, E: Engine> fmt::Debug for Hook<F, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl<F: Function, E: Engine> From<hook::Hook<F, E>> for Hook<F, E> {
    fn from(inner: hook::Hook<F, E>) -> Self {
        Self { inner }
    }
}

#[cfg(all(test, not(panic = "abort")))]
mod tests {
    use std::any::Any;
    use std::hint::black_box;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Arc;

    use super::{value_or_panic, Hook};
    use crate::engine::fake::FakeEngine;
    use crate::engine::{EngineContext, Status};
    use crate::Error;

    /// Signature of every hook in these tests
    type Unary = extern "C" fn(u64) -> u64;

    #[inline(never)]
    /// Hook target
    extern "C" fn increment(x: u64) -> u64 {
        black_box(x) + 1
    }

    #[inline(never)]
    /// Hook detour
    extern "C" fn decrement(x: u64) -> u64 {
        black_box(x) - 1
    }

    /// Extracts the error a facade call panicked with
    fn payload(panic: Box<dyn Any + Send>) -> Error {
        *panic.downcast::<Error>().unwrap()
    }

    #[test]
    /// Successes come back as plain values
    fn test_value() {
        assert_eq!(value_or_panic(Ok(5)), 5);
    }

    #[test]
    /// Errors are the panic payload
    fn test_panic_payload() {
        let panic = panic::catch_unwind(|| value_or_panic::<()>(Err(Error::MemoryAlloc)));
        assert_eq!(payload(panic.unwrap_err()), Error::MemoryAlloc);
    }

    #[test]
    /// Calling the original of an uncreated handle panics with `NotCreated`
    fn test_uncreated() {
        let hook = Hook::<Unary>::default();
        let panic = panic::catch_unwind(AssertUnwindSafe(|| unsafe { hook.call_original((1,)) }));
        assert_eq!(payload(panic.unwrap_err()), Error::NotCreated);
    }

    #[test]
    /// The facade behaves like the core handle when nothing fails
    fn test_lifecycle() {
        let context = Arc::new(EngineContext::new(FakeEngine::default()));
        let mut hook =
            unsafe { Hook::<Unary, FakeEngine>::create_with(&context, increment, decrement, true) };
        assert!(hook.is_enabled());
        assert_eq!(hook.target_address(), increment as *const ());
        assert_eq!(hook.detour_address(), decrement as *const ());
        // the fake engine hands out the target itself as the original
        assert_eq!(hook.original_address(), increment as *const ());
        assert_eq!(unsafe { hook.call_original((1,)) }, 2);

        hook.disable();
        assert!(!hook.is_enabled());
        hook.remove();
        assert_eq!(context.reference_count(), 0);

        let uncreated = Hook::<Unary, FakeEngine>::default();
        assert!(uncreated.target_address().is_null());
        assert!(uncreated.original_address().is_null());
    }

    #[test]
    /// Refused creation panics and leaves the engine untouched
    fn test_refused_creation() {
        let context = Arc::new(EngineContext::new(FakeEngine::default()));
        context.with_engine(|engine| {
            engine
                .refused
                .insert(increment as usize, Status::UnsupportedFunction);
        });

        let panic = panic::catch_unwind(AssertUnwindSafe(|| unsafe {
            Hook::<Unary, FakeEngine>::create_with(&context, increment, decrement, false)
        }));
        assert_eq!(payload(panic.unwrap_err()), Error::UnsupportedFunction);
        assert_eq!(context.reference_count(), 0);
    }
}
