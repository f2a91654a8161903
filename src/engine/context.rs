//! # Engine context
//!
//! Reference counting of the engine's initialization. The engine is initialized while at least one hook
//! holds a reference and torn down when the last reference is released.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::engine::{adapter, Engine};
use crate::error::Result;

/// Shared state of an engine: the engine itself and the number of hooks keeping it initialized.
///
/// A single mutex serializes reference transitions *and* every engine call made through the adapter,
/// since engines make no promise that hook operations on different targets may run concurrently.
pub struct EngineContext<E: Engine> {
    /// Engine and reference count
    shared: Mutex<Shared<E>>,
}

/// State guarded by [`EngineContext::shared`]
pub(crate) struct Shared<E> {
    /// The wrapped engine
    pub(crate) engine: E,
    /// Number of live references; the engine is initialized iff this is non-zero
    references: usize,
}

impl<E: Engine> EngineContext<E> {
    /// Wraps an uninitialized engine
    pub fn new(engine: E) -> Self {
        Self {
            shared: Mutex::new(Shared {
                engine,
                references: 0,
            }),
        }
    }

    /// Number of hooks currently holding a reference on the engine
    pub fn reference_count(&self) -> usize {
        self.lock().references
    }

    /// Whether the engine itself reports being initialized
    pub fn is_initialized(&self) -> bool {
        self.lock().engine.is_initialized()
    }

    /// Takes a reference on the engine, initializing it if this is the first one.
    ///
    /// The count only changes once initialization succeeded, so a failure leaves the context untouched.
    pub(crate) fn acquire(&self) -> Result<()> {
        let mut shared = self.lock();
        if shared.references == 0 {
            adapter::initialize(&mut shared.engine)?;
            tracing::info!("hooking engine initialized");
        }
        shared.references += 1;
        Ok(())
    }

    /// Drops a reference on the engine, uninitializing it once no reference is left
    pub(crate) fn release(&self) -> Result<()> {
        let mut shared = self.lock();
        match shared.references {
            0 => {
                tracing::warn!("engine reference released while none is held");
                Ok(())
            }
            1 => {
                shared.references = 0;
                // on failure the engine stays initialized with no reference held; the next acquire
                // absorbs the resulting "already initialized" status
                adapter::uninitialize(&mut shared.engine).map_err(|error| {
                    tracing::warn!(%error, "hooking engine stayed initialized after its last release");
                    error
                })?;
                tracing::info!("hooking engine uninitialized");
                Ok(())
            }
            _ => {
                shared.references -= 1;
                Ok(())
            }
        }
    }

    /// Locks the shared state, recovering from a poisoned lock since the state is always left consistent
    pub(crate) fn lock(&self) -> MutexGuard<'_, Shared<E>> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with the wrapped engine
    #[cfg(test)]
    pub(crate) fn with_engine<R>(&self, f: impl FnOnce(&mut E) -> R) -> R {
        f(&mut self.lock().engine)
    }
}

impl<E: Engine> fmt::Debug for EngineContext<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContext")
            .field("references", &self.reference_count())
            .finish_non_exhaustive()
    }
}
