//! # Error
//!
//! Failure kinds reported by hook operations

use thiserror::Error;

use crate::engine::Status;

/// Result type returned by every fallible hook operation
pub type Result<T> = std::result::Result<T, Error>;

/// Closed set of reasons a hook operation can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Error {
    /// The engine reported a status with no more specific meaning
    #[error("unknown error")]
    Unknown,
    /// A hook for the target function already exists
    #[error("the hook for the specified target function is already created")]
    AlreadyCreated,
    /// The hook does not exist (never created, removed or taken from)
    #[error("the hook for the specified target function is not created")]
    NotCreated,
    /// The target or detour does not point into executable memory
    #[error("the specified pointer is not executable")]
    NotExecutable,
    /// The target's code cannot be relocated into a trampoline
    #[error("the specified target function cannot be hooked")]
    UnsupportedFunction,
    /// Executable memory for the trampoline could not be allocated
    #[error("failed to allocate memory")]
    MemoryAlloc,
    /// Memory protection of the target could not be changed
    #[error("failed to change the memory protection")]
    MemoryProtect,
    /// The named module is not loaded in the process
    #[error("the specified module is not loaded")]
    ModuleNotFound,
    /// The named function is not exported by the module
    #[error("the specified function is not found")]
    FunctionNotFound,
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        match status {
            Status::AlreadyCreated => Self::AlreadyCreated,
            Status::NotCreated => Self::NotCreated,
            Status::NotExecutable => Self::NotExecutable,
            Status::UnsupportedFunction => Self::UnsupportedFunction,
            Status::MemoryAlloc => Self::MemoryAlloc,
            Status::MemoryProtect => Self::MemoryProtect,
            Status::ModuleNotFound => Self::ModuleNotFound,
            Status::FunctionNotFound => Self::FunctionNotFound,
            // lifecycle statuses only surface here when the adapter didn't absorb them
            Status::Unknown
            | Status::AlreadyInitialized
            | Status::NotInitialized
            | Status::Enabled
            | Status::Disabled => Self::Unknown,
        }
    }
}
