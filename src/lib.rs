//! # hookguard
//!
//! Function hooks as owned values. A [`Hook`] redirects calls from a target function to a detour of
//! the same type, keeps the original callable and undoes everything when dropped.
//!
//! Hooks are installed by an [`Engine`] shared through an [`EngineContext`], which initializes the
//! engine for the first hook and tears it down after the last one. The default engine is the x86-64
//! [`InlineEngine`]; hooks created with [`Hook::create`] share one process-wide instance of it.
//!
//! ```no_run
//! use hookguard::Hook;
//!
//! #[inline(never)]
//! extern "C" fn add(a: i32, b: i32) -> i32 {
//!     a + b
//! }
//!
//! extern "C" fn sub(a: i32, b: i32) -> i32 {
//!     a - b
//! }
//!
//! # fn main() -> hookguard::Result<()> {
//! let hook = unsafe { Hook::<extern "C" fn(i32, i32) -> i32>::create(add, sub, true)? };
//! assert_eq!(unsafe { hook.call_original((2, 1))? }, 3);
//! drop(hook);
//! # Ok(())
//! # }
//! ```
//!
//! Every operation returns [`Result`]; [`panicking::Hook`] offers the same operations panicking with the
//! [`Error`] instead.

#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]

#[cfg(not(target_arch = "x86_64"))]
compile_error!("hookguard only supports x86-64");

pub mod alloc;
pub mod code;
pub mod engine;
pub mod error;
pub mod function;
pub mod hook;
pub mod panicking;
pub mod patcher;

pub use engine::{Engine, EngineContext, InlineEngine, Status};
pub use error::{Error, Result};
pub use function::Function;
pub use hook::Hook;
