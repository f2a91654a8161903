//! # Code
//!
//! Machine code snippets written into targets and trampolines

pub mod x64;
