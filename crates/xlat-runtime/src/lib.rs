//! Runtime glue for lazily translated guest code.
//!
//! A [`Context`] owns the guest's [`xlat_mem::VirtualMemory`], the [`xlat_jit::BlockMap`] of
//! compiled entry points and the guest register arena. [`Driver::run`] dispatches through it,
//! translating on misses and flushing when executable memory changes.

#![forbid(unsafe_code)]

mod arena;
mod config;
mod context;
mod driver;
mod error;
mod outcome;

/// Runner for modules produced by the toy ISA's recording emitter.
///
/// Only available for this crate's own tests or with the `test-utils` feature.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use arena::{ArenaError, ContextArena};
pub use config::{ContextConfig, DEFAULT_CONTEXT_BYTES};
pub use context::{context_active, Context, GuestState};
pub use driver::{BlockRunner, Driver, DriverStats, Exit, Step};
pub use error::{ContextError, Result, RuntimeError};
pub use outcome::Outcome;
