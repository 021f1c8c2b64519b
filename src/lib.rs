//! Core of a dynamic binary translator.
//!
//! - [`mem`]: guest virtual memory backed by a compacting physical pool, with per-bank lookup
//!   windows for translated code.
//! - [`jit`]: super-block discovery and batch translation through pluggable decoder and emitter
//!   backends, plus the block map of compiled entry points.
//! - [`runtime`]: the single per-thread context and the dispatch loop that ties them together.

pub use xlat_jit as jit;
pub use xlat_mem as mem;
pub use xlat_runtime as runtime;

pub use xlat_jit::{BlockMap, Decoder, Emitter, Producer, TranslateConfig, Translator};
pub use xlat_mem::{MemoryConfig, MemoryError, MemoryFault, MemoryType, Usage, VirtualMemory};
pub use xlat_runtime::{Context, ContextConfig, Driver, Exit, Outcome, RuntimeError};
