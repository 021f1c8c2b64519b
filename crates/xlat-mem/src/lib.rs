//! Guest virtual memory for the translator.
//!
//! [`VirtualMemory`] emulates a guest address space entirely in host storage: every mapping is a
//! [`VirtualSlot`] backed by a run of one contiguous, growable byte pool. Translated code reaches
//! guest memory through [`VirtualMemory::load`], [`VirtualMemory::store`] and
//! [`VirtualMemory::fetch`], which consult a per-bank [`LookupWindow`] before falling back to a
//! hashed fast-resolve table and finally a binary search over the slots.
//!
//! All mutating operations keep the slot tables normalised (no adjacent slots that could be
//! merged) and invalidate every cache. Changes that may affect translated code raise an
//! execute-dirty flag that the runtime drains with [`VirtualMemory::take_execute_dirty`].

#![forbid(unsafe_code)]

mod access;
mod cache;
mod config;
mod consistency;
mod error;
mod memory;
mod phys;
mod usage;
mod virt;


pub use access::MemoryType;
pub use cache::{LookupWindow, MemoryStats, FAST_RESOLVE_ENTRIES};
pub use config::{MemoryConfig, MAX_LOOKUP_BANKS};
pub use error::{ConfigError, MemoryError, MemoryFault, MemoryResult};
pub use memory::{Region, VirtualMemory};
pub use phys::PhysicalSlot;
pub use usage::{AccessKind, Usage};
pub use virt::VirtualSlot;
