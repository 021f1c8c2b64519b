//! Lazy translation of guest code.
//!
//! [`BlockMap`] records which guest addresses already have compiled entry points. On a miss the
//! runtime runs a [`Translator`]: starting from a root address it pops [`OpenAddress`]es off a
//! FIFO [`Worklist`], decodes each into a [`SuperBlock`] through the architecture's [`Decoder`],
//! and lowers the instructions through a [`Writer`] into the bytecode [`Emitter`]. Branch targets
//! discovered along the way are compiled into the same module up to
//! [`TranslateConfig::max_chase_depth`] hops; anything further, or already registered, is reached
//! through block map dispatch.

#![forbid(unsafe_code)]

mod block_map;
mod config;
mod decode;
mod emit;
mod error;
mod superblock;
mod translator;
mod worklist;

/// Toy ISA and recording emitter used by tests.
///
/// Only available for this crate's own tests or with the `test-utils` feature. Not part of the
/// stable API.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use block_map::{
    BlockExport, BlockMap, BlockStats, CommittedExport, DispatchIndex, DispatchSlot,
    TranslatedSet, BLOCK_CACHE_ENTRIES,
};
pub use config::TranslateConfig;
pub use decode::{Decoder, FetchError, Fetched, InstClass, Producer};
pub use emit::{Emitter, JumpTarget, Writer};
pub use error::{BlockMapError, Result, TranslateError};
pub use superblock::{build as build_super_block, BlockExit, DecodedInst, SuperBlock};
pub use translator::{translate, Translation, Translator};
pub use worklist::{export_name, OpenAddress, Placement, Worklist};
