use thiserror::Error;
use xlat_mem::{MemoryFault, VirtualMemory};

use crate::emit::{Emitter, Writer};
use crate::superblock::DecodedInst;

/// Control-flow classification of a decoded instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InstClass {
    /// Falls through to the next instruction.
    Plain,
    /// Unconditional direct jump; ends the strand.
    JumpDirect,
    /// Conditional direct branch; may fall through.
    ConditionalDirect,
    /// Indirect jump, return, trap or anything else that ends the strand without a static target.
    EndOfStrand,
}

impl InstClass {
    #[inline]
    pub fn ends_strand(self) -> bool {
        matches!(self, InstClass::JumpDirect | InstClass::EndOfStrand)
    }

    #[inline]
    pub fn is_direct_branch(self) -> bool {
        matches!(self, InstClass::JumpDirect | InstClass::ConditionalDirect)
    }
}

/// One instruction as returned by a [`Decoder`].
#[derive(Clone, Debug)]
pub struct Fetched<I> {
    pub inst: I,
    pub size: u32,
    pub class: InstClass,
    /// Static target of a direct branch or call.
    pub target: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error(transparent)]
    Fault(#[from] MemoryFault),

    #[error("undecodable instruction at {address:#x}")]
    Undecodable { address: u64 },
}

/// Architecture front end: turns guest bytes into instructions.
pub trait Decoder {
    type Inst;

    /// Decodes the instruction at `address`, reading its bytes through
    /// [`VirtualMemory::fetch_code`].
    fn fetch(
        &mut self,
        memory: &mut VirtualMemory,
        address: u64,
    ) -> Result<Fetched<Self::Inst>, FetchError>;
}

/// Architecture semantics: lowers one decoded instruction through a [`Writer`].
pub trait Producer<E: Emitter>: Decoder {
    fn produce(&mut self, writer: &mut Writer<'_, E>, inst: &DecodedInst<Self::Inst>);
}
