//! Super-block construction.
//!
//! A super-block is one or more strands of straight-line code compiled as a single unit. A strand
//! ends at an unconditional jump or an instruction without a static successor; the block is then
//! extended with the next strand if any direct branch decoded so far targets the address right
//! after it.

use std::collections::BTreeSet;

use tracing::trace;
use xlat_mem::{MemoryFault, VirtualMemory};

use crate::decode::{Decoder, FetchError, InstClass};
use crate::{TranslateConfig, TranslateError};

#[derive(Clone, Debug)]
pub struct DecodedInst<I> {
    pub address: u64,
    pub size: u32,
    pub class: InstClass,
    pub target: Option<u64>,
    pub inst: I,
}

impl<I> DecodedInst<I> {
    #[inline]
    pub fn next_address(&self) -> u64 {
        self.address.wrapping_add(u64::from(self.size))
    }
}

/// How control leaves the end of a super-block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockExit {
    /// The last strand ended; nothing falls through to `next`.
    Closed { next: u64 },
    /// The instruction budget ran out; execution continues at `next`.
    Fallthrough { next: u64 },
    /// Fetching the instruction at the fault address failed.
    Fault(MemoryFault),
    /// The bytes at `address` do not decode. `entry_strand` is set when they follow the block
    /// entry in straight line rather than start or sit in a strand added as a branch target.
    Undecodable { address: u64, entry_strand: bool },
}

#[derive(Clone, Debug)]
pub struct SuperBlock<I> {
    entry: u64,
    insts: Vec<DecodedInst<I>>,
    targets: BTreeSet<u64>,
    exit: BlockExit,
}

impl<I> SuperBlock<I> {
    #[inline]
    pub fn entry(&self) -> u64 {
        self.entry
    }

    #[inline]
    pub fn instructions(&self) -> &[DecodedInst<I>] {
        &self.insts
    }

    /// Addresses inside the block that some instruction branches to.
    #[inline]
    pub fn targets(&self) -> &BTreeSet<u64> {
        &self.targets
    }

    #[inline]
    pub fn is_target(&self, address: u64) -> bool {
        self.targets.contains(&address)
    }

    #[inline]
    pub fn exit(&self) -> BlockExit {
        self.exit
    }

    /// Direct branch targets that leave the block, in address order.
    pub fn external_targets(&self) -> BTreeSet<u64> {
        self.insts
            .iter()
            .filter_map(|inst| inst.target)
            .filter(|target| !self.targets.contains(target))
            .collect()
    }

    fn extends_at(&self, address: u64) -> bool {
        self.insts.iter().any(|inst| {
            inst.class.is_direct_branch() && inst.target == Some(address)
        })
    }

    fn collect_targets(&mut self) {
        let starts: BTreeSet<u64> = self.insts.iter().map(|inst| inst.address).collect();
        self.targets = self
            .insts
            .iter()
            .filter_map(|inst| inst.target)
            .filter(|target| starts.contains(target))
            .collect();
    }
}

/// Decodes the super-block starting at `entry`.
///
/// A fault or undecodable bytes on the very first instruction are returned as errors; later on
/// they end the block with [`BlockExit::Fault`] or [`BlockExit::Undecodable`].
pub fn build<D: Decoder>(
    decoder: &mut D,
    memory: &mut VirtualMemory,
    entry: u64,
    config: &TranslateConfig,
) -> Result<SuperBlock<D::Inst>, TranslateError> {
    let mut block = SuperBlock {
        entry,
        insts: Vec::new(),
        targets: BTreeSet::new(),
        exit: BlockExit::Closed { next: entry },
    };
    let mut address = entry;
    let mut entry_strand = true;

    'strands: loop {
        loop {
            if block.insts.len() >= config.max_block_instructions {
                block.exit = BlockExit::Fallthrough { next: address };
                break 'strands;
            }
            let fetched = match decoder.fetch(memory, address) {
                Ok(fetched) if fetched.size > 0 => fetched,
                Ok(_) | Err(FetchError::Undecodable { .. }) if block.insts.is_empty() => {
                    return Err(TranslateError::Undecodable { address });
                }
                Ok(_) | Err(FetchError::Undecodable { .. }) => {
                    trace!("super-block at {entry:#x} ends at undecodable {address:#x}");
                    block.exit = BlockExit::Undecodable {
                        address,
                        entry_strand,
                    };
                    break 'strands;
                }
                Err(FetchError::Fault(fault)) if block.insts.is_empty() => {
                    return Err(TranslateError::Fault(fault));
                }
                Err(FetchError::Fault(fault)) => {
                    trace!("super-block at {entry:#x} ends at unreadable {address:#x}");
                    block.exit = BlockExit::Fault(fault);
                    break 'strands;
                }
            };
            let inst = DecodedInst {
                address,
                size: fetched.size,
                class: fetched.class,
                target: fetched.target,
                inst: fetched.inst,
            };
            address = inst.next_address();
            let ends = inst.class.ends_strand();
            block.insts.push(inst);

            if config.single_step {
                // Conditional branches keep their fall-through reachable.
                block.exit = if ends {
                    BlockExit::Closed { next: address }
                } else {
                    BlockExit::Fallthrough { next: address }
                };
                break 'strands;
            }
            if ends {
                break;
            }
        }

        block.exit = BlockExit::Closed { next: address };
        if !block.extends_at(address) {
            break;
        }
        trace!("extending super-block at {entry:#x} with strand at {address:#x}");
        entry_strand = false;
    }

    block.collect_targets();
    Ok(block)
}
