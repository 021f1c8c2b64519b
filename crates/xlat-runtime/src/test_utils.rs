use xlat_jit::test_utils::{Op, RecordedModule};
use xlat_jit::{DispatchSlot, JumpTarget};
use xlat_mem::{MemoryError, MemoryFault};

use crate::{BlockRunner, GuestState, Step};

/// Arena offset of the loop counter decremented by every conditional branch.
pub const COUNTER: usize = 0;
/// Arena offset of the address register used by loads and stores.
pub const ADDRESS: usize = 8;
/// Arena offset of the value register loads fill and stores drain.
pub const VALUE: usize = 16;

/// Interprets [`RecordedModule`] functions.
///
/// A conditional branch decrements the counter and is taken while it stays non-zero. Calls push
/// their return address; a return with an empty stack halts.
#[derive(Debug, Default)]
pub struct ToyRunner {
    pub calls: Vec<u64>,
    pub entered: Vec<u64>,
}

fn fault(err: MemoryError) -> MemoryFault {
    match err {
        MemoryError::Fault(fault) => fault,
        other => panic!("toy runner memory access failed: {other}"),
    }
}

impl ToyRunner {
    fn transfer(ops: &[Op], target: &JumpTarget, pc: &mut usize) -> Option<Step> {
        match target {
            JumpTarget::Local(address) => {
                *pc = ops
                    .iter()
                    .position(|op| *op == Op::Label(*address))
                    .unwrap_or_else(|| panic!("no label for {address:#x}"));
                None
            }
            other => Some(Step::Continue(other.address())),
        }
    }
}

impl BlockRunner<RecordedModule> for ToyRunner {
    fn run_block(
        &mut self,
        state: GuestState<'_>,
        slot: &DispatchSlot<RecordedModule>,
    ) -> Result<Step, MemoryFault> {
        self.entered.push(slot.address);
        let GuestState { memory, arena } = state;
        let function = slot
            .unit
            .function(slot.address)
            .unwrap_or_else(|| panic!("{} missing from its module", slot.name));
        let ops = &function.ops;

        let mut pc = 0;
        while let Some(op) = ops.get(pc) {
            pc += 1;
            match op {
                Op::Label(_) => {}
                Op::Load(bank, ty) => {
                    let address = arena.read_u64(ADDRESS).unwrap();
                    let value = memory.load(*bank, address, *ty).map_err(fault)?;
                    arena.write_u64(VALUE, value).unwrap();
                }
                Op::Fetch(bank, ty) => {
                    let address = arena.read_u64(ADDRESS).unwrap();
                    let value = memory.fetch(*bank, address, *ty).map_err(fault)?;
                    arena.write_u64(VALUE, value).unwrap();
                }
                Op::Store(bank, ty) => {
                    let address = arena.read_u64(ADDRESS).unwrap();
                    let value = arena.read_u64(VALUE).unwrap();
                    memory.store(*bank, address, *ty, value).map_err(fault)?;
                }
                Op::Jump(target) => {
                    if let Some(step) = Self::transfer(ops, target, &mut pc) {
                        return Ok(step);
                    }
                }
                Op::Branch(target) => {
                    let counter = arena.read_u64(COUNTER).unwrap().wrapping_sub(1);
                    arena.write_u64(COUNTER, counter).unwrap();
                    if counter != 0 {
                        if let Some(step) = Self::transfer(ops, target, &mut pc) {
                            return Ok(step);
                        }
                    }
                }
                Op::Call(target, return_address) => {
                    self.calls.push(*return_address);
                    return Ok(Step::Continue(target.address()));
                }
                Op::JumpIndirect => {
                    return Ok(Step::Continue(arena.read_u64(VALUE).unwrap()));
                }
                Op::Ret => {
                    return Ok(match self.calls.pop() {
                        Some(address) => Step::Continue(address),
                        None => Step::Halt,
                    });
                }
                Op::FaultExit(address) => {
                    memory.fetch_code(*address, &mut [0u8; 1])?;
                    return Ok(Step::Continue(*address));
                }
                Op::NotDecodable(address) => return Ok(Step::Undecodable(*address)),
                Op::Unreachable(address) => panic!("control fell through to {address:#x}"),
            }
        }
        panic!("{} ended without a terminator", slot.name)
    }
}
