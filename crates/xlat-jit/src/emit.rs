use std::collections::BTreeSet;

use xlat_mem::{MemoryFault, MemoryType};

use crate::block_map::TranslatedSet;
use crate::worklist::{Placement, Worklist};

/// How a jump or call reaches its target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JumpTarget {
    /// A label inside the function being emitted.
    Local(u64),
    /// Another function of the module being built.
    Function { address: u64, name: String },
    /// Looked up in the block map at run time.
    Dispatch(u64),
}

impl JumpTarget {
    pub fn address(&self) -> u64 {
        match *self {
            JumpTarget::Local(address)
            | JumpTarget::Function { address, .. }
            | JumpTarget::Dispatch(address) => address,
        }
    }
}

/// Bytecode backend. One emitter builds one module per translation batch.
///
/// Memory accesses are tagged with the lookup bank the generated code passes to
/// [`xlat_mem::VirtualMemory::load`] and friends; operands live wherever the backend keeps them.
pub trait Emitter {
    type Module;

    fn begin_function(&mut self, name: &str, address: u64);
    fn label(&mut self, address: u64);

    fn load(&mut self, bank: u32, ty: MemoryType);
    fn store(&mut self, bank: u32, ty: MemoryType);
    fn fetch(&mut self, bank: u32, ty: MemoryType);

    fn jump(&mut self, target: &JumpTarget);
    /// Conditional jump; the condition is produced by the preceding instruction semantics.
    fn branch(&mut self, target: &JumpTarget);
    fn call(&mut self, target: &JumpTarget, return_address: u64);
    /// Jump to a guest address computed at run time.
    fn jump_indirect(&mut self);
    fn ret(&mut self);

    /// Leaves the block reporting that the instruction at the fault address is not readable.
    fn fault_exit(&mut self, fault: &MemoryFault);
    /// Leaves the block reporting that the bytes at `address` are not a valid instruction.
    fn not_decodable(&mut self, address: u64);
    /// Marks the end of a block that control can never fall out of.
    fn unreachable(&mut self, address: u64);

    fn end_function(&mut self);
    fn finish(self) -> Self::Module;
}

/// Handed to a [`crate::Producer`] for each instruction of a super-block. Resolves branch
/// targets to local labels, functions of the current batch or block map dispatch.
pub struct Writer<'a, E: Emitter> {
    emitter: &'a mut E,
    local: &'a BTreeSet<u64>,
    worklist: &'a mut Worklist,
    translated: &'a dyn TranslatedSet,
    depth: u32,
}

impl<'a, E: Emitter> Writer<'a, E> {
    pub(crate) fn new(
        emitter: &'a mut E,
        local: &'a BTreeSet<u64>,
        worklist: &'a mut Worklist,
        translated: &'a dyn TranslatedSet,
        depth: u32,
    ) -> Self {
        Self {
            emitter,
            local,
            worklist,
            translated,
            depth,
        }
    }

    /// The backend, for architecture-specific operations.
    #[inline]
    pub fn backend(&mut self) -> &mut E {
        &mut *self.emitter
    }

    #[inline]
    pub fn read(&mut self, bank: u32, ty: MemoryType) {
        self.emitter.load(bank, ty);
    }

    #[inline]
    pub fn write(&mut self, bank: u32, ty: MemoryType) {
        self.emitter.store(bank, ty);
    }

    #[inline]
    pub fn code(&mut self, bank: u32, ty: MemoryType) {
        self.emitter.fetch(bank, ty);
    }

    pub fn jump(&mut self, address: u64) {
        let target = self.target(address);
        self.emitter.jump(&target);
    }

    pub fn branch(&mut self, address: u64) {
        let target = self.target(address);
        self.emitter.branch(&target);
    }

    /// Calls `address`; the return address becomes an entry point of its own.
    pub fn call(&mut self, address: u64, return_address: u64) {
        let target = self.target(address);
        self.worklist
            .place(return_address, self.depth + 1, self.translated);
        self.emitter.call(&target, return_address);
    }

    #[inline]
    pub fn jump_indirect(&mut self) {
        self.emitter.jump_indirect();
    }

    #[inline]
    pub fn ret(&mut self) {
        self.emitter.ret();
    }

    /// Resolves how code at `address` is reached from the block being emitted.
    pub fn target(&mut self, address: u64) -> JumpTarget {
        if self.local.contains(&address) {
            return JumpTarget::Local(address);
        }
        match self
            .worklist
            .place(address, self.depth + 1, self.translated)
        {
            Placement::Compiled { name, .. } => JumpTarget::Function {
                address,
                name: name.clone(),
            },
            Placement::Linked => JumpTarget::Dispatch(address),
        }
    }
}
