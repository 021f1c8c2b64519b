use xlat_mem::{MemoryFault, MemoryType, VirtualMemory};

use crate::decode::{Decoder, FetchError, Fetched, InstClass, Producer};
use crate::emit::{Emitter, JumpTarget, Writer};
use crate::superblock::DecodedInst;

/// Opcodes of the toy ISA. Every instruction is 4 bytes: opcode, padding, then a little-endian
/// `i16` offset relative to the instruction address.
pub mod op {
    pub const NOP: u8 = 0x01;
    pub const JMP: u8 = 0x02;
    pub const BNZ: u8 = 0x03;
    pub const RET: u8 = 0x04;
    pub const LOAD: u8 = 0x05;
    pub const STORE: u8 = 0x06;
    pub const CALL: u8 = 0x07;
}

pub const INST_SIZE: u64 = 4;

pub fn encode(opcode: u8, offset: i16) -> [u8; 4] {
    let [lo, hi] = offset.to_le_bytes();
    [opcode, 0, lo, hi]
}

pub fn assemble(program: &[(u8, i16)]) -> Vec<u8> {
    program
        .iter()
        .flat_map(|&(opcode, offset)| encode(opcode, offset))
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ToyInst {
    pub opcode: u8,
    pub offset: i16,
}

/// Decoder and producer for the toy ISA. Records every fetched address.
#[derive(Debug, Default)]
pub struct ToyIsa {
    pub fetched: Vec<u64>,
}

impl Decoder for ToyIsa {
    type Inst = ToyInst;

    fn fetch(
        &mut self,
        memory: &mut VirtualMemory,
        address: u64,
    ) -> Result<Fetched<ToyInst>, FetchError> {
        self.fetched.push(address);
        let mut bytes = [0u8; 4];
        memory.fetch_code(address, &mut bytes)?;
        let inst = ToyInst {
            opcode: bytes[0],
            offset: i16::from_le_bytes([bytes[2], bytes[3]]),
        };
        let target = address.wrapping_add_signed(i64::from(inst.offset));
        let (class, target) = match inst.opcode {
            op::NOP | op::LOAD | op::STORE => (InstClass::Plain, None),
            op::JMP => (InstClass::JumpDirect, Some(target)),
            op::BNZ => (InstClass::ConditionalDirect, Some(target)),
            op::CALL => (InstClass::EndOfStrand, Some(target)),
            op::RET => (InstClass::EndOfStrand, None),
            _ => return Err(FetchError::Undecodable { address }),
        };
        Ok(Fetched {
            inst,
            size: INST_SIZE as u32,
            class,
            target,
        })
    }
}

impl<E: Emitter> Producer<E> for ToyIsa {
    fn produce(&mut self, writer: &mut Writer<'_, E>, inst: &DecodedInst<ToyInst>) {
        match (inst.inst.opcode, inst.target) {
            (op::LOAD, _) => writer.read(0, MemoryType::U32),
            (op::STORE, _) => writer.write(0, MemoryType::U32),
            (op::JMP, Some(target)) => writer.jump(target),
            (op::BNZ, Some(target)) => writer.branch(target),
            (op::CALL, Some(target)) => writer.call(target, inst.next_address()),
            (op::RET, _) => writer.ret(),
            _ => {}
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Label(u64),
    Load(u32, MemoryType),
    Store(u32, MemoryType),
    Fetch(u32, MemoryType),
    Jump(JumpTarget),
    Branch(JumpTarget),
    Call(JumpTarget, u64),
    JumpIndirect,
    Ret,
    FaultExit(u64),
    NotDecodable(u64),
    Unreachable(u64),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedFunction {
    pub name: String,
    pub address: u64,
    pub ops: Vec<Op>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordedModule {
    pub functions: Vec<RecordedFunction>,
}

impl RecordedModule {
    pub fn function(&self, address: u64) -> Option<&RecordedFunction> {
        self.functions.iter().find(|f| f.address == address)
    }
}

/// Emitter that records the operations it is asked to emit.
#[derive(Debug, Default)]
pub struct RecordingEmitter {
    module: RecordedModule,
    current: Option<RecordedFunction>,
}

impl RecordingEmitter {
    fn push(&mut self, op: Op) {
        if let Some(function) = self.current.as_mut() {
            function.ops.push(op);
        }
    }
}

impl Emitter for RecordingEmitter {
    type Module = RecordedModule;

    fn begin_function(&mut self, name: &str, address: u64) {
        self.current = Some(RecordedFunction {
            name: name.to_string(),
            address,
            ops: Vec::new(),
        });
    }

    fn label(&mut self, address: u64) {
        self.push(Op::Label(address));
    }

    fn load(&mut self, bank: u32, ty: MemoryType) {
        self.push(Op::Load(bank, ty));
    }

    fn store(&mut self, bank: u32, ty: MemoryType) {
        self.push(Op::Store(bank, ty));
    }

    fn fetch(&mut self, bank: u32, ty: MemoryType) {
        self.push(Op::Fetch(bank, ty));
    }

    fn jump(&mut self, target: &JumpTarget) {
        self.push(Op::Jump(target.clone()));
    }

    fn branch(&mut self, target: &JumpTarget) {
        self.push(Op::Branch(target.clone()));
    }

    fn call(&mut self, target: &JumpTarget, return_address: u64) {
        self.push(Op::Call(target.clone(), return_address));
    }

    fn jump_indirect(&mut self) {
        self.push(Op::JumpIndirect);
    }

    fn ret(&mut self) {
        self.push(Op::Ret);
    }

    fn fault_exit(&mut self, fault: &MemoryFault) {
        self.push(Op::FaultExit(fault.address));
    }

    fn not_decodable(&mut self, address: u64) {
        self.push(Op::NotDecodable(address));
    }

    fn unreachable(&mut self, address: u64) {
        self.push(Op::Unreachable(address));
    }

    fn end_function(&mut self) {
        if let Some(function) = self.current.take() {
            self.module.functions.push(function);
        }
    }

    fn finish(self) -> RecordedModule {
        self.module
    }
}
