use thiserror::Error;
use xlat_mem::MemoryFault;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockMapError {
    #[error("block at {address:#x} is already registered")]
    DuplicateAddress { address: u64 },

    #[error("dispatch table cannot grow by {requested} entries")]
    TableGrowth { requested: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslateError {
    #[error("undecodable instruction at {address:#x}")]
    Undecodable { address: u64 },

    /// The entry address of a super-block could not be fetched.
    #[error("code fetch faulted: {0}")]
    Fault(#[from] MemoryFault),

    #[error("{name} at {address:#x} was scheduled but never produced")]
    Unproduced { address: u64, name: String },
}

pub type Result<T> = core::result::Result<T, TranslateError>;
