use thiserror::Error;

use crate::Usage;

pub type MemoryResult<T> = core::result::Result<T, MemoryError>;

/// A guest access that the current mappings do not permit.
///
/// `actual` is empty when `address` is not mapped at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("guest fault at {address:#x}: required {required}, mapped {actual}")]
pub struct MemoryFault {
    pub address: u64,
    pub required: Usage,
    pub actual: Usage,
}

impl MemoryFault {
    #[inline]
    pub fn is_unmapped(&self) -> bool {
        self.actual.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("range {address:#x}+{size:#x} overlaps an existing mapping")]
    OutOfRange { address: u64, size: u64 },

    #[error("range {address:#x}+{size:#x} is not fully mapped")]
    PartiallyUnmapped { address: u64, size: u64 },

    #[error("no free guest range of {size:#x} bytes")]
    Exhausted { size: u64 },

    #[error("physical pool cannot grow by {requested:#x} bytes")]
    PoolExhausted { requested: u64 },

    #[error("lookup bank {bank} out of range ({banks} configured)")]
    InvalidBank { bank: u32, banks: u32 },

    #[error(transparent)]
    Fault(#[from] MemoryFault),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} must be a non-zero power of two (got {value:#x})")]
    NotPowerOfTwo { field: &'static str, value: u64 },

    #[error("{field} must be a multiple of the page size (got {value:#x})")]
    Unaligned { field: &'static str, value: u64 },

    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}
