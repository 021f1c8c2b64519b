//! Guest register state.
//!
//! Translated code addresses guest registers by byte offset into a fixed-size arena owned by the
//! context. Every accessor is bounds checked; multi-byte values are little-endian.

use std::ops::Range;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("context access {offset:#x}+{len} outside {size:#x}-byte arena")]
pub struct ArenaError {
    pub offset: usize,
    pub len: usize,
    pub size: usize,
}

#[derive(Clone, PartialEq, Eq)]
pub struct ContextArena {
    bytes: Box<[u8]>,
}

impl std::fmt::Debug for ContextArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextArena")
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

macro_rules! typed_access {
    ($($read:ident, $write:ident => $ty:ty;)*) => {
        $(
            pub fn $read(&self, offset: usize) -> Result<$ty, ArenaError> {
                let range = self.range(offset, std::mem::size_of::<$ty>())?;
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(&self.bytes[range]);
                Ok(<$ty>::from_le_bytes(raw))
            }

            pub fn $write(&mut self, offset: usize, value: $ty) -> Result<(), ArenaError> {
                let range = self.range(offset, std::mem::size_of::<$ty>())?;
                self.bytes[range].copy_from_slice(&value.to_le_bytes());
                Ok(())
            }
        )*
    };
}

impl ContextArena {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size].into_boxed_slice(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn range(&self, offset: usize, len: usize) -> Result<Range<usize>, ArenaError> {
        offset
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .map(|end| offset..end)
            .ok_or(ArenaError {
                offset,
                len,
                size: self.bytes.len(),
            })
    }

    pub fn read_bytes(&self, offset: usize, len: usize) -> Result<&[u8], ArenaError> {
        let range = self.range(offset, len)?;
        Ok(&self.bytes[range])
    }

    pub fn write_bytes(&mut self, offset: usize, src: &[u8]) -> Result<(), ArenaError> {
        let range = self.range(offset, src.len())?;
        self.bytes[range].copy_from_slice(src);
        Ok(())
    }

    typed_access! {
        read_u8, write_u8 => u8;
        read_u16, write_u16 => u16;
        read_u32, write_u32 => u32;
        read_u64, write_u64 => u64;
    }

    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }
}
