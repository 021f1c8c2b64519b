/// Width and extension rule of a typed guest memory access.
///
/// Narrow integer loads come in zero- and sign-extending flavours for both 32- and 64-bit results;
/// stores only use the width and ignore the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryType {
    U8To32,
    U16To32,
    U8To64,
    U16To64,
    U32To64,
    I8To32,
    I16To32,
    I8To64,
    I16To64,
    I32To64,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl MemoryType {
    /// Number of guest bytes touched by the access.
    #[inline]
    pub const fn width(self) -> usize {
        match self {
            MemoryType::U8To32 | MemoryType::U8To64 | MemoryType::I8To32 | MemoryType::I8To64 => 1,
            MemoryType::U16To32
            | MemoryType::U16To64
            | MemoryType::I16To32
            | MemoryType::I16To64 => 2,
            MemoryType::U32To64
            | MemoryType::I32To64
            | MemoryType::U32
            | MemoryType::I32
            | MemoryType::F32 => 4,
            MemoryType::U64 | MemoryType::I64 | MemoryType::F64 => 8,
        }
    }

    #[inline]
    pub const fn is_signed(self) -> bool {
        matches!(
            self,
            MemoryType::I8To32
                | MemoryType::I16To32
                | MemoryType::I8To64
                | MemoryType::I16To64
                | MemoryType::I32To64
                | MemoryType::I32
                | MemoryType::I64
        )
    }

    /// Width of the value handed to the translated code, in bytes.
    #[inline]
    pub const fn result_width(self) -> usize {
        match self {
            MemoryType::U8To32
            | MemoryType::U16To32
            | MemoryType::I8To32
            | MemoryType::I16To32
            | MemoryType::U32
            | MemoryType::I32
            | MemoryType::F32 => 4,
            _ => 8,
        }
    }

    /// Extends `raw` (little-endian bytes already gathered into the low bits) to the result width.
    ///
    /// 32-bit results are returned zero-extended into the `u64`; floats are returned as raw bits.
    pub fn extend(self, raw: u64) -> u64 {
        match self {
            MemoryType::U8To32 | MemoryType::U8To64 => raw & 0xff,
            MemoryType::U16To32 | MemoryType::U16To64 => raw & 0xffff,
            MemoryType::U32To64 | MemoryType::U32 | MemoryType::F32 => raw & 0xffff_ffff,
            MemoryType::I8To32 => u64::from(raw as u8 as i8 as i32 as u32),
            MemoryType::I16To32 => u64::from(raw as u16 as i16 as i32 as u32),
            MemoryType::I32 => u64::from(raw as u32),
            MemoryType::I8To64 => raw as u8 as i8 as i64 as u64,
            MemoryType::I16To64 => raw as u16 as i16 as i64 as u64,
            MemoryType::I32To64 => raw as u32 as i32 as i64 as u64,
            MemoryType::U64 | MemoryType::I64 | MemoryType::F64 => raw,
        }
    }
}
