//! Contiguous host byte pool backing every guest mapping.
//!
//! The pool is partitioned into [`PhysicalSlot`]s that cover it without gaps. A slot with
//! `users == 0` is free; adjacent slots never share the same user count.

use crate::{MemoryError, MemoryResult};

/// One run of the physical pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalSlot {
    pub offset: u64,
    pub size: u64,
    pub users: u32,
}

impl PhysicalSlot {
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.users == 0
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PhysicalPool {
    bytes: Vec<u8>,
    slots: Vec<PhysicalSlot>,
}

impl PhysicalPool {
    pub(crate) fn new(size: u64) -> MemoryResult<Self> {
        let mut pool = Self {
            bytes: Vec::new(),
            slots: Vec::new(),
        };
        pool.grow(size)?;
        Ok(pool)
    }

    #[inline]
    pub(crate) fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    #[inline]
    pub(crate) fn slots(&self) -> &[PhysicalSlot] {
        &self.slots
    }

    /// Index of the slot containing `offset`, or `slots.len()` when past the end.
    #[inline]
    fn index_of(&self, offset: u64) -> usize {
        self.slots.partition_point(|slot| slot.end() <= offset)
    }

    /// Whether `[start, start + len)` lies in the pool and is entirely unused.
    pub(crate) fn is_free(&self, start: u64, len: u64) -> bool {
        let Some(end) = start.checked_add(len) else {
            return false;
        };
        if end > self.len() {
            return false;
        }
        // Adjacent free slots are always merged, so a free range sits inside a single slot.
        match self.slots.get(self.index_of(start)) {
            Some(slot) => slot.is_free() && slot.end() >= end,
            None => len == 0,
        }
    }

    /// Size of the free run that ends the pool.
    pub(crate) fn free_tail(&self) -> u64 {
        match self.slots.last() {
            Some(slot) if slot.is_free() => slot.size,
            _ => 0,
        }
    }

    /// Bytes in use by at least one mapping.
    pub(crate) fn used(&self) -> u64 {
        self.slots
            .iter()
            .filter(|slot| !slot.is_free())
            .map(|slot| slot.size)
            .sum()
    }

    /// Offset of the lowest free run of at least `len` bytes.
    pub(crate) fn first_fit(&self, len: u64) -> Option<u64> {
        self.slots
            .iter()
            .find(|slot| slot.is_free() && slot.size >= len)
            .map(|slot| slot.offset)
    }

    /// Extends the pool by `bytes` zeroed bytes at the tail. Leaves the pool untouched when the
    /// host cannot provide them.
    pub(crate) fn grow(&mut self, bytes: u64) -> MemoryResult<()> {
        if bytes == 0 {
            return Ok(());
        }
        let exhausted = MemoryError::PoolExhausted { requested: bytes };
        let offset = self.len();
        let new_len = offset
            .checked_add(bytes)
            .and_then(|len| usize::try_from(len).ok())
            .ok_or(exhausted.clone())?;
        self.bytes
            .try_reserve_exact(new_len - self.bytes.len())
            .map_err(|_| exhausted)?;
        self.bytes.resize(new_len, 0);
        self.slots.push(PhysicalSlot {
            offset,
            size: bytes,
            users: 0,
        });
        self.coalesce();
        Ok(())
    }

    pub(crate) fn acquire(&mut self, start: u64, len: u64) {
        self.adjust(start, len, |users| users + 1);
    }

    pub(crate) fn release(&mut self, start: u64, len: u64) {
        self.adjust(start, len, |users| users.saturating_sub(1));
    }

    fn adjust(&mut self, start: u64, len: u64, update: impl Fn(u32) -> u32) {
        if len == 0 {
            return;
        }
        let end = start + len;
        self.split_at(start);
        self.split_at(end);
        let first = self.index_of(start);
        for slot in &mut self.slots[first..] {
            if slot.offset >= end {
                break;
            }
            slot.users = update(slot.users);
        }
        self.coalesce();
    }

    fn split_at(&mut self, offset: u64) {
        let idx = self.index_of(offset);
        let Some(slot) = self.slots.get(idx).copied() else {
            return;
        };
        if slot.offset == offset {
            return;
        }
        self.slots[idx].size = offset - slot.offset;
        self.slots.insert(
            idx + 1,
            PhysicalSlot {
                offset,
                size: slot.end() - offset,
                users: slot.users,
            },
        );
    }

    fn coalesce(&mut self) {
        self.slots.dedup_by(|next, prev| {
            if prev.users == next.users && prev.end() == next.offset {
                prev.size += next.size;
                true
            } else {
                false
            }
        });
    }

    #[inline]
    pub(crate) fn bytes(&self, start: u64, len: u64) -> &[u8] {
        &self.bytes[start as usize..(start + len) as usize]
    }

    #[inline]
    pub(crate) fn bytes_mut(&mut self, start: u64, len: u64) -> &mut [u8] {
        &mut self.bytes[start as usize..(start + len) as usize]
    }

    pub(crate) fn zero(&mut self, start: u64, len: u64) {
        self.bytes_mut(start, len).fill(0);
    }

    /// Drops a leading free run that is larger than `len / shift_factor` by sliding everything
    /// after it down to offset zero. The freed bytes reappear as free space at the tail.
    ///
    /// Returns the distance every backing offset moved.
    pub(crate) fn compact(&mut self, shift_factor: u64) -> Option<u64> {
        if self.slots.len() < 2 {
            return None;
        }
        let head = self.slots[0];
        if !head.is_free() || head.size <= self.len() / shift_factor {
            return None;
        }
        let shift = head.size;
        let total = self.len();
        self.bytes.copy_within(shift as usize.., 0);
        self.slots.remove(0);
        for slot in &mut self.slots {
            slot.offset -= shift;
        }
        self.slots.push(PhysicalSlot {
            offset: total - shift,
            size: shift,
            users: 0,
        });
        self.coalesce();
        Some(shift)
    }
}
