use core::ops::Range;

use crate::Usage;

/// A mapped guest range and the pool offset that backs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualSlot {
    pub address: u64,
    pub physical: u64,
    pub size: u64,
    pub usage: Usage,
}

impl VirtualSlot {
    #[inline]
    pub fn end(&self) -> u64 {
        self.address + self.size
    }

    #[inline]
    pub fn physical_end(&self) -> u64 {
        self.physical + self.size
    }

    #[inline]
    pub fn contains(&self, address: u64) -> bool {
        address >= self.address && address < self.end()
    }

    /// Whether `next` continues `self` in both address spaces.
    #[inline]
    pub fn is_contiguous_with(&self, next: &VirtualSlot) -> bool {
        self.end() == next.address && self.physical_end() == next.physical
    }

    /// Whether `self` and `next` would be represented as a single slot.
    #[inline]
    pub fn merges_with(&self, next: &VirtualSlot) -> bool {
        self.is_contiguous_with(next) && self.usage == next.usage
    }
}

/// Sorted, non-overlapping list of [`VirtualSlot`]s.
#[derive(Debug, Clone, Default)]
pub(crate) struct VirtualTable {
    slots: Vec<VirtualSlot>,
}

impl VirtualTable {
    #[inline]
    pub(crate) fn slots(&self) -> &[VirtualSlot] {
        &self.slots
    }

    /// Index of the first slot that ends after `address`.
    #[inline]
    pub(crate) fn first_ending_after(&self, address: u64) -> usize {
        self.slots.partition_point(|slot| slot.end() <= address)
    }

    pub(crate) fn containing(&self, address: u64) -> Option<usize> {
        let idx = self.first_ending_after(address);
        self.slots
            .get(idx)
            .filter(|slot| slot.contains(address))
            .map(|_| idx)
    }

    pub(crate) fn overlaps(&self, address: u64, end: u64) -> bool {
        self.slots
            .get(self.first_ending_after(address))
            .is_some_and(|slot| slot.address < end)
    }

    /// Slot ending exactly at `address`.
    pub(crate) fn ending_at(&self, address: u64) -> Option<usize> {
        let idx = self.first_ending_after(address);
        idx.checked_sub(1)
            .filter(|&prev| self.slots[prev].end() == address)
    }

    /// Slot starting exactly at `address`.
    pub(crate) fn starting_at(&self, address: u64) -> Option<usize> {
        let idx = self.first_ending_after(address);
        self.slots
            .get(idx)
            .filter(|slot| slot.address == address)
            .map(|_| idx)
    }

    /// Indices of the slots intersecting `[address, end)` if they cover it without holes.
    pub(crate) fn coverage(&self, address: u64, end: u64) -> Option<Range<usize>> {
        let first = self.first_ending_after(address);
        let mut cursor = address;
        let mut idx = first;
        while cursor < end {
            let slot = self.slots.get(idx)?;
            if slot.address > cursor {
                return None;
            }
            cursor = slot.end();
            idx += 1;
        }
        Some(first..idx)
    }

    pub(crate) fn split_at(&mut self, address: u64) {
        let Some(idx) = self.containing(address) else {
            return;
        };
        let slot = self.slots[idx];
        if slot.address == address {
            return;
        }
        let head = address - slot.address;
        self.slots[idx].size = head;
        self.slots.insert(
            idx + 1,
            VirtualSlot {
                address,
                physical: slot.physical + head,
                size: slot.size - head,
                usage: slot.usage,
            },
        );
    }

    pub(crate) fn insert(&mut self, slot: VirtualSlot) {
        let idx = self.first_ending_after(slot.address);
        self.slots.insert(idx, slot);
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, idx: usize) -> &mut VirtualSlot {
        &mut self.slots[idx]
    }

    pub(crate) fn slots_mut(&mut self, range: Range<usize>) -> &mut [VirtualSlot] {
        &mut self.slots[range]
    }

    pub(crate) fn remove(&mut self, range: Range<usize>) -> Vec<VirtualSlot> {
        self.slots.drain(range).collect()
    }

    pub(crate) fn coalesce(&mut self) {
        self.slots.dedup_by(|next, prev| {
            if prev.merges_with(next) {
                prev.size += next.size;
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn shift_physical(&mut self, shift: u64) {
        for slot in &mut self.slots {
            slot.physical -= shift;
        }
    }

    /// End of the highest slot starting below `limit`, or zero when there is none.
    pub(crate) fn highest_end_below(&self, limit: u64) -> u64 {
        let count = self.slots.partition_point(|slot| slot.address < limit);
        count
            .checked_sub(1)
            .map_or(0, |idx| self.slots[idx].end())
    }

    pub(crate) fn total_size(&self) -> u64 {
        self.slots.iter().map(|slot| slot.size).sum()
    }
}
