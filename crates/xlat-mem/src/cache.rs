//! Lookup acceleration for [`crate::VirtualMemory`].
//!
//! Two layers sit in front of the slot table:
//! - [`LookupCache`] keeps one validated window per (bank, access kind). A hit is a bounds check.
//! - [`FastResolveCache`] is a small direct-mapped table keyed by (page, access kind) that
//!   short-circuits the binary search on a window miss.
//!
//! Both are cleared on every layout change.

use crate::usage::AccessKind;
use crate::Usage;

/// Number of entries in the fast resolve table.
pub const FAST_RESOLVE_ENTRIES: usize = 256;
const FAST_RESOLVE_MASK: usize = FAST_RESOLVE_ENTRIES - 1;

const _: () = {
    assert!(FAST_RESOLVE_ENTRIES.is_power_of_two());
    assert!(FAST_RESOLVE_ENTRIES >= AccessKind::COUNT);
};

/// A maximal run of guest addresses that is contiguous in both address spaces and grants at
/// least `usage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupWindow {
    pub address: u64,
    pub physical: u64,
    pub size: u64,
    /// Rights the window was validated for.
    pub usage: Usage,
    /// Every slot inside the window is executable.
    pub executable: bool,
}

impl LookupWindow {
    #[inline]
    pub fn end(&self) -> u64 {
        self.address + self.size
    }

    /// Whether `[address, address + len)` lies inside the window.
    #[inline]
    pub fn covers(&self, address: u64, len: u64) -> bool {
        address
            .checked_sub(self.address)
            .and_then(|offset| offset.checked_add(len))
            .is_some_and(|end| end <= self.size)
    }

    #[inline]
    pub fn translate(&self, address: u64) -> u64 {
        self.physical + (address - self.address)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct LookupCache {
    windows: Vec<Option<LookupWindow>>,
}

impl LookupCache {
    pub(crate) fn new(banks: usize) -> Self {
        Self {
            windows: vec![None; banks * AccessKind::COUNT],
        }
    }

    #[inline]
    fn slot(bank: usize, kind: AccessKind) -> usize {
        bank * AccessKind::COUNT + kind.index()
    }

    /// Cached window for `bank`/`kind` if it covers the access and grants `usage`.
    #[inline]
    pub(crate) fn get(
        &self,
        bank: usize,
        kind: AccessKind,
        address: u64,
        len: u64,
        usage: Usage,
    ) -> Option<LookupWindow> {
        self.windows[Self::slot(bank, kind)]
            .filter(|window| window.usage.permits(usage) && window.covers(address, len))
    }

    #[inline]
    pub(crate) fn set(&mut self, bank: usize, kind: AccessKind, window: LookupWindow) {
        self.windows[Self::slot(bank, kind)] = Some(window);
    }

    pub(crate) fn clear(&mut self) {
        self.windows.fill(None);
    }
}

/// Resolved slot as cached by [`FastResolveCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FastEntry {
    pub(crate) address: u64,
    pub(crate) size: u64,
    pub(crate) index: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct FastResolveCache {
    entries: Box<[Option<FastEntry>; FAST_RESOLVE_ENTRIES]>,
    page_shift: u32,
}

impl FastResolveCache {
    pub(crate) fn new(page_size: u64) -> Self {
        Self {
            entries: Box::new([None; FAST_RESOLVE_ENTRIES]),
            page_shift: page_size.trailing_zeros(),
        }
    }

    #[inline]
    fn slot(&self, address: u64, kind: AccessKind) -> usize {
        let page = address >> self.page_shift;
        let mixed = page ^ (page >> 8) ^ ((kind.index() as u64) << 6);
        (mixed as usize) & FAST_RESOLVE_MASK
    }

    /// Slot index of the mapping containing `address`, if remembered.
    #[inline]
    pub(crate) fn get(&self, address: u64, kind: AccessKind) -> Option<usize> {
        self.entries[self.slot(address, kind)]
            .filter(|entry| address >= entry.address && address - entry.address < entry.size)
            .map(|entry| entry.index)
    }

    #[inline]
    pub(crate) fn insert(&mut self, address: u64, kind: AccessKind, entry: FastEntry) {
        let slot = self.slot(address, kind);
        self.entries[slot] = Some(entry);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.fill(None);
    }
}

/// Counters describing how lookups were served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub lookups: u64,
    pub window_hits: u64,
    pub fast_hits: u64,
    pub table_walks: u64,
    pub pool_growths: u64,
    pub compactions: u64,
    pub relocations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> LookupWindow {
        LookupWindow {
            address: 0x1000,
            physical: 0x8000,
            size: 0x2000,
            usage: Usage::RW,
            executable: false,
        }
    }

    #[test]
    fn window_bounds() {
        let w = window();
        assert!(w.covers(0x1000, 0x2000));
        assert!(w.covers(0x2ff8, 8));
        assert!(!w.covers(0x2ffc, 8));
        assert!(!w.covers(0xfff, 1));
        assert!(!w.covers(u64::MAX, 1));
        assert_eq!(w.translate(0x1234), 0x8234);
    }

    #[test]
    fn lookup_cache_checks_usage() {
        let mut cache = LookupCache::new(2);
        cache.set(1, AccessKind::Read, window());
        assert!(cache.get(1, AccessKind::Read, 0x1000, 4, Usage::READ).is_some());
        assert!(cache.get(1, AccessKind::Read, 0x1000, 4, Usage::RX).is_none());
        assert!(cache.get(0, AccessKind::Read, 0x1000, 4, Usage::READ).is_none());
        assert!(cache.get(1, AccessKind::Write, 0x1000, 4, Usage::WRITE).is_none());
        cache.clear();
        assert!(cache.get(1, AccessKind::Read, 0x1000, 4, Usage::READ).is_none());
    }

    #[test]
    fn fast_cache_verifies_range() {
        let mut cache = FastResolveCache::new(0x1000);
        cache.insert(
            0x5000,
            AccessKind::Code,
            FastEntry {
                address: 0x4000,
                size: 0x2000,
                index: 3,
            },
        );
        assert_eq!(cache.get(0x5010, AccessKind::Code), Some(3));
        assert_eq!(cache.get(0x5010, AccessKind::Read), None);
    }
}
