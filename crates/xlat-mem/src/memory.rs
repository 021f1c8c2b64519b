use tracing::{debug, trace, warn};

use crate::cache::{FastEntry, FastResolveCache, LookupCache, LookupWindow, MemoryStats};
use crate::consistency;
use crate::phys::{PhysicalPool, PhysicalSlot};
use crate::usage::AccessKind;
use crate::virt::{VirtualSlot, VirtualTable};
use crate::{
    ConfigError, MemoryConfig, MemoryError, MemoryFault, MemoryResult, MemoryType, Usage,
};

/// A run of guest addresses with uniform usage, as reported by [`VirtualMemory::regions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub address: u64,
    pub size: u64,
    pub usage: Usage,
}

impl Region {
    #[inline]
    pub fn end(&self) -> u64 {
        self.address + self.size
    }
}

/// Backing run of a validated bulk access.
#[derive(Debug, Clone, Copy)]
struct Segment {
    physical: u64,
    len: u64,
    executable: bool,
}

/// Guest virtual address space emulated over a single growable host byte pool.
#[derive(Debug)]
pub struct VirtualMemory {
    config: MemoryConfig,
    pool: PhysicalPool,
    table: VirtualTable,
    windows: LookupCache,
    fast: FastResolveCache,
    /// Window bank used by host-side bulk accesses; guest banks are `0..lookup_banks`.
    host_bank: usize,
    execute_dirty: bool,
    stats: MemoryStats,
}

impl VirtualMemory {
    pub fn new(config: MemoryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let pool = config
            .initial_phys_pages
            .checked_mul(config.phys_page_size)
            .and_then(|size| PhysicalPool::new(size).ok())
            .ok_or(ConfigError::Invalid("initial physical pool cannot be allocated"))?;
        let host_bank = config.lookup_banks as usize;
        Ok(Self {
            windows: LookupCache::new(host_bank + 1),
            fast: FastResolveCache::new(config.page_size),
            host_bank,
            pool,
            table: VirtualTable::default(),
            execute_dirty: false,
            stats: MemoryStats::default(),
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    #[inline]
    pub fn stats(&self) -> MemoryStats {
        self.stats
    }

    #[inline]
    pub fn page_size(&self) -> u64 {
        self.config.page_size
    }

    /// Current size of the physical pool in bytes.
    #[inline]
    pub fn pool_size(&self) -> u64 {
        self.pool.len()
    }

    #[inline]
    pub fn slots(&self) -> &[VirtualSlot] {
        self.table.slots()
    }

    #[inline]
    pub fn physical_slots(&self) -> &[PhysicalSlot] {
        self.pool.slots()
    }

    /// Mapped layout with adjacent slots of equal usage merged.
    pub fn regions(&self) -> Vec<Region> {
        let mut regions: Vec<Region> = Vec::new();
        for slot in self.table.slots() {
            match regions.last_mut() {
                Some(last) if last.end() == slot.address && last.usage == slot.usage => {
                    last.size += slot.size;
                }
                _ => regions.push(Region {
                    address: slot.address,
                    size: slot.size,
                    usage: slot.usage,
                }),
            }
        }
        regions
    }

    pub fn usage_at(&self, address: u64) -> Option<Usage> {
        self.table
            .containing(address)
            .map(|idx| self.table.slots()[idx].usage)
    }

    fn check_usage(usage: Usage) -> MemoryResult<()> {
        if Usage::all().contains(usage) {
            Ok(())
        } else {
            Err(MemoryError::InvalidArgument("unknown usage bits"))
        }
    }

    /// Validates an aligned, non-empty range and returns its end.
    fn check_range(&self, address: u64, size: u64) -> MemoryResult<u64> {
        let mask = self.config.page_size - 1;
        if size == 0 {
            return Err(MemoryError::InvalidArgument("size must be non-zero"));
        }
        if size & mask != 0 {
            return Err(MemoryError::InvalidArgument("size is not page aligned"));
        }
        if address & mask != 0 {
            return Err(MemoryError::InvalidArgument("address is not page aligned"));
        }
        address
            .checked_add(size)
            .ok_or(MemoryError::InvalidArgument("range wraps the address space"))
    }

    /// Maps `size` zeroed bytes at `address`, or at an allocator-chosen address when `address`
    /// is zero. Returns the mapped address.
    pub fn mmap(&mut self, address: u64, size: u64, usage: Usage) -> MemoryResult<u64> {
        Self::check_usage(usage)?;
        let address = if address == 0 {
            self.check_range(0, size)?;
            self.place(size)?
        } else {
            address
        };
        let end = self.check_range(address, size)?;
        if self.table.overlaps(address, end) {
            return Err(MemoryError::OutOfRange { address, size });
        }

        debug!(%usage, "mmap {address:#x}+{size:#x}");
        self.map_range(address, size, usage)?;
        self.compact();
        self.finish_mutation();
        Ok(address)
    }

    /// Maps `size` bytes at an address chosen by the allocator.
    pub fn alloc(&mut self, size: u64, usage: Usage) -> MemoryResult<u64> {
        self.mmap(0, size, usage)
    }

    pub fn munmap(&mut self, address: u64, size: u64) -> MemoryResult<()> {
        let end = self.check_range(address, size)?;
        if self.table.coverage(address, end).is_none() {
            return Err(MemoryError::PartiallyUnmapped { address, size });
        }

        debug!("munmap {address:#x}+{size:#x}");
        self.table.split_at(address);
        self.table.split_at(end);
        let range = self.table.first_ending_after(address)..self.table.first_ending_after(end);
        let removed = self.table.remove(range);

        let mut executable = false;
        for slot in &removed {
            self.pool.release(slot.physical, slot.size);
            executable |= slot.usage.contains(Usage::EXECUTE);
        }
        self.table.coalesce();
        if executable {
            self.raise_execute_dirty();
        }
        self.finish_mutation();
        Ok(())
    }

    pub fn mprotect(&mut self, address: u64, size: u64, usage: Usage) -> MemoryResult<()> {
        Self::check_usage(usage)?;
        let end = self.check_range(address, size)?;
        if self.table.coverage(address, end).is_none() {
            return Err(MemoryError::PartiallyUnmapped { address, size });
        }

        debug!(%usage, "mprotect {address:#x}+{size:#x}");
        self.table.split_at(address);
        self.table.split_at(end);
        let range = self.table.first_ending_after(address)..self.table.first_ending_after(end);

        let mut execute_changed = false;
        for slot in self.table.slots_mut(range) {
            execute_changed |=
                slot.usage.contains(Usage::EXECUTE) != usage.contains(Usage::EXECUTE);
            slot.usage = usage;
        }
        self.table.coalesce();
        if execute_changed {
            self.raise_execute_dirty();
        }
        self.finish_mutation();
        Ok(())
    }

    /// Copies guest bytes starting at `address` into `dst`. Every byte must grant `usage`.
    pub fn mread(&mut self, dst: &mut [u8], address: u64, usage: Usage) -> MemoryResult<()> {
        self.read_into(dst, address, usage)?;
        Ok(())
    }

    /// Copies `src` into guest memory starting at `address`. Every byte must grant `usage`.
    pub fn mwrite(&mut self, address: u64, src: &[u8], usage: Usage) -> MemoryResult<()> {
        let segments = self.segments(address, src.len() as u64, usage)?;
        let mut offset = 0;
        for segment in segments {
            let len = segment.len as usize;
            self.pool
                .bytes_mut(segment.physical, segment.len)
                .copy_from_slice(&src[offset..offset + len]);
            offset += len;
            self.note_write(segment.executable);
        }
        Ok(())
    }

    /// Zeroes `len` guest bytes starting at `address`. Every byte must grant `usage`.
    pub fn mclear(&mut self, address: u64, len: u64, usage: Usage) -> MemoryResult<()> {
        let segments = self.segments(address, len, usage)?;
        for segment in segments {
            self.pool.zero(segment.physical, segment.len);
            self.note_write(segment.executable);
        }
        Ok(())
    }

    /// Reads instruction bytes for the decoder; requires `Execute` on every byte.
    pub fn fetch_code(&mut self, address: u64, dst: &mut [u8]) -> Result<(), MemoryFault> {
        self.read_into(dst, address, Usage::EXECUTE)
    }

    fn read_into(&mut self, dst: &mut [u8], address: u64, usage: Usage) -> Result<(), MemoryFault> {
        let segments = self.segments(address, dst.len() as u64, usage)?;
        let mut offset = 0;
        for segment in segments {
            let len = segment.len as usize;
            dst[offset..offset + len].copy_from_slice(self.pool.bytes(segment.physical, segment.len));
            offset += len;
        }
        Ok(())
    }

    /// Typed data load through guest lookup bank `bank`.
    pub fn load(&mut self, bank: u32, address: u64, ty: MemoryType) -> MemoryResult<u64> {
        let bank = self.check_bank(bank)?;
        let raw = self.read_typed(bank, AccessKind::Read, address, ty.width())?;
        Ok(ty.extend(raw))
    }

    /// Typed code load through guest lookup bank `bank`.
    pub fn fetch(&mut self, bank: u32, address: u64, ty: MemoryType) -> MemoryResult<u64> {
        let bank = self.check_bank(bank)?;
        let raw = self.read_typed(bank, AccessKind::Code, address, ty.width())?;
        Ok(ty.extend(raw))
    }

    /// Typed store through guest lookup bank `bank`; only the low `ty.width()` bytes are written.
    pub fn store(&mut self, bank: u32, address: u64, ty: MemoryType, value: u64) -> MemoryResult<()> {
        let bank = self.check_bank(bank)?;
        let width = ty.width();
        let bytes = value.to_le_bytes();
        let window = self.window(bank, AccessKind::Write, address, width as u64, Usage::WRITE)?;
        if !window.covers(address, width as u64) {
            return self.mwrite(address, &bytes[..width], Usage::WRITE);
        }
        self.pool
            .bytes_mut(window.translate(address), width as u64)
            .copy_from_slice(&bytes[..width]);
        self.note_write(window.executable);
        Ok(())
    }

    /// Window around `address` that grants `kind`'s usage, as cached for `bank`.
    pub fn lookup(
        &mut self,
        bank: u32,
        kind: AccessKind,
        address: u64,
        len: u64,
    ) -> MemoryResult<LookupWindow> {
        let bank = self.check_bank(bank)?;
        Ok(self.window(bank, kind, address, len, kind.usage())?)
    }

    fn check_bank(&self, bank: u32) -> MemoryResult<usize> {
        if bank < self.config.lookup_banks {
            Ok(bank as usize)
        } else {
            Err(MemoryError::InvalidBank {
                bank,
                banks: self.config.lookup_banks,
            })
        }
    }

    fn read_typed(
        &mut self,
        bank: usize,
        kind: AccessKind,
        address: u64,
        width: usize,
    ) -> Result<u64, MemoryFault> {
        let usage = kind.usage();
        let window = self.window(bank, kind, address, width as u64, usage)?;
        let mut bytes = [0u8; 8];
        if window.covers(address, width as u64) {
            bytes[..width].copy_from_slice(self.pool.bytes(window.translate(address), width as u64));
        } else {
            self.read_into(&mut bytes[..width], address, usage)?;
        }
        Ok(u64::from_le_bytes(bytes))
    }

    /// Returns true once after any event that may have invalidated translated code, then resets.
    pub fn take_execute_dirty(&mut self) -> bool {
        core::mem::take(&mut self.execute_dirty)
    }

    #[inline]
    pub fn is_execute_dirty(&self) -> bool {
        self.execute_dirty
    }

    fn raise_execute_dirty(&mut self) {
        if !self.execute_dirty {
            trace!("executable memory changed");
        }
        self.execute_dirty = true;
    }

    #[inline]
    fn note_write(&mut self, executable: bool) {
        if executable && self.config.detect_execute_writes {
            self.raise_execute_dirty();
        }
    }

    /// Panics with a description of the first layout invariant that does not hold.
    pub fn check_consistency(&self) {
        if let Err(violation) = consistency::verify(&self.pool, &self.table, self.config.page_size)
        {
            panic!("virtual memory layout is inconsistent: {violation}");
        }
    }

    fn finish_mutation(&mut self) {
        self.windows.clear();
        self.fast.clear();
        if self.config.check_consistency {
            self.check_consistency();
        }
    }

    fn window(
        &mut self,
        bank: usize,
        kind: AccessKind,
        address: u64,
        len: u64,
        usage: Usage,
    ) -> Result<LookupWindow, MemoryFault> {
        self.stats.lookups += 1;
        if let Some(window) = self.windows.get(bank, kind, address, len, usage) {
            self.stats.window_hits += 1;
            return Ok(window);
        }
        let window = self.resolve(kind, address, usage)?;
        self.windows.set(bank, kind, window);
        Ok(window)
    }

    /// Widest run around `address` that is contiguous in both spaces and grants `usage`.
    fn resolve(
        &mut self,
        kind: AccessKind,
        address: u64,
        usage: Usage,
    ) -> Result<LookupWindow, MemoryFault> {
        let idx = match self.fast.get(address, kind) {
            Some(idx) => {
                self.stats.fast_hits += 1;
                idx
            }
            None => {
                self.stats.table_walks += 1;
                trace!("fast resolve miss at {address:#x}");
                let Some(idx) = self.table.containing(address) else {
                    return Err(MemoryFault {
                        address,
                        required: usage,
                        actual: Usage::empty(),
                    });
                };
                let slot = self.table.slots()[idx];
                self.fast.insert(
                    address,
                    kind,
                    FastEntry {
                        address: slot.address,
                        size: slot.size,
                        index: idx,
                    },
                );
                idx
            }
        };

        let slots = self.table.slots();
        if !slots[idx].usage.permits(usage) {
            return Err(MemoryFault {
                address,
                required: usage,
                actual: slots[idx].usage,
            });
        }
        // Windows never mix executable and non-executable slots.
        let executable = slots[idx].usage.contains(Usage::EXECUTE);
        let joins = |slot: &VirtualSlot| {
            slot.usage.permits(usage) && slot.usage.contains(Usage::EXECUTE) == executable
        };
        let mut first = idx;
        while first > 0
            && slots[first - 1].is_contiguous_with(&slots[first])
            && joins(&slots[first - 1])
        {
            first -= 1;
        }
        let mut last = idx;
        while last + 1 < slots.len()
            && slots[last].is_contiguous_with(&slots[last + 1])
            && joins(&slots[last + 1])
        {
            last += 1;
        }
        Ok(LookupWindow {
            address: slots[first].address,
            physical: slots[first].physical,
            size: slots[last].end() - slots[first].address,
            usage,
            executable,
        })
    }

    /// Validates `[address, address + len)` against `usage` and returns its backing runs.
    fn segments(&mut self, address: u64, len: u64, usage: Usage) -> Result<Vec<Segment>, MemoryFault> {
        let kind = AccessKind::for_usage(usage);
        let mut segments = Vec::new();
        let mut cursor = address;
        let mut remaining = len;
        while remaining > 0 {
            let window = self.window(self.host_bank, kind, cursor, 1, usage)?;
            let run = (window.end() - cursor).min(remaining);
            segments.push(Segment {
                physical: window.translate(cursor),
                len: run,
                executable: window.executable,
            });
            remaining -= run;
            cursor = cursor.wrapping_add(run);
        }
        Ok(segments)
    }

    /// Leaves the layout untouched when the pool cannot grow.
    fn map_range(&mut self, address: u64, size: u64, usage: Usage) -> MemoryResult<()> {
        let prev = self
            .table
            .ending_at(address)
            .map(|idx| self.table.slots()[idx]);
        let next = self
            .table
            .starting_at(address + size)
            .map(|idx| self.table.slots()[idx]);

        match self.in_place_backing(prev, next, size)? {
            Some(physical) => {
                self.bind(address, physical, size, usage);
                Ok(())
            }
            None => self.map_relocating(address, size, usage, prev, next),
        }
    }

    /// Backing for a new range that leaves both neighbours where they are, if one exists.
    fn in_place_backing(
        &mut self,
        prev: Option<VirtualSlot>,
        next: Option<VirtualSlot>,
        size: u64,
    ) -> MemoryResult<Option<u64>> {
        if let Some(prev) = prev {
            let start = prev.physical_end();
            if self.pool.is_free(start, size) {
                if next.is_some_and(|next| next.physical == start + size) {
                    trace!("mmap fills the gap between both neighbours");
                } else {
                    trace!("mmap expands the previous mapping");
                }
                return Ok(Some(start));
            }
            let available = self.pool.len() - start;
            if self.pool.is_free(start, available) {
                trace!("mmap expands the previous mapping into new pool space");
                self.grow(size - available)?;
                return Ok(Some(start));
            }
        }
        let Some(start) = next.and_then(|next| next.physical.checked_sub(size)) else {
            return Ok(None);
        };
        Ok(self.pool.is_free(start, size).then(|| {
            trace!("mmap expands the next mapping downwards");
            start
        }))
    }

    fn bind(&mut self, address: u64, physical: u64, size: u64, usage: Usage) {
        self.pool.acquire(physical, size);
        self.pool.zero(physical, size);
        self.table.insert(VirtualSlot {
            address,
            physical,
            size,
            usage,
        });
        self.table.coalesce();
    }

    /// Moves the neighbours' backing so that they and the new range form one physical run.
    fn map_relocating(
        &mut self,
        address: u64,
        size: u64,
        usage: Usage,
        prev: Option<VirtualSlot>,
        next: Option<VirtualSlot>,
    ) -> MemoryResult<()> {
        let lead = prev.map_or(0, |slot| slot.size);
        let trail = next.map_or(0, |slot| slot.size);
        let total = lead + size + trail;

        for slot in prev.iter().chain(next.iter()) {
            self.pool.release(slot.physical, slot.size);
        }
        let dest = match self.relocation_target(prev, next, lead + size, total) {
            Ok(dest) => dest,
            Err(err) => {
                for slot in prev.iter().chain(next.iter()) {
                    self.pool.acquire(slot.physical, slot.size);
                }
                return Err(err);
            }
        };
        if lead + trail > 0 {
            self.stats.relocations += 1;
            debug!("relocating {total:#x} bytes of backing to pool offset {dest:#x}");
        }

        let moves: Vec<(u64, Vec<u8>)> = [
            prev.map(|slot| (slot, dest)),
            next.map(|slot| (slot, dest + lead + size)),
        ]
        .into_iter()
        .flatten()
        .filter(|(slot, to)| slot.physical != *to)
        .map(|(slot, to)| (to, self.pool.bytes(slot.physical, slot.size).to_vec()))
        .collect();
        for (to, bytes) in moves {
            self.pool
                .bytes_mut(to, bytes.len() as u64)
                .copy_from_slice(&bytes);
        }

        self.pool.acquire(dest, total);
        self.pool.zero(dest + lead, size);
        if let Some(idx) = self.table.ending_at(address) {
            self.table.get_mut(idx).physical = dest;
        }
        if let Some(idx) = self.table.starting_at(address + size) {
            self.table.get_mut(idx).physical = dest + lead + size;
        }
        self.table.insert(VirtualSlot {
            address,
            physical: dest + lead,
            size,
            usage,
        });
        self.table.coalesce();
        Ok(())
    }

    fn relocation_target(
        &mut self,
        prev: Option<VirtualSlot>,
        next: Option<VirtualSlot>,
        before_next: u64,
        total: u64,
    ) -> MemoryResult<u64> {
        if let Some(prev) = prev {
            if self.pool.is_free(prev.physical, total) {
                return Ok(prev.physical);
            }
        }
        if let Some(start) = next.and_then(|next| next.physical.checked_sub(before_next)) {
            if self.pool.is_free(start, total) {
                return Ok(start);
            }
        }
        if let Some(start) = self.pool.first_fit(total) {
            return Ok(start);
        }
        let tail = self.pool.free_tail();
        let start = self.pool.len() - tail;
        self.grow(total - tail)?;
        Ok(start)
    }

    fn grow(&mut self, deficit: u64) -> MemoryResult<()> {
        let bytes = deficit
            .max(self.config.min_growth())
            .checked_next_multiple_of(self.config.phys_page_size)
            .ok_or(MemoryError::PoolExhausted { requested: deficit })?;
        debug!(
            "growing physical pool by {bytes:#x} from {:#x} bytes",
            self.pool.len()
        );
        if let Err(err) = self.pool.grow(bytes) {
            warn!("{err}");
            return Err(err);
        }
        self.stats.pool_growths += 1;
        Ok(())
    }

    fn compact(&mut self) {
        if let Some(shift) = self.pool.compact(self.config.shift_factor) {
            debug!("compacted physical pool by {shift:#x} bytes");
            self.table.shift_physical(shift);
            self.stats.compactions += 1;
        }
    }

    /// Picks an address for an anonymous mapping of `size` bytes.
    fn place(&self, size: u64) -> MemoryResult<u64> {
        let base = self.config.alloc_base;
        let limit = self.config.alloc_limit;
        let fits = |start: u64| start.checked_add(size).is_some_and(|end| end <= limit);

        let highest = self.table.highest_end_below(limit);
        let candidate = if highest < base {
            Some(base)
        } else {
            highest.checked_add(self.config.alloc_spacing)
        };
        if let Some(start) = candidate.filter(|&start| fits(start)) {
            trace!("alloc places {size:#x} bytes after the highest mapping at {start:#x}");
            return Ok(start);
        }

        let mut best: Option<(u64, u64)> = None;
        let mut consider = |start: u64, len: u64| {
            if best.map_or(true, |(_, best_len)| len > best_len) {
                best = Some((start, len));
            }
        };
        let mut cursor = base;
        for slot in self.table.slots() {
            if slot.end() <= cursor {
                continue;
            }
            if slot.address >= limit {
                break;
            }
            if slot.address > cursor {
                consider(cursor, slot.address - cursor);
            }
            cursor = slot.end();
        }
        if cursor < limit {
            consider(cursor, limit - cursor);
        }

        match best {
            Some((start, len)) if len >= size => {
                let slack = ((len - size) / 2) & !(self.config.page_size - 1);
                trace!("alloc centres {size:#x} bytes in the gap at {start:#x}+{len:#x}");
                Ok(start + slack)
            }
            _ => Err(MemoryError::Exhausted { size }),
        }
    }
}
