//! Guest address -> compiled entry point map.
//!
//! The authoritative map is a `HashMap`; a small direct-mapped cache in front of it serves the
//! hot dispatch path. Each registered export owns one slot of the dispatch table, which keeps the
//! compiled unit alive until the next [`BlockMap::flush`].

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::{debug, trace};

use crate::BlockMapError;

/// Number of entries in the direct-mapped resolve cache.
pub const BLOCK_CACHE_ENTRIES: usize = 1024;
const BLOCK_CACHE_MASK: usize = BLOCK_CACHE_ENTRIES - 1;

const _: () = {
    assert!(BLOCK_CACHE_ENTRIES.is_power_of_two());
};

/// Position of an entry point in the dispatch table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DispatchIndex(u32);

impl DispatchIndex {
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// An entry point produced by a translation batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockExport {
    pub name: String,
    pub address: u64,
}

/// An export after it was bound to a dispatch slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommittedExport {
    pub name: String,
    pub address: u64,
    pub index: DispatchIndex,
}

#[derive(Debug)]
pub struct DispatchSlot<U> {
    pub name: String,
    pub address: u64,
    pub unit: Rc<U>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockStats {
    pub registered: u64,
    pub batches: u64,
    pub flushes: u64,
    pub cache_hits: u64,
    pub map_hits: u64,
    pub misses: u64,
}

/// Answers whether an address already has compiled code.
pub trait TranslatedSet {
    fn is_translated(&self, address: u64) -> bool;
}

impl TranslatedSet for HashSet<u64> {
    fn is_translated(&self, address: u64) -> bool {
        self.contains(&address)
    }
}

#[derive(Debug)]
pub struct BlockMap<U> {
    entries: HashMap<u64, DispatchIndex>,
    cache: Box<[Option<(u64, DispatchIndex)>; BLOCK_CACHE_ENTRIES]>,
    table: Vec<DispatchSlot<U>>,
    stats: BlockStats,
}

impl<U> Default for BlockMap<U> {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn cache_slot(address: u64) -> usize {
    ((address ^ (address >> 10) ^ (address >> 20)) as usize) & BLOCK_CACHE_MASK
}

impl<U> BlockMap<U> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            cache: Box::new([None; BLOCK_CACHE_ENTRIES]),
            table: Vec::new(),
            stats: BlockStats::default(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn stats(&self) -> BlockStats {
        self.stats
    }

    pub fn contains(&self, address: u64) -> bool {
        self.entries.contains_key(&address)
    }

    /// Dispatch index for `address`, or `None` if it has not been translated.
    pub fn resolve(&mut self, address: u64) -> Option<DispatchIndex> {
        let slot = cache_slot(address);
        if let Some((cached, index)) = self.cache[slot] {
            if cached == address {
                self.stats.cache_hits += 1;
                return Some(index);
            }
        }
        match self.entries.get(&address) {
            Some(&index) => {
                self.stats.map_hits += 1;
                self.cache[slot] = Some((address, index));
                Some(index)
            }
            None => {
                self.stats.misses += 1;
                trace!("untranslated address {address:#x}");
                None
            }
        }
    }

    pub fn dispatch(&self, index: DispatchIndex) -> Option<&DispatchSlot<U>> {
        self.table.get(index.0 as usize)
    }

    /// Binds every export of a freshly compiled `unit` to a new dispatch slot.
    ///
    /// Either all exports are committed or the map is left untouched.
    pub fn register(
        &mut self,
        unit: U,
        exports: Vec<BlockExport>,
    ) -> Result<Vec<CommittedExport>, BlockMapError> {
        let mut seen = HashSet::with_capacity(exports.len());
        for export in &exports {
            if self.entries.contains_key(&export.address) || !seen.insert(export.address) {
                return Err(BlockMapError::DuplicateAddress {
                    address: export.address,
                });
            }
        }

        let requested = exports.len();
        let growth = BlockMapError::TableGrowth { requested };
        if self.table.len() + requested > u32::MAX as usize {
            return Err(growth);
        }
        self.table.try_reserve(requested).map_err(|_| growth.clone())?;
        self.entries.try_reserve(requested).map_err(|_| growth)?;

        let unit = Rc::new(unit);
        let committed: Vec<CommittedExport> = exports
            .into_iter()
            .map(|export| {
                let index = DispatchIndex(self.table.len() as u32);
                self.entries.insert(export.address, index);
                self.table.push(DispatchSlot {
                    name: export.name.clone(),
                    address: export.address,
                    unit: Rc::clone(&unit),
                });
                CommittedExport {
                    name: export.name,
                    address: export.address,
                    index,
                }
            })
            .collect();

        self.stats.registered += committed.len() as u64;
        self.stats.batches += 1;
        debug!(
            exports = committed.len(),
            total = self.entries.len(),
            "registered translated blocks"
        );
        Ok(committed)
    }

    /// Forgets every translated block and releases the compiled units.
    pub fn flush(&mut self) {
        debug!(blocks = self.entries.len(), "flushing block map");
        self.entries.clear();
        self.cache.fill(None);
        self.table.clear();
        self.stats.flushes += 1;
    }
}

impl<U> TranslatedSet for BlockMap<U> {
    fn is_translated(&self, address: u64) -> bool {
        self.contains(address)
    }
}
