use std::collections::{BTreeMap, VecDeque};

use tracing::trace;

use crate::block_map::{BlockExport, TranslatedSet};
use crate::TranslateError;

/// Export name of the compiled entry point for `address`.
pub fn export_name(address: u64) -> String {
    format!("blk_{address:#018x}")
}

/// A guest address waiting to be compiled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenAddress {
    pub address: u64,
    /// Hops from the root of the translation request.
    pub depth: u32,
}

/// Where code for a referenced address comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Compiled in this batch as the function `name`.
    Compiled { name: String, produced: bool },
    /// Reached through block map dispatch at run time.
    Linked,
}

/// FIFO of addresses to compile plus the placement decided for every address seen so far.
#[derive(Debug)]
pub struct Worklist {
    max_depth: u32,
    queue: VecDeque<OpenAddress>,
    placements: BTreeMap<u64, Placement>,
}

impl Worklist {
    pub fn new(max_depth: u32) -> Self {
        Self {
            max_depth,
            queue: VecDeque::new(),
            placements: BTreeMap::new(),
        }
    }

    pub fn push_root(&mut self, address: u64, translated: &dyn TranslatedSet) -> &Placement {
        self.place(address, 0, translated)
    }

    /// Decides how `address` is reached, scheduling it for compilation if it is new, not yet
    /// translated and within the chase depth.
    pub fn place(&mut self, address: u64, depth: u32, translated: &dyn TranslatedSet) -> &Placement {
        let max_depth = self.max_depth;
        let queue = &mut self.queue;
        self.placements.entry(address).or_insert_with(|| {
            if translated.is_translated(address) || depth > max_depth {
                trace!(depth, "linking {address:#x} through dispatch");
                Placement::Linked
            } else {
                queue.push_back(OpenAddress { address, depth });
                Placement::Compiled {
                    name: export_name(address),
                    produced: false,
                }
            }
        })
    }

    #[inline]
    pub fn pop(&mut self) -> Option<OpenAddress> {
        self.queue.pop_front()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn placement(&self, address: u64) -> Option<&Placement> {
        self.placements.get(&address)
    }

    pub(crate) fn mark_produced(&mut self, address: u64) {
        if let Some(Placement::Compiled { produced, .. }) = self.placements.get_mut(&address) {
            *produced = true;
        }
    }

    /// Every address compiled in this batch, in address order.
    pub fn exports(&self) -> Result<Vec<BlockExport>, TranslateError> {
        self.placements
            .iter()
            .filter_map(|(&address, placement)| match placement {
                Placement::Compiled { name, produced } => Some((address, name, *produced)),
                Placement::Linked => None,
            })
            .map(|(address, name, produced)| {
                if produced {
                    Ok(BlockExport {
                        name: name.clone(),
                        address,
                    })
                } else {
                    Err(TranslateError::Unproduced {
                        address,
                        name: name.clone(),
                    })
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn names_are_zero_padded() {
        assert_eq!(export_name(0x1000), "blk_0x0000000000001000");
    }

    #[test]
    fn depth_and_translated_addresses_are_linked() {
        let translated: HashSet<u64> = [0x3000].into_iter().collect();
        let mut worklist = Worklist::new(1);

        assert!(matches!(
            worklist.push_root(0x1000, &translated),
            Placement::Compiled { .. }
        ));
        assert!(matches!(worklist.place(0x2000, 1, &translated), Placement::Compiled { .. }));
        assert_eq!(worklist.place(0x3000, 1, &translated), &Placement::Linked);
        assert_eq!(worklist.place(0x4000, 2, &translated), &Placement::Linked);
        // First decision sticks.
        assert!(matches!(worklist.place(0x2000, 5, &translated), Placement::Compiled { .. }));

        assert_eq!(
            worklist.pop(),
            Some(OpenAddress {
                address: 0x1000,
                depth: 0
            })
        );
        assert_eq!(worklist.pop().map(|open| open.address), Some(0x2000));
        assert!(worklist.is_empty());
    }

    #[test]
    fn exports_require_production() {
        let mut worklist = Worklist::new(4);
        worklist.push_root(0x1000, &HashSet::<u64>::new());
        assert_eq!(
            worklist.exports(),
            Err(TranslateError::Unproduced {
                address: 0x1000,
                name: export_name(0x1000),
            })
        );

        worklist.mark_produced(0x1000);
        assert_eq!(
            worklist.exports().unwrap(),
            vec![BlockExport {
                name: export_name(0x1000),
                address: 0x1000
            }]
        );
    }
}
