//! Full structural check of the two slot tables.

use crate::phys::PhysicalPool;
use crate::virt::VirtualTable;

pub(crate) fn verify(pool: &PhysicalPool, table: &VirtualTable, page_size: u64) -> Result<(), String> {
    verify_physical(pool, page_size)?;
    verify_virtual(table, page_size)?;
    verify_backing(pool, table)
}

fn verify_physical(pool: &PhysicalPool, page_size: u64) -> Result<(), String> {
    let slots = pool.slots();
    if slots.is_empty() {
        return if pool.len() == 0 {
            Ok(())
        } else {
            Err(format!("pool of {:#x} bytes has no physical slots", pool.len()))
        };
    }

    let mut cursor = 0;
    for (idx, slot) in slots.iter().enumerate() {
        if slot.offset != cursor {
            return Err(format!(
                "physical slot {idx} starts at {:#x}, expected {cursor:#x}",
                slot.offset
            ));
        }
        if slot.size == 0 || slot.size % page_size != 0 {
            return Err(format!("physical slot {idx} has bad size {:#x}", slot.size));
        }
        if idx > 0 && slots[idx - 1].users == slot.users {
            return Err(format!(
                "physical slots {} and {idx} share user count {}",
                idx - 1,
                slot.users
            ));
        }
        cursor = slot.end();
    }
    if cursor != pool.len() {
        return Err(format!(
            "physical slots end at {cursor:#x} but the pool holds {:#x} bytes",
            pool.len()
        ));
    }
    Ok(())
}

fn verify_virtual(table: &VirtualTable, page_size: u64) -> Result<(), String> {
    let slots = table.slots();
    for (idx, slot) in slots.iter().enumerate() {
        if slot.size == 0 || slot.size % page_size != 0 {
            return Err(format!("virtual slot {idx} has bad size {:#x}", slot.size));
        }
        if slot.address % page_size != 0 || slot.physical % page_size != 0 {
            return Err(format!(
                "virtual slot {idx} at {:#x} (backing {:#x}) is unaligned",
                slot.address, slot.physical
            ));
        }
        let Some(prev) = idx.checked_sub(1).map(|prev| slots[prev]) else {
            continue;
        };
        if prev.end() > slot.address {
            return Err(format!(
                "virtual slots {} and {idx} overlap at {:#x}",
                idx - 1,
                slot.address
            ));
        }
        if prev.merges_with(slot) {
            return Err(format!(
                "virtual slots {} and {idx} should have been merged at {:#x}",
                idx - 1,
                slot.address
            ));
        }
    }
    Ok(())
}

fn verify_backing(pool: &PhysicalPool, table: &VirtualTable) -> Result<(), String> {
    let mapped = table.total_size();
    let used = pool.used();
    if mapped != used {
        return Err(format!(
            "{mapped:#x} bytes are mapped but {used:#x} physical bytes are in use"
        ));
    }

    let mut backing: Vec<(u64, u64, u64)> = table
        .slots()
        .iter()
        .map(|slot| (slot.physical, slot.physical_end(), slot.address))
        .collect();
    backing.sort_unstable();
    for pair in backing.windows(2) {
        if pair[0].1 > pair[1].0 {
            return Err(format!(
                "mappings at {:#x} and {:#x} share physical bytes",
                pair[0].2, pair[1].2
            ));
        }
    }

    for &(start, end, address) in &backing {
        if end > pool.len() {
            return Err(format!(
                "mapping at {address:#x} is backed past the end of the pool"
            ));
        }
        let covered = pool
            .slots()
            .iter()
            .filter(|slot| slot.offset < end && slot.end() > start)
            .all(|slot| !slot.is_free());
        if !covered {
            return Err(format!(
                "mapping at {address:#x} is backed by free physical bytes"
            ));
        }
    }
    Ok(())
}
