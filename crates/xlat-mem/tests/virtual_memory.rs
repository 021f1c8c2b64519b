use xlat_mem::{
    MemoryConfig, MemoryError, MemoryFault, MemoryType, Region, Usage, VirtualMemory,
};

fn new_memory() -> VirtualMemory {
    VirtualMemory::new(MemoryConfig {
        check_consistency: true,
        ..MemoryConfig::default()
    })
    .unwrap()
}

#[test]
fn fresh_mappings_read_as_zero() {
    let mut mem = new_memory();
    mem.mmap(0x1000, 0x3000, Usage::RW).unwrap();

    let mut buf = vec![0xffu8; 0x3000];
    mem.mread(&mut buf, 0x1000, Usage::READ).unwrap();
    assert!(buf.iter().all(|&b| b == 0));
}

#[test]
fn adjacent_mappings_form_one_region() {
    let mut mem = new_memory();
    mem.mmap(0x1000, 0x2000, Usage::RW).unwrap();
    mem.mmap(0x3000, 0x1000, Usage::RW).unwrap();

    assert_eq!(
        mem.regions(),
        vec![Region {
            address: 0x1000,
            size: 0x3000,
            usage: Usage::RW
        }]
    );
    mem.check_consistency();
}

#[test]
fn remap_with_new_usage_reads_zero() {
    let mut mem = new_memory();
    mem.mmap(0x4000, 0x2000, Usage::RW).unwrap();
    mem.mwrite(0x4800, b"stale data", Usage::WRITE).unwrap();
    mem.munmap(0x4000, 0x2000).unwrap();

    mem.mmap(0x3000, 0x3000, Usage::READ).unwrap();
    let mut buf = [0xffu8; 10];
    mem.mread(&mut buf, 0x4800, Usage::READ).unwrap();
    assert_eq!(buf, [0u8; 10]);
    assert_eq!(mem.usage_at(0x4800), Some(Usage::READ));
}

#[test]
fn allocations_keep_their_spacing() {
    let mut mem = new_memory();
    let spacing = mem.config().alloc_spacing;

    let a = mem.alloc(0x1000, Usage::RW).unwrap();
    let b = mem.alloc(0x1000, Usage::RW).unwrap();
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    assert!(lo + 0x1000 + spacing <= hi, "{a:#x} and {b:#x} are too close");
    assert_eq!(lo, mem.config().alloc_base);
}

#[test]
fn mmap_zero_address_allocates() {
    let mut mem = new_memory();
    let address = mem.mmap(0, 0x2000, Usage::RX).unwrap();
    assert_ne!(address, 0);
    assert_eq!(mem.usage_at(address + 0x1fff), Some(Usage::RX));
}

#[test]
fn argument_errors_leave_layout_untouched() {
    let mut mem = new_memory();
    mem.mmap(0x1000, 0x2000, Usage::RW).unwrap();
    let before = mem.slots().to_vec();

    assert!(matches!(
        mem.mmap(0x1800, 0x1000, Usage::RW),
        Err(MemoryError::InvalidArgument(_))
    ));
    assert!(matches!(
        mem.mmap(0x5000, 0, Usage::RW),
        Err(MemoryError::InvalidArgument(_))
    ));
    assert!(matches!(
        mem.mmap(0x5000, 0x1000, Usage::from_bits_retain(0x10)),
        Err(MemoryError::InvalidArgument(_))
    ));
    assert_eq!(
        mem.mmap(0x2000, 0x2000, Usage::RW),
        Err(MemoryError::OutOfRange {
            address: 0x2000,
            size: 0x2000
        })
    );
    assert_eq!(
        mem.munmap(0x2000, 0x2000),
        Err(MemoryError::PartiallyUnmapped {
            address: 0x2000,
            size: 0x2000
        })
    );
    assert_eq!(
        mem.mprotect(0x0, 0x2000, Usage::READ),
        Err(MemoryError::PartiallyUnmapped {
            address: 0x0,
            size: 0x2000
        })
    );
    assert_eq!(mem.slots(), &before[..]);
}

#[test]
fn munmap_splits_a_mapping() {
    let mut mem = new_memory();
    mem.mmap(0x10000, 0x4000, Usage::RW).unwrap();
    mem.mwrite(0x10000, &[1], Usage::WRITE).unwrap();
    mem.mwrite(0x13000, &[4], Usage::WRITE).unwrap();

    mem.munmap(0x11000, 0x2000).unwrap();
    assert_eq!(mem.regions().len(), 2);

    let mut byte = [0u8];
    mem.mread(&mut byte, 0x13000, Usage::READ).unwrap();
    assert_eq!(byte, [4]);
    assert_eq!(
        mem.mread(&mut byte, 0x11000, Usage::READ),
        Err(MemoryError::Fault(MemoryFault {
            address: 0x11000,
            required: Usage::READ,
            actual: Usage::empty(),
        }))
    );
}

#[test]
fn mprotect_splits_and_merges_back() {
    let mut mem = new_memory();
    mem.mmap(0x20000, 0x3000, Usage::RW).unwrap();
    mem.mprotect(0x21000, 0x1000, Usage::READ).unwrap();
    assert_eq!(mem.slots().len(), 3);

    assert!(matches!(
        mem.mwrite(0x21000, &[0], Usage::WRITE),
        Err(MemoryError::Fault(MemoryFault {
            actual: Usage::READ,
            ..
        }))
    ));

    mem.mprotect(0x21000, 0x1000, Usage::RW).unwrap();
    assert_eq!(mem.slots().len(), 1);
}

#[test]
fn accesses_straddle_slots() {
    let mut mem = new_memory();
    mem.mmap(0x30000, 0x1000, Usage::RW).unwrap();
    mem.mmap(0x31000, 0x1000, Usage::RWX).unwrap();
    let data: Vec<u8> = (0..32).collect();

    mem.mwrite(0x30ff0, &data, Usage::WRITE).unwrap();
    let mut back = [0u8; 32];
    mem.mread(&mut back, 0x30ff0, Usage::READ).unwrap();
    assert_eq!(&back[..], &data[..]);

    mem.mclear(0x30ff8, 16, Usage::WRITE).unwrap();
    mem.mread(&mut back, 0x30ff0, Usage::READ).unwrap();
    assert!(back[8..24].iter().all(|&b| b == 0));
    assert_eq!(back[7], 7);
    assert_eq!(back[24], 24);
}

#[test]
fn faulting_write_changes_nothing() {
    let mut mem = new_memory();
    mem.mmap(0x40000, 0x1000, Usage::RW).unwrap();
    let err = mem.mwrite(0x40ffc, &[0xaa; 8], Usage::WRITE).unwrap_err();
    assert_eq!(
        err,
        MemoryError::Fault(MemoryFault {
            address: 0x41000,
            required: Usage::WRITE,
            actual: Usage::empty(),
        })
    );

    let mut back = [0xffu8; 4];
    mem.mread(&mut back, 0x40ffc, Usage::READ).unwrap();
    assert_eq!(back, [0; 4]);
}

#[test]
fn execute_writes_raise_flag_once() {
    let mut mem = new_memory();
    mem.mmap(0x50000, 0x1000, Usage::RWX).unwrap();
    mem.mmap(0x60000, 0x1000, Usage::RW).unwrap();
    assert!(!mem.take_execute_dirty());

    mem.mwrite(0x60000, &[1, 2, 3], Usage::WRITE).unwrap();
    assert!(!mem.take_execute_dirty());

    mem.store(0, 0x50010, MemoryType::U32, 0x1234).unwrap();
    assert!(mem.take_execute_dirty());
    assert!(!mem.take_execute_dirty());
}

#[test]
fn writes_beside_code_do_not_raise_flag() {
    let mut mem = new_memory();
    // Physically contiguous neighbours that both grant Write.
    mem.mmap(0x50000, 0x1000, Usage::RW).unwrap();
    mem.mmap(0x51000, 0x1000, Usage::RWX).unwrap();
    assert!(!mem.take_execute_dirty());

    mem.mwrite(0x50ff0, &[1; 0x10], Usage::WRITE).unwrap();
    mem.store(0, 0x50000, MemoryType::U64, 1).unwrap();
    assert!(!mem.take_execute_dirty());

    mem.mwrite(0x50ff0, &[1; 0x11], Usage::WRITE).unwrap();
    assert!(mem.take_execute_dirty());
    mem.store(0, 0x51000, MemoryType::U8To32, 1).unwrap();
    assert!(mem.take_execute_dirty());
}

#[test]
fn oversized_mapping_is_an_error() {
    let mut mem = new_memory();
    mem.mmap(0x1000, 0x1000, Usage::RW).unwrap();
    let regions = mem.regions();

    let err = mem.mmap(0x2000, 1 << 52, Usage::READ).unwrap_err();
    assert!(matches!(err, MemoryError::PoolExhausted { .. }), "{err}");
    assert_eq!(mem.regions(), regions);
    mem.check_consistency();
}

#[test]
fn execute_write_detection_can_be_disabled() {
    let mut mem = VirtualMemory::new(MemoryConfig {
        detect_execute_writes: false,
        ..MemoryConfig::default()
    })
    .unwrap();
    mem.mmap(0x50000, 0x1000, Usage::RWX).unwrap();
    mem.mwrite(0x50000, &[1], Usage::WRITE).unwrap();
    assert!(!mem.take_execute_dirty());
}

#[test]
fn unmapping_or_reprotecting_code_raises_flag() {
    let mut mem = new_memory();
    mem.mmap(0x70000, 0x2000, Usage::RX).unwrap();

    mem.mprotect(0x70000, 0x1000, Usage::READ).unwrap();
    assert!(mem.take_execute_dirty());

    mem.mprotect(0x70000, 0x1000, Usage::RW).unwrap();
    assert!(!mem.take_execute_dirty(), "execute bit did not change");

    mem.munmap(0x71000, 0x1000).unwrap();
    assert!(mem.take_execute_dirty());
}

#[test]
fn code_fetch_requires_execute() {
    let mut mem = new_memory();
    mem.mmap(0x80000, 0x1000, Usage::RW).unwrap();
    let mut insn = [0u8; 4];
    assert_eq!(
        mem.fetch_code(0x80000, &mut insn),
        Err(MemoryFault {
            address: 0x80000,
            required: Usage::EXECUTE,
            actual: Usage::RW,
        })
    );

    mem.mprotect(0x80000, 0x1000, Usage::RX).unwrap();
    mem.fetch_code(0x80000, &mut insn).unwrap();
    assert_eq!(mem.fetch(0, 0x80000, MemoryType::U32).unwrap(), 0);
}

#[test]
fn stats_count_window_and_fast_hits() {
    let mut mem = new_memory();
    mem.mmap(0x90000, 0x2000, Usage::RW).unwrap();

    mem.load(2, 0x90000, MemoryType::U64).unwrap();
    mem.load(2, 0x90008, MemoryType::U64).unwrap();
    // A different bank misses its window but reuses the fast resolve entry.
    mem.load(3, 0x90010, MemoryType::U64).unwrap();

    let stats = mem.stats();
    assert_eq!(stats.lookups, 3);
    assert_eq!(stats.window_hits, 1);
    assert_eq!(stats.table_walks, 1);
    assert_eq!(stats.fast_hits, 1);
}
