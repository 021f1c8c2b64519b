use xlat_jit::test_utils::{assemble, encode, op, RecordedModule, RecordingEmitter, ToyIsa};
use xlat_jit::TranslateError;
use xlat_mem::{MemoryFault, Usage};
use xlat_runtime::test_utils::{ToyRunner, ADDRESS, COUNTER, VALUE};
use xlat_runtime::{Context, ContextConfig, Driver, DriverStats, Exit, RuntimeError};

const BASE: u64 = 0x10000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn context_with(config: ContextConfig, program: &[(u8, i16)]) -> Context<RecordedModule> {
    init_tracing();
    let mut ctx = Context::create(config).unwrap();
    let memory = ctx.memory_mut();
    memory.mmap(BASE, 0x1000, Usage::RWX).unwrap();
    memory.mwrite(BASE, &assemble(program), Usage::empty()).unwrap();
    // Loading the program is not a modification of translated code.
    memory.take_execute_dirty();
    ctx
}

fn context(program: &[(u8, i16)]) -> Context<RecordedModule> {
    context_with(ContextConfig::default(), program)
}

#[test]
fn straight_line_program_halts() {
    let mut ctx = context(&[(op::NOP, 0), (op::RET, 0)]);
    let mut driver = Driver::new(ToyIsa::default(), RecordingEmitter::default);
    let mut runner = ToyRunner::default();

    assert_eq!(
        driver.run(&mut ctx, &mut runner, BASE).unwrap(),
        Exit::Halted { address: BASE }
    );
    assert_eq!(
        driver.stats(),
        DriverStats {
            blocks_run: 1,
            translations: 1,
            flushes: 0
        }
    );

    // Already compiled: the second run dispatches without translating.
    driver.run(&mut ctx, &mut runner, BASE).unwrap();
    assert_eq!(driver.stats().translations, 1);
}

#[test]
fn loops_stay_inside_one_block() {
    let mut ctx = context(&[(op::NOP, 0), (op::BNZ, -4), (op::RET, 0)]);
    ctx.arena_mut().write_u64(COUNTER, 5).unwrap();
    let mut driver = Driver::new(ToyIsa::default(), RecordingEmitter::default);
    let mut runner = ToyRunner::default();

    assert_eq!(
        driver.run(&mut ctx, &mut runner, BASE).unwrap(),
        Exit::Halted { address: BASE }
    );
    assert_eq!(ctx.arena().read_u64(COUNTER).unwrap(), 0);
    assert_eq!(runner.entered, vec![BASE]);
}

#[test]
fn calls_return_through_dispatch() {
    let mut ctx = context(&[(op::CALL, 0x20), (op::RET, 0)]);
    ctx.memory_mut()
        .mwrite(BASE + 0x20, &assemble(&[(op::RET, 0)]), Usage::empty())
        .unwrap();
    let mut driver = Driver::new(ToyIsa::default(), RecordingEmitter::default);
    let mut runner = ToyRunner::default();

    assert_eq!(
        driver.run(&mut ctx, &mut runner, BASE).unwrap(),
        Exit::Halted { address: BASE + 4 }
    );
    assert_eq!(runner.entered, vec![BASE, BASE + 0x20, BASE + 4]);
    // Callee and return address were compiled with the root.
    assert_eq!(driver.stats().translations, 1);
}

#[test]
fn data_faults_stop_the_run() {
    let mut ctx = context(&[(op::LOAD, 0), (op::RET, 0)]);
    ctx.arena_mut().write_u64(ADDRESS, 0x9000_0000).unwrap();
    let mut driver = Driver::new(ToyIsa::default(), RecordingEmitter::default);

    assert_eq!(
        driver.run(&mut ctx, &mut ToyRunner::default(), BASE).unwrap(),
        Exit::Fault(MemoryFault {
            address: 0x9000_0000,
            required: Usage::READ,
            actual: Usage::empty(),
        })
    );
}

#[test]
fn unmapped_entry_is_a_guest_fault() {
    let mut ctx = context(&[(op::RET, 0)]);
    let mut driver = Driver::new(ToyIsa::default(), RecordingEmitter::default);

    match driver.run(&mut ctx, &mut ToyRunner::default(), 0x5000_0000).unwrap() {
        Exit::Fault(fault) => {
            assert_eq!(fault.address, 0x5000_0000);
            assert!(fault.is_unmapped());
        }
        other => panic!("unexpected exit {other:?}"),
    }
    assert!(ctx.blocks().is_empty());
}

#[test]
fn jump_into_unmapped_code_faults_at_the_target() {
    let mut ctx = context(&[(op::JMP, 0x2000)]);
    let mut driver = Driver::new(ToyIsa::default(), RecordingEmitter::default);

    match driver.run(&mut ctx, &mut ToyRunner::default(), BASE).unwrap() {
        Exit::Fault(fault) => assert_eq!(fault.address, BASE + 0x2000),
        other => panic!("unexpected exit {other:?}"),
    }
}

#[test]
fn undecodable_code_is_fatal() {
    let mut ctx = context(&[(op::NOP, 0), (0xff, 0)]);
    let mut driver = Driver::new(ToyIsa::default(), RecordingEmitter::default);

    assert_eq!(
        driver.run(&mut ctx, &mut ToyRunner::default(), BASE),
        Err(RuntimeError::Translate(TranslateError::Undecodable {
            address: BASE + 4
        }))
    );
}

#[test]
fn untaken_branch_to_undecodable_bytes_halts() {
    let mut ctx = context(&[(op::BNZ, 8), (op::RET, 0), (0xff, 0)]);
    ctx.arena_mut().write_u64(COUNTER, 1).unwrap();
    let mut driver = Driver::new(ToyIsa::default(), RecordingEmitter::default);

    assert_eq!(
        driver.run(&mut ctx, &mut ToyRunner::default(), BASE).unwrap(),
        Exit::Halted { address: BASE }
    );
}

#[test]
fn taken_branch_to_undecodable_bytes_is_fatal() {
    let mut ctx = context(&[(op::BNZ, 8), (op::RET, 0), (0xff, 0)]);
    ctx.arena_mut().write_u64(COUNTER, 2).unwrap();
    let mut driver = Driver::new(ToyIsa::default(), RecordingEmitter::default);

    assert_eq!(
        driver.run(&mut ctx, &mut ToyRunner::default(), BASE),
        Err(RuntimeError::Translate(TranslateError::Undecodable {
            address: BASE + 8
        }))
    );
}

#[test]
fn undecodable_bytes_are_retried_after_a_code_write() {
    // The store patches the undecodable instruction with RET before the branch reaches it.
    let mut ctx = context(&[
        (op::STORE, 0),
        (op::BNZ, 8),
        (op::RET, 0),
        (op::NOP, 0),
        (0xff, 0),
    ]);
    let arena = ctx.arena_mut();
    arena.write_u64(COUNTER, 2).unwrap();
    arena.write_u64(ADDRESS, BASE + 16).unwrap();
    arena
        .write_u64(VALUE, u64::from(u32::from_le_bytes(encode(op::RET, 0))))
        .unwrap();
    let mut driver = Driver::new(ToyIsa::default(), RecordingEmitter::default);
    let mut runner = ToyRunner::default();

    assert_eq!(
        driver.run(&mut ctx, &mut runner, BASE).unwrap(),
        Exit::Halted { address: BASE + 16 }
    );
    assert_eq!(runner.entered, vec![BASE, BASE + 16]);
    assert_eq!(driver.stats().flushes, 1);
}

#[test]
fn code_writes_flush_and_retranslate() {
    let mut ctx = context(&[
        (op::STORE, 0),
        (op::JMP, 4),
        (op::RET, 0),
        (op::NOP, 0),
        (op::RET, 0),
    ]);
    // The store turns the RET at BASE + 8 into a jump to BASE + 0x10.
    let patch = u32::from_le_bytes(encode(op::JMP, 8));
    ctx.arena_mut().write_u64(ADDRESS, BASE + 8).unwrap();
    ctx.arena_mut().write_u64(VALUE, u64::from(patch)).unwrap();
    let mut driver = Driver::new(ToyIsa::default(), RecordingEmitter::default);
    let mut runner = ToyRunner::default();

    // The running block keeps its stale copy of the patched instruction.
    assert_eq!(
        driver.run(&mut ctx, &mut runner, BASE).unwrap(),
        Exit::Halted { address: BASE }
    );
    assert!(ctx.memory().is_execute_dirty());

    assert_eq!(
        driver.run(&mut ctx, &mut runner, BASE).unwrap(),
        Exit::Halted { address: BASE + 0x10 }
    );
    assert_eq!(
        driver.stats(),
        DriverStats {
            blocks_run: 3,
            translations: 3,
            flushes: 2
        }
    );
}

#[test]
fn step_limit_bounds_endless_programs() {
    let mut config = ContextConfig::default();
    config.translate.single_step = true;
    let mut ctx = context_with(config, &[(op::JMP, 4), (op::JMP, -4)]);
    let mut driver =
        Driver::new(ToyIsa::default(), RecordingEmitter::default).with_step_limit(10);
    let mut runner = ToyRunner::default();

    assert_eq!(
        driver.run(&mut ctx, &mut runner, BASE).unwrap(),
        Exit::StepLimit { address: BASE }
    );
    assert_eq!(runner.entered.len(), 10);
    assert_eq!(ctx.blocks().len(), 2);
}
