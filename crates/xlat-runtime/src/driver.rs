//! The dispatch loop.
//!
//! [`Driver::run`] resolves the current guest address, runs the compiled block through a
//! [`BlockRunner`] and follows the address it returns. The recoverable signals are handled here:
//! a miss translates from the missing address and retries, dirty executable memory flushes every
//! compiled block and retries. A block reaching undecodable bytes is retried only when code was
//! written since it was compiled.

use tracing::{debug, trace};
use xlat_jit::{DispatchSlot, Emitter, Producer, TranslateError};
use xlat_mem::MemoryFault;

use crate::context::GuestState;
use crate::{Context, Outcome, Result, RuntimeError};

/// Where a block hands control next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Continue(u64),
    Halt,
    /// Control reached bytes at the address that did not decode when the block was compiled.
    Undecodable(u64),
}

/// Executes compiled units.
pub trait BlockRunner<U> {
    fn run_block(
        &mut self,
        state: GuestState<'_>,
        slot: &DispatchSlot<U>,
    ) -> std::result::Result<Step, MemoryFault>;
}

impl<U, F> BlockRunner<U> for F
where
    F: FnMut(GuestState<'_>, &DispatchSlot<U>) -> std::result::Result<Step, MemoryFault>,
{
    fn run_block(
        &mut self,
        state: GuestState<'_>,
        slot: &DispatchSlot<U>,
    ) -> std::result::Result<Step, MemoryFault> {
        self(state, slot)
    }
}

/// Why [`Driver::run`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exit {
    /// A block returned [`Step::Halt`]; `address` is the entry of that block.
    Halted { address: u64 },
    /// Guest fault, either while running a block or while fetching code to translate.
    Fault(MemoryFault),
    /// The step limit was reached before dispatching `address`.
    StepLimit { address: u64 },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub blocks_run: u64,
    pub translations: u64,
    pub flushes: u64,
}

/// Drives a [`Context`] with a decoder and a fresh emitter per translation batch.
pub struct Driver<D, F> {
    decoder: D,
    new_emitter: F,
    step_limit: Option<u64>,
    stats: DriverStats,
}

impl<D, F> Driver<D, F> {
    pub fn new(decoder: D, new_emitter: F) -> Self {
        Self {
            decoder,
            new_emitter,
            step_limit: None,
            stats: DriverStats::default(),
        }
    }

    /// Stops [`Driver::run`] after `limit` blocks.
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = Some(limit);
        self
    }

    #[inline]
    pub fn stats(&self) -> DriverStats {
        self.stats
    }

    #[inline]
    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    pub fn run<U, E, R>(
        &mut self,
        context: &mut Context<U>,
        runner: &mut R,
        entry: u64,
    ) -> Result<Exit>
    where
        F: FnMut() -> E,
        E: Emitter<Module = U>,
        D: Producer<E>,
        R: BlockRunner<U>,
    {
        let mut address = entry;
        let mut steps = 0u64;
        // Address translated by the previous iteration; a second miss on it means the batch did
        // not cover its own root.
        let mut translated_root = None;

        loop {
            match context.execute(address) {
                Outcome::Ok(index) => {
                    if self.step_limit.is_some_and(|limit| steps >= limit) {
                        return Ok(Exit::StepLimit { address });
                    }
                    translated_root = None;
                    steps += 1;
                    self.stats.blocks_run += 1;
                    let step = context
                        .with_block(index, |state, slot| runner.run_block(state, slot))
                        .ok_or(RuntimeError::NotRegistered { address })?;
                    match step {
                        Ok(Step::Continue(next)) => {
                            trace!("{address:#x} -> {next:#x}");
                            address = next;
                        }
                        Ok(Step::Halt) => return Ok(Exit::Halted { address }),
                        Ok(Step::Undecodable(at)) if context.memory().is_execute_dirty() => {
                            debug!("retrying undecodable {at:#x} after a code write");
                            address = at;
                        }
                        Ok(Step::Undecodable(at)) => {
                            return Err(TranslateError::Undecodable { address: at }.into());
                        }
                        Err(fault) => return Ok(Exit::Fault(fault)),
                    }
                }
                Outcome::Untranslated(missing) => {
                    if translated_root == Some(missing) {
                        return Err(RuntimeError::NotRegistered { address: missing });
                    }
                    let emitter = (self.new_emitter)();
                    match context.translate(&mut self.decoder, emitter, missing) {
                        Ok(_) => {}
                        Err(RuntimeError::Translate(TranslateError::Fault(fault))) => {
                            debug!("cannot translate {missing:#x}: {fault}");
                            return Ok(Exit::Fault(fault));
                        }
                        Err(err) => return Err(err),
                    }
                    self.stats.translations += 1;
                    translated_root = Some(missing);
                }
                Outcome::ExecuteDirty => self.flush(context),
                Outcome::Fault(fault) => return Ok(Exit::Fault(fault)),
            }
        }
    }

    fn flush<U>(&mut self, context: &mut Context<U>) {
        self.stats.flushes += 1;
        context.flush_blocks();
    }
}
