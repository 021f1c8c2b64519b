//! The translation context: guest memory, compiled blocks and guest register state.
//!
//! At most one context is alive per thread. Creating a second one fails with
//! [`ContextError::AlreadyActive`]; dropping the active context frees the slot again.

use std::cell::Cell;
use std::marker::PhantomData;
use std::rc::Rc;

use tracing::{debug, info, trace};
use xlat_jit::{BlockMap, CommittedExport, DispatchIndex, DispatchSlot, Emitter, Producer};
use xlat_mem::{MemoryFault, VirtualMemory};

use crate::{ContextArena, ContextConfig, ContextError, Outcome, Result};

thread_local! {
    static ACTIVE: Cell<bool> = const { Cell::new(false) };
}

/// Whether a [`Context`] is currently alive on this thread.
pub fn context_active() -> bool {
    ACTIVE.with(Cell::get)
}

/// Mutable guest state handed to compiled code.
pub struct GuestState<'a> {
    pub memory: &'a mut VirtualMemory,
    pub arena: &'a mut ContextArena,
}

/// Owns everything translated code runs against. `U` is the compiled unit type produced by the
/// emitter.
pub struct Context<U> {
    config: ContextConfig,
    memory: VirtualMemory,
    blocks: BlockMap<U>,
    arena: ContextArena,
    // Bound to the thread that claimed the singleton slot.
    _not_send: PhantomData<Rc<()>>,
}

impl<U> std::fmt::Debug for Context<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("blocks", &self.blocks.len())
            .field("arena", &self.arena)
            .finish_non_exhaustive()
    }
}

impl<U> Context<U> {
    pub fn create(config: ContextConfig) -> std::result::Result<Self, ContextError> {
        config.validate()?;
        if ACTIVE.with(|active| active.replace(true)) {
            return Err(ContextError::AlreadyActive);
        }
        let memory = match VirtualMemory::new(config.memory.clone()) {
            Ok(memory) => memory,
            Err(err) => {
                ACTIVE.with(|active| active.set(false));
                return Err(err.into());
            }
        };
        info!(
            page_size = config.memory.page_size,
            lookup_banks = config.memory.lookup_banks,
            max_chase_depth = config.translate.max_chase_depth,
            "context created"
        );
        Ok(Self {
            arena: ContextArena::new(config.context_bytes),
            config,
            memory,
            blocks: BlockMap::new(),
            _not_send: PhantomData,
        })
    }

    #[inline]
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    #[inline]
    pub fn memory(&self) -> &VirtualMemory {
        &self.memory
    }

    #[inline]
    pub fn memory_mut(&mut self) -> &mut VirtualMemory {
        &mut self.memory
    }

    #[inline]
    pub fn blocks(&self) -> &BlockMap<U> {
        &self.blocks
    }

    #[inline]
    pub fn arena(&self) -> &ContextArena {
        &self.arena
    }

    #[inline]
    pub fn arena_mut(&mut self) -> &mut ContextArena {
        &mut self.arena
    }

    /// Looks up the compiled entry point for `address`.
    ///
    /// Pending execute-dirty state is reported first so stale code is never dispatched.
    pub fn execute(&mut self, address: u64) -> Outcome<DispatchIndex> {
        if self.memory.take_execute_dirty() {
            debug!("executable memory changed before dispatch of {address:#x}");
            return Outcome::ExecuteDirty;
        }
        match self.blocks.resolve(address) {
            Some(index) => Outcome::Ok(index),
            None => Outcome::Untranslated(address),
        }
    }

    /// Runs `f` with the dispatch slot at `index` and the guest state it operates on.
    pub fn with_block<R>(
        &mut self,
        index: DispatchIndex,
        f: impl FnOnce(GuestState<'_>, &DispatchSlot<U>) -> std::result::Result<R, MemoryFault>,
    ) -> Option<std::result::Result<R, MemoryFault>> {
        let slot = self.blocks.dispatch(index)?;
        trace!("dispatching {} at {:#x}", slot.name, slot.address);
        let state = GuestState {
            memory: &mut self.memory,
            arena: &mut self.arena,
        };
        Some(f(state, slot))
    }

    /// Drops every compiled block.
    pub fn flush_blocks(&mut self) {
        self.blocks.flush();
    }

    /// Translates everything reachable from `address` and registers the result.
    pub fn translate<D, E>(
        &mut self,
        decoder: &mut D,
        emitter: E,
        address: u64,
    ) -> Result<Vec<CommittedExport>>
    where
        D: Producer<E>,
        E: Emitter<Module = U>,
    {
        let translation = xlat_jit::translate(
            self.config.translate,
            emitter,
            decoder,
            &mut self.memory,
            &self.blocks,
            address,
        )?;
        let committed = self.blocks.register(translation.module, translation.exports)?;
        debug!(
            root = address,
            exports = committed.len(),
            "registered translation"
        );
        Ok(committed)
    }
}

impl<U> Drop for Context<U> {
    fn drop(&mut self) {
        let stats = self.memory.stats();
        info!(
            blocks = self.blocks.len(),
            lookups = stats.lookups,
            pool_growths = stats.pool_growths,
            "context destroyed"
        );
        ACTIVE.with(|active| active.set(false));
    }
}

#[cfg(test)]
mod tests {
    use xlat_jit::test_utils::{assemble, op, RecordedModule, RecordingEmitter, ToyIsa};
    use xlat_mem::Usage;

    use super::*;

    #[test]
    fn second_context_is_rejected_until_first_is_dropped() {
        let first = Context::<()>::create(ContextConfig::default()).unwrap();
        assert!(context_active());
        assert!(matches!(
            Context::<()>::create(ContextConfig::default()),
            Err(ContextError::AlreadyActive)
        ));
        drop(first);
        assert!(!context_active());
        let _second = Context::<()>::create(ContextConfig::default()).unwrap();
    }

    #[test]
    fn invalid_config_does_not_claim_the_slot() {
        let config = ContextConfig {
            context_bytes: 0,
            ..ContextConfig::default()
        };
        assert_eq!(
            Context::<()>::create(config).unwrap_err(),
            ContextError::EmptyArena
        );
        assert!(!context_active());
    }

    #[test]
    fn execute_reports_dirty_code_before_resolving() {
        let mut ctx = Context::<RecordedModule>::create(ContextConfig::default()).unwrap();
        ctx.memory_mut().mmap(0x1000, 0x1000, Usage::RX).unwrap();
        ctx.memory_mut()
            .mwrite(0x1000, &assemble(&[(op::RET, 0)]), Usage::empty())
            .unwrap();

        assert_eq!(ctx.execute(0x1000), Outcome::ExecuteDirty);
        assert_eq!(ctx.execute(0x1000), Outcome::Untranslated(0x1000));

        let committed = ctx
            .translate(&mut ToyIsa::default(), RecordingEmitter::default(), 0x1000)
            .unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(ctx.execute(0x1000), Outcome::Ok(committed[0].index));

        let seen = ctx
            .with_block(committed[0].index, |_, slot| Ok(slot.address))
            .unwrap();
        assert_eq!(seen, Ok(0x1000));

        ctx.flush_blocks();
        assert_eq!(ctx.execute(0x1000), Outcome::Untranslated(0x1000));
    }
}
