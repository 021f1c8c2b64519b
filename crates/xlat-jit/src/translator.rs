use tracing::{debug, trace};
use xlat_mem::VirtualMemory;

use crate::block_map::{BlockExport, TranslatedSet};
use crate::decode::Producer;
use crate::emit::{Emitter, Writer};
use crate::superblock::{self, BlockExit};
use crate::worklist::{export_name, OpenAddress, Placement, Worklist};
use crate::{Result, TranslateConfig, TranslateError};

/// Output of one translation request.
#[derive(Debug)]
pub struct Translation<M> {
    pub module: M,
    pub exports: Vec<BlockExport>,
}

/// Compiles the super-blocks reachable from a root address into one module.
pub struct Translator<E: Emitter> {
    config: TranslateConfig,
    emitter: E,
    worklist: Worklist,
    blocks: usize,
}

impl<E: Emitter> Translator<E> {
    pub fn new(config: TranslateConfig, emitter: E) -> Self {
        Self {
            worklist: Worklist::new(config.max_chase_depth),
            config,
            emitter,
            blocks: 0,
        }
    }

    #[inline]
    pub fn worklist(&self) -> &Worklist {
        &self.worklist
    }

    pub fn push_root(&mut self, address: u64, translated: &dyn TranslatedSet) {
        trace!("translation root {address:#x}");
        self.worklist.push_root(address, translated);
    }

    /// Compiles open addresses until the worklist is empty.
    pub fn run<D: Producer<E>>(
        &mut self,
        decoder: &mut D,
        memory: &mut VirtualMemory,
        translated: &dyn TranslatedSet,
    ) -> Result<()> {
        while let Some(open) = self.worklist.pop() {
            self.process(decoder, memory, translated, open)?;
        }
        Ok(())
    }

    fn process<D: Producer<E>>(
        &mut self,
        decoder: &mut D,
        memory: &mut VirtualMemory,
        translated: &dyn TranslatedSet,
        open: OpenAddress,
    ) -> Result<()> {
        let name = match self.worklist.placement(open.address) {
            Some(Placement::Compiled { name, .. }) => name.clone(),
            _ => export_name(open.address),
        };

        // A chased target that cannot be built becomes a stub reporting the problem when it runs.
        let block = match superblock::build(decoder, memory, open.address, &self.config) {
            Ok(block) => block,
            Err(TranslateError::Fault(fault)) if open.depth > 0 => {
                debug!("{name} is not readable: {fault}");
                self.emit_stub(&name, open.address, |emitter| emitter.fault_exit(&fault));
                return Ok(());
            }
            Err(TranslateError::Undecodable { address }) if open.depth > 0 => {
                debug!("{name} does not decode at {address:#x}");
                self.emit_stub(&name, open.address, |emitter| emitter.not_decodable(address));
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        // Undecodable bytes in the root's own strand fail the batch.
        if let BlockExit::Undecodable {
            address,
            entry_strand: true,
        } = block.exit()
        {
            if open.depth == 0 {
                return Err(TranslateError::Undecodable { address });
            }
        }

        for target in block.external_targets() {
            self.worklist.place(target, open.depth + 1, translated);
        }

        self.emitter.begin_function(&name, open.address);
        {
            let mut writer = Writer::new(
                &mut self.emitter,
                block.targets(),
                &mut self.worklist,
                translated,
                open.depth,
            );
            for inst in block.instructions() {
                if block.is_target(inst.address) {
                    writer.backend().label(inst.address);
                }
                decoder.produce(&mut writer, inst);
            }
            match block.exit() {
                BlockExit::Closed { next } => writer.backend().unreachable(next),
                BlockExit::Fallthrough { next } => writer.jump(next),
                BlockExit::Fault(fault) => writer.backend().fault_exit(&fault),
                BlockExit::Undecodable { address, .. } => {
                    writer.backend().not_decodable(address)
                }
            }
        }
        self.emitter.end_function();
        self.worklist.mark_produced(open.address);
        self.blocks += 1;

        trace!(
            instructions = block.instructions().len(),
            targets = block.targets().len(),
            depth = open.depth,
            "produced {name}"
        );
        Ok(())
    }

    fn emit_stub(&mut self, name: &str, address: u64, exit: impl FnOnce(&mut E)) {
        self.emitter.begin_function(name, address);
        exit(&mut self.emitter);
        self.emitter.end_function();
        self.worklist.mark_produced(address);
    }

    /// Finishes the module and lists the entry points compiled into it.
    pub fn close(self) -> Result<Translation<E::Module>> {
        let exports = self.worklist.exports()?;
        debug!(
            blocks = self.blocks,
            exports = exports.len(),
            "translation batch complete"
        );
        Ok(Translation {
            module: self.emitter.finish(),
            exports,
        })
    }
}

/// Translates everything reachable from `root` in one batch.
pub fn translate<D, E>(
    config: TranslateConfig,
    emitter: E,
    decoder: &mut D,
    memory: &mut VirtualMemory,
    translated: &dyn TranslatedSet,
    root: u64,
) -> Result<Translation<E::Module>>
where
    D: Producer<E>,
    E: Emitter,
{
    let mut translator = Translator::new(config, emitter);
    translator.push_root(root, translated);
    translator.run(decoder, memory, translated)?;
    translator.close()
}
