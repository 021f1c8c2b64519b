use xlat_jit::TranslateConfig;
use xlat_mem::MemoryConfig;

use crate::ContextError;

/// Size of the guest context arena when none is configured.
pub const DEFAULT_CONTEXT_BYTES: usize = 0x1000;

/// Everything fixed at context creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextConfig {
    pub memory: MemoryConfig,
    pub translate: TranslateConfig,
    /// Bytes of guest register state kept in the context arena.
    pub context_bytes: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            memory: MemoryConfig::default(),
            translate: TranslateConfig::default(),
            context_bytes: DEFAULT_CONTEXT_BYTES,
        }
    }
}

impl ContextConfig {
    pub fn validate(&self) -> Result<(), ContextError> {
        self.memory.validate()?;
        self.translate
            .validate()
            .map_err(ContextError::InvalidTranslateConfig)?;
        if self.context_bytes == 0 {
            return Err(ContextError::EmptyArena);
        }
        Ok(())
    }
}
