use thiserror::Error;
use xlat_jit::{BlockMapError, TranslateError};
use xlat_mem::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("a context is already active on this thread")]
    AlreadyActive,

    #[error(transparent)]
    InvalidMemoryConfig(#[from] ConfigError),

    #[error("invalid translation config: {0}")]
    InvalidTranslateConfig(&'static str),

    #[error("context arena must not be empty")]
    EmptyArena,
}

/// Conditions that end a run of the context. Guest faults are not errors; they come back as
/// [`crate::Outcome::Fault`] or [`crate::Exit::Fault`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error(transparent)]
    BlockMap(#[from] BlockMapError),

    #[error("translating {address:#x} did not register an entry point for it")]
    NotRegistered { address: u64 },
}

pub type Result<T> = core::result::Result<T, RuntimeError>;
