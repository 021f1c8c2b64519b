/// Limits for one translation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TranslateConfig {
    /// Targets discovered more than this many hops away from the root are linked through the
    /// block map instead of being compiled in the same batch.
    pub max_chase_depth: u32,
    /// Instruction budget of a single super-block; a block that hits it falls through to a
    /// dispatched jump.
    pub max_block_instructions: usize,
    /// Compile one instruction per super-block and never extend.
    pub single_step: bool,
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            max_chase_depth: 4,
            max_block_instructions: 4096,
            single_step: false,
        }
    }
}

impl TranslateConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_block_instructions == 0 {
            return Err("max_block_instructions must be non-zero");
        }
        Ok(())
    }
}
