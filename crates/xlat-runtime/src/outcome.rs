use xlat_mem::MemoryFault;

/// Result of asking the context to run guest code.
///
/// Everything except `Ok` is a signal the driver is expected to handle and then retry.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<T> {
    Ok(T),
    /// No compiled entry point exists for the address.
    Untranslated(u64),
    /// The guest touched memory it may not access.
    Fault(MemoryFault),
    /// Executable memory was written or remapped; compiled code may be stale.
    ExecuteDirty,
}

impl<T> Outcome<T> {
    #[inline]
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Outcome::Ok(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<V>(self, f: impl FnOnce(T) -> V) -> Outcome<V> {
        match self {
            Outcome::Ok(value) => Outcome::Ok(f(value)),
            Outcome::Untranslated(address) => Outcome::Untranslated(address),
            Outcome::Fault(fault) => Outcome::Fault(fault),
            Outcome::ExecuteDirty => Outcome::ExecuteDirty,
        }
    }
}

impl<T> From<MemoryFault> for Outcome<T> {
    fn from(fault: MemoryFault) -> Self {
        Outcome::Fault(fault)
    }
}

impl<T> From<Result<T, MemoryFault>> for Outcome<T> {
    fn from(result: Result<T, MemoryFault>) -> Self {
        match result {
            Ok(value) => Outcome::Ok(value),
            Err(fault) => Outcome::Fault(fault),
        }
    }
}
