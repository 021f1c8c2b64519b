use core::fmt;

use bitflags::bitflags;

bitflags! {
    /// Access rights attached to a guest mapping.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Usage: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;

        const RW = Self::READ.bits() | Self::WRITE.bits();
        const RX = Self::READ.bits() | Self::EXECUTE.bits();
        const RWX = Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits();
    }
}

impl Usage {
    /// Returns true when `self` grants at least every right in `required`.
    #[inline]
    pub const fn permits(self, required: Usage) -> bool {
        self.bits() & required.bits() == required.bits()
    }
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |set: bool, c: char| if set { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(self.contains(Usage::READ), 'r'),
            flag(self.contains(Usage::WRITE), 'w'),
            flag(self.contains(Usage::EXECUTE), 'x'),
        )
    }
}

/// Logical kind of a guest access. Each kind owns its own lookup-window slot
/// per bank so interleaved data and code traffic does not thrash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Read,
    Write,
    Code,
}

impl AccessKind {
    pub const COUNT: usize = 3;

    #[inline]
    pub const fn usage(self) -> Usage {
        match self {
            AccessKind::Read => Usage::READ,
            AccessKind::Write => Usage::WRITE,
            AccessKind::Code => Usage::EXECUTE,
        }
    }

    #[inline]
    pub(crate) const fn index(self) -> usize {
        match self {
            AccessKind::Read => 0,
            AccessKind::Write => 1,
            AccessKind::Code => 2,
        }
    }

    /// Kind whose window slot serves an access that requires `usage`.
    pub(crate) fn for_usage(usage: Usage) -> AccessKind {
        if usage.contains(Usage::WRITE) {
            AccessKind::Write
        } else if usage == Usage::EXECUTE {
            AccessKind::Code
        } else {
            AccessKind::Read
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_rights_in_rwx_order() {
        assert_eq!(Usage::RWX.to_string(), "rwx");
        assert_eq!(Usage::RX.to_string(), "r-x");
        assert_eq!(Usage::WRITE.to_string(), "-w-");
        assert_eq!(Usage::empty().to_string(), "---");
    }

    #[test]
    fn permits_is_superset_check() {
        assert!(Usage::RWX.permits(Usage::RW));
        assert!(Usage::RW.permits(Usage::empty()));
        assert!(!Usage::RX.permits(Usage::WRITE));
    }

    #[test]
    fn kinds_map_to_window_slots() {
        assert_eq!(AccessKind::for_usage(Usage::RW), AccessKind::Write);
        assert_eq!(AccessKind::for_usage(Usage::EXECUTE), AccessKind::Code);
        assert_eq!(AccessKind::for_usage(Usage::RX), AccessKind::Read);
        assert_eq!(AccessKind::Code.usage(), Usage::EXECUTE);
    }
}
