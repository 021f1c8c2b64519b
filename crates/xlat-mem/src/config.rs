use crate::ConfigError;

/// Tunables for [`crate::VirtualMemory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Guest page granularity; every mapping address and size is a multiple of it.
    pub page_size: u64,
    /// Physical pool growth granularity.
    pub phys_page_size: u64,
    /// Pool size at construction, in physical pages.
    pub initial_phys_pages: u64,
    /// Smallest pool growth, in guest pages.
    pub min_growth_pages: u64,
    /// A free block at the start of the pool is compacted away once it exceeds
    /// `pool_size / shift_factor`.
    pub shift_factor: u64,
    /// Number of lookup banks available to translated code.
    pub lookup_banks: u32,
    /// Lowest address handed out by the allocator.
    pub alloc_base: u64,
    /// Exclusive upper bound of allocator placements.
    pub alloc_limit: u64,
    /// Gap left after the highest mapping when placing a new allocation.
    pub alloc_spacing: u64,
    /// Writes through an executable window raise the execute-dirty flag.
    pub detect_execute_writes: bool,
    /// Run the full layout check after every mutation.
    pub check_consistency: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            page_size: 0x1000,
            phys_page_size: 0x1_0000,
            initial_phys_pages: 4,
            min_growth_pages: 32,
            shift_factor: 3,
            lookup_banks: 8,
            alloc_base: 0x4000_0000,
            alloc_limit: 0x7fff_0000_0000,
            alloc_spacing: 0x100_0000,
            detect_execute_writes: true,
            check_consistency: cfg!(debug_assertions),
        }
    }
}

/// Upper bound on guest-visible lookup banks.
pub const MAX_LOOKUP_BANKS: u32 = 1024;

impl MemoryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("page_size", self.page_size),
            ("phys_page_size", self.phys_page_size),
        ] {
            if value == 0 || !value.is_power_of_two() {
                return Err(ConfigError::NotPowerOfTwo { field, value });
            }
        }
        if self.phys_page_size < self.page_size {
            return Err(ConfigError::Unaligned {
                field: "phys_page_size",
                value: self.phys_page_size,
            });
        }
        for (field, value) in [
            ("alloc_base", self.alloc_base),
            ("alloc_limit", self.alloc_limit),
            ("alloc_spacing", self.alloc_spacing),
        ] {
            if value % self.page_size != 0 {
                return Err(ConfigError::Unaligned { field, value });
            }
        }
        if self.alloc_base == 0 {
            return Err(ConfigError::Invalid("alloc_base must be non-zero"));
        }
        if self.alloc_limit <= self.alloc_base {
            return Err(ConfigError::Invalid("alloc_limit must lie above alloc_base"));
        }
        if self.shift_factor == 0 {
            return Err(ConfigError::Invalid("shift_factor must be non-zero"));
        }
        if self.lookup_banks > MAX_LOOKUP_BANKS {
            return Err(ConfigError::Invalid("too many lookup banks"));
        }
        self.initial_phys_pages
            .checked_mul(self.phys_page_size)
            .and_then(|bytes| usize::try_from(bytes).ok())
            .ok_or(ConfigError::Invalid("initial pool size overflows"))?;
        Ok(())
    }

    pub(crate) fn min_growth(&self) -> u64 {
        self.min_growth_pages.saturating_mul(self.page_size)
    }
}
