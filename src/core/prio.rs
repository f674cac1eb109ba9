//! Priority bitmap management for O(1) highest-ready lookup
//!
//! With 64 priority levels the whole ready set fits one `u64`, and the
//! highest ready level is a single leading-zero count.

use crate::config::CFG_PRIO_MAX;
use crate::types::OsPrio;

const _: () = assert!(CFG_PRIO_MAX == 64, "priority bitmap is a single u64");

/// Priority bitmap table
///
/// Bit 63 is priority 0 (most urgent), bit 0 is priority 63.
pub struct PrioTable {
    bitmap: u64,
}

impl PrioTable {
    pub const fn new() -> Self {
        PrioTable { bitmap: 0 }
    }

    pub fn init(&mut self) {
        self.bitmap = 0;
    }

    #[inline(always)]
    const fn bit(prio: OsPrio) -> u64 {
        1 << (63 - prio as u32)
    }

    /// Insert a priority into the bitmap
    #[inline]
    pub fn insert(&mut self, prio: OsPrio) {
        debug_assert!((prio as usize) < CFG_PRIO_MAX);
        self.bitmap |= Self::bit(prio);
    }

    /// Remove a priority from the bitmap
    #[inline]
    pub fn remove(&mut self, prio: OsPrio) {
        debug_assert!((prio as usize) < CFG_PRIO_MAX);
        self.bitmap &= !Self::bit(prio);
    }

    /// Get the highest priority, or the lowest level when nothing is set
    #[inline]
    pub fn get_highest(&self) -> OsPrio {
        if self.bitmap == 0 {
            (CFG_PRIO_MAX - 1) as OsPrio
        } else {
            self.bitmap.leading_zeros() as OsPrio
        }
    }

    /// Check if a specific priority has any ready tasks
    #[inline]
    pub fn is_set(&self, prio: OsPrio) -> bool {
        self.bitmap & Self::bit(prio) != 0
    }

    /// Check if the priority table is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bitmap == 0
    }
}

impl Default for PrioTable {
    fn default() -> Self {
        Self::new()
    }
}
