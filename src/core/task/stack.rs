//! Task stack preparation and usage accounting
//!
//! A fresh stack is filled with [`CFG_STK_FILL`] and carries
//! [`CFG_STK_MAGIC`] in its lowest aligned word. The stack grows down from
//! the top, so the untouched fill bytes above the magic word give the
//! high-water mark and a clobbered magic word means overflow.

use crate::config::{CFG_STK_FILL, CFG_STK_MAGIC};
use crate::task::OsTcb;

/// Stack usage snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StackInfo {
    /// Size requested at construction, in bytes
    pub size: usize,
    /// Bytes below the saved stack pointer
    pub free: usize,
    /// Bytes above the saved stack pointer
    pub used: usize,
    /// Deepest use observed so far
    pub max: usize,
}

#[inline(always)]
fn magic_ptr(base: *mut u8) -> *mut u32 {
    let addr = base as usize;
    base.wrapping_add(addr.next_multiple_of(4) - addr) as *mut u32
}

/// Fill a stack buffer and plant the overflow marker
///
/// # Safety
/// `base..base + size` must be writable and at least a few words long.
pub(crate) unsafe fn os_stk_fill(base: *mut u8, size: usize) {
    unsafe {
        core::ptr::write_bytes(base, CFG_STK_FILL, size);
        magic_ptr(base).write(CFG_STK_MAGIC);
    }
}

/// Usage of a task's stack, from the saved stack pointer and the fill
///
/// `free + used == size` always holds. A task that never started reports
/// its whole stack free.
///
/// # Safety
/// Caller must be inside a critical section, and a started task's stack
/// buffer must still be alive.
pub(crate) unsafe fn os_task_stk_chk(tcb: &OsTcb) -> StackInfo {
    let size = tcb.stk_size;
    let base = tcb.stk_base;

    if base.is_null() || tcb.stk_ptr.is_null() {
        return StackInfo {
            size,
            free: size,
            used: 0,
            max: 0,
        };
    }

    let top = base as usize + size;
    let sp = (tcb.stk_ptr as usize).clamp(base as usize, top);
    let free = sp - base as usize;

    let scan_from = magic_ptr(base) as usize + 4;
    let mut untouched = scan_from;
    while untouched < top && unsafe { *(untouched as *const u8) } == CFG_STK_FILL {
        untouched += 1;
    }

    StackInfo {
        size,
        free,
        used: size - free,
        max: top - untouched,
    }
}

/// Whether the overflow marker at the bottom of the stack was overwritten
///
/// # Safety
/// Same requirements as [`os_task_stk_chk`].
pub(crate) unsafe fn os_task_stk_ovf(tcb: &OsTcb) -> bool {
    if tcb.stk_base.is_null() {
        return false;
    }
    unsafe { magic_ptr(tcb.stk_base).read() != CFG_STK_MAGIC }
}
