//! Critical section handling
//!
//! Provides safe critical section primitives for protecting shared kernel
//! state. The lock itself comes from the `critical-section` crate (PRIMASK
//! on Cortex-M, a global reentrant lock on hosted targets). The port wraps
//! acquire and release so that the outermost release can take a pended
//! context switch.

use crate::port;

/// RAII guard for critical sections
///
/// When this guard is created, interrupts are disabled.
/// When it is dropped, interrupts are restored to their previous state.
pub struct CriticalSection {
    restore: critical_section::RestoreState,
}

impl CriticalSection {
    /// Enter a critical section.
    ///
    /// Returns a guard that will restore interrupt state when dropped.
    #[inline(always)]
    pub fn enter() -> Self {
        // SAFETY: released exactly once, by `Drop`, with the same token
        let restore = unsafe { port::os_cs_acquire() };
        CriticalSection { restore }
    }
}

impl Drop for CriticalSection {
    #[inline(always)]
    fn drop(&mut self) {
        // SAFETY: token obtained from the matching acquire in `enter`
        unsafe { port::os_cs_release(self.restore) };
    }
}

/// Execute a closure with interrupts disabled
///
/// The closure receives a reference to the critical section guard,
/// which can be used to access [`CsCell`](crate::core::cs_cell::CsCell)
/// protected data.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&CriticalSection) -> R,
{
    let cs = CriticalSection::enter();
    f(&cs)
}

/// Check if currently executing in an ISR context
#[inline]
pub fn is_isr_context() -> bool {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    {
        let ipsr: u32;
        unsafe {
            core::arch::asm!(
                "mrs {}, IPSR",
                out(reg) ipsr,
                options(nomem, nostack, preserves_flags)
            );
        }
        ipsr != 0
    }

    #[cfg(not(target_os = "none"))]
    {
        port::os_in_isr()
    }
}
