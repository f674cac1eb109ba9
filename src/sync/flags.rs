//! Event flag groups
//!
//! A 32-bit flags word shared between tasks. Waiters block in
//! `WaitingEventFlag` until any or all of their bits are set.

use core::ptr::NonNull;

use crate::core::cs_cell::CsCell;
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched::{self, PendList};
use crate::task::os_flags_check;
use crate::types::{opt, OsFlags, OsOpt, OsPendOn, OsPendStatus, OsTick};

use super::os_pend_opts;

struct OsFlagGrp {
    pend_list: PendList,
    flags: OsFlags,
}

/// Event flags group
pub struct EventFlags {
    inner: CsCell<OsFlagGrp>,
}

impl EventFlags {
    /// Create a group with every flag clear
    pub const fn new() -> Self {
        EventFlags {
            inner: CsCell::new(OsFlagGrp {
                pend_list: PendList::new(),
                flags: 0,
            }),
        }
    }

    /// Set flags, waking every waiter whose condition now holds
    ///
    /// Waiters are served in wait-list order and each consumes its matched
    /// bits unless it waits with `FLAG_NO_CLEAR`. Valid from ISR context.
    ///
    /// Returns the flags right after setting.
    pub fn set(&self, mask: OsFlags) -> OsResult<OsFlags> {
        if !is_isr_context() {
            kernel::os_tcb_self()?;
        }

        critical_section(|cs| {
            let grp = self.inner.get(cs);
            grp.flags |= mask;
            let flags = grp.flags;

            let mut woke = false;
            let mut next = grp.pend_list.head();
            while let Some(waiter) = next {
                let w = unsafe { &mut *waiter.as_ptr() };
                next = w.pend_next_ptr;

                if let Some(value) = os_flags_check(&mut grp.flags, w.flags_pend, w.flags_opt) {
                    w.flags_rdy = value;
                    unsafe { sched::os_pend_ready(waiter, OsPendStatus::Ok) };
                    woke = true;
                }
            }

            if woke {
                sched::os_sched();
            }
            Ok(flags)
        })
    }

    /// Clear flags, returning the word before clearing
    pub fn clear(&self, mask: OsFlags) -> OsResult<OsFlags> {
        critical_section(|cs| {
            let grp = self.inner.get(cs);
            let prior = grp.flags;
            grp.flags &= !mask;
            Ok(prior)
        })
    }

    /// Current flags
    pub fn get(&self) -> OsFlags {
        critical_section(|cs| self.inner.get(cs).flags)
    }

    /// Wait on the group
    ///
    /// # Returns
    /// * `Ok(flags)` - The flags word that satisfied the wait
    /// * `Err(OsError::FlagPendOpt)` - Empty mask
    /// * `Err(OsError::PendWouldBlock)` - Non-blocking and not satisfied
    /// * `Err(OsError::Timeout)` - Timeout expired
    fn pend(&self, mask: OsFlags, wait_opt: OsOpt, timeout: OsTick) -> OsResult<OsFlags> {
        if mask == 0 {
            return Err(OsError::FlagPendOpt);
        }

        let cur = sched::os_pend_precheck()?;

        let ready = critical_section(|cs| {
            let grp = self.inner.get(cs);

            if let Some(value) = os_flags_check(&mut grp.flags, mask, wait_opt) {
                return Ok(Some(value));
            }

            if wait_opt & opt::PEND_NON_BLOCKING != 0 {
                return Err(OsError::PendWouldBlock);
            }

            if kernel::KERNEL.sched_lock_nesting() > 0 {
                return Err(OsError::SchedLocked);
            }

            unsafe {
                let tcb = &mut *cur.as_ptr();
                tcb.flags_pend = mask;
                tcb.flags_opt = wait_opt;
                tcb.flags_rdy = 0;

                sched::os_pend(
                    cur,
                    Some(NonNull::from(&mut grp.pend_list)),
                    OsPendOn::Flag,
                    self as *const Self as *const (),
                    timeout,
                );
            }
            sched::os_sched();
            Ok(None)
        })?;

        match ready {
            Some(value) => Ok(value),
            None => {
                sched::os_pend_result(cur)?;
                Ok(critical_section(|_cs| unsafe { cur.as_ref() }.flags_rdy))
            }
        }
    }

    fn wait_opt(all: bool, clear: bool) -> OsOpt {
        let mut wait_opt = if all { opt::FLAG_WAIT_ALL } else { opt::FLAG_WAIT_ANY };
        if !clear {
            wait_opt |= opt::FLAG_NO_CLEAR;
        }
        wait_opt
    }

    /// Wait until any bit of `mask` is set
    pub fn wait_any(&self, mask: OsFlags, clear: bool) -> OsResult<OsFlags> {
        self.pend(mask, Self::wait_opt(false, clear), 0)
    }

    /// Wait until every bit of `mask` is set
    pub fn wait_all(&self, mask: OsFlags, clear: bool) -> OsResult<OsFlags> {
        self.pend(mask, Self::wait_opt(true, clear), 0)
    }

    /// Wait at most `ms` milliseconds for any bit of `mask`
    pub fn wait_any_for(&self, mask: OsFlags, ms: u32, clear: bool) -> OsResult<OsFlags> {
        let (timeout, pend_opt) = os_pend_opts(ms);
        self.pend(mask, Self::wait_opt(false, clear) | pend_opt, timeout)
    }

    /// Wait at most `ms` milliseconds for every bit of `mask`
    pub fn wait_all_for(&self, mask: OsFlags, ms: u32, clear: bool) -> OsResult<OsFlags> {
        let (timeout, pend_opt) = os_pend_opts(ms);
        self.pend(mask, Self::wait_opt(true, clear) | pend_opt, timeout)
    }
}

impl Default for EventFlags {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for EventFlags {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventFlags").field("flags", &self.get()).finish()
    }
}
