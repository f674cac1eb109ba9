//! Thread flags
//!
//! Each task owns a 32-bit flags word. Any context may set bits; only the
//! owner waits on or clears them.

use core::ptr::NonNull;

use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched;
use crate::task::OsTcb;
use crate::types::{opt, OsFlags, OsOpt, OsPendOn, OsPendStatus, OsTaskState, OsTick};

/// Test a flags word against a wait request
///
/// On success returns the word as it was before the requested bits were
/// consumed (they are kept with `FLAG_NO_CLEAR`).
pub(crate) fn os_flags_check(flags: &mut OsFlags, mask: OsFlags, wait_opt: OsOpt) -> Option<OsFlags> {
    let satisfied = if wait_opt & opt::FLAG_WAIT_ALL != 0 {
        *flags & mask == mask
    } else {
        *flags & mask != 0
    };

    if !satisfied {
        return None;
    }

    let value = *flags;
    if wait_opt & opt::FLAG_NO_CLEAR == 0 {
        *flags &= !mask;
    }
    Some(value)
}

/// Set flags on a task, waking it when its wait is satisfied
///
/// Returns the flags word right after setting. Valid from ISR context.
pub fn os_task_flags_set(tcb: NonNull<OsTcb>, mask: OsFlags) -> OsResult<OsFlags> {
    if !is_isr_context() {
        kernel::os_caller_check()?;
    }

    critical_section(|_cs| unsafe {
        let tcb_ref = &mut *tcb.as_ptr();
        if tcb_ref.task_state == OsTaskState::Deleted {
            return Err(OsError::TaskNotExist);
        }

        tcb_ref.flags |= mask;
        let flags = tcb_ref.flags;

        if tcb_ref.is_pending() && tcb_ref.pend_on == OsPendOn::TaskFlag {
            let (pend, wait_opt) = (tcb_ref.flags_pend, tcb_ref.flags_opt);
            if let Some(value) = os_flags_check(&mut tcb_ref.flags, pend, wait_opt) {
                tcb_ref.flags_rdy = value;
                sched::os_pend_ready(tcb, OsPendStatus::Ok);
                sched::os_sched();
            }
        }

        Ok(flags)
    })
}

/// Current flags of the calling task
pub fn os_task_flags_get() -> OsResult<OsFlags> {
    let cur = kernel::os_tcb_self()?;
    Ok(critical_section(|_cs| unsafe { cur.as_ref() }.flags))
}

/// Clear flags of the calling task, returning the word before clearing
pub fn os_task_flags_clear(mask: OsFlags) -> OsResult<OsFlags> {
    let cur = kernel::os_tcb_self()?;
    Ok(critical_section(|_cs| unsafe {
        let tcb_ref = &mut *cur.as_ptr();
        let prior = tcb_ref.flags;
        tcb_ref.flags &= !mask;
        prior
    }))
}

/// Wait on the calling task's flags
///
/// `wait_opt` combines `FLAG_WAIT_ALL`/`FLAG_WAIT_ANY`, `FLAG_NO_CLEAR` and
/// `PEND_NON_BLOCKING`. A zero `timeout` waits forever.
///
/// # Returns
/// * `Ok(flags)` - The flags word that satisfied the wait
/// * `Err(OsError::PendWouldBlock)` - Non-blocking and not satisfied
/// * `Err(OsError::Timeout)` - Timeout expired
pub fn os_task_flags_wait(mask: OsFlags, wait_opt: OsOpt, timeout: OsTick) -> OsResult<OsFlags> {
    if mask == 0 {
        return Err(OsError::FlagPendOpt);
    }

    let cur = sched::os_pend_precheck()?;

    let ready = critical_section(|_cs| unsafe {
        let tcb_ref = &mut *cur.as_ptr();

        if let Some(value) = os_flags_check(&mut tcb_ref.flags, mask, wait_opt) {
            return Ok(Some(value));
        }

        if wait_opt & opt::PEND_NON_BLOCKING != 0 {
            return Err(OsError::PendWouldBlock);
        }

        if kernel::KERNEL.sched_lock_nesting() > 0 {
            return Err(OsError::SchedLocked);
        }

        tcb_ref.flags_pend = mask;
        tcb_ref.flags_opt = wait_opt;
        tcb_ref.flags_rdy = 0;

        sched::os_pend(cur, None, OsPendOn::TaskFlag, core::ptr::null(), timeout);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_any_all_and_no_clear() {
        let mut flags = 0b0101;
        assert_eq!(os_flags_check(&mut flags, 0b0011, opt::FLAG_WAIT_ALL), None);
        assert_eq!(flags, 0b0101);

        assert_eq!(os_flags_check(&mut flags, 0b0011, opt::FLAG_WAIT_ANY), Some(0b0101));
        assert_eq!(flags, 0b0100);

        let keep = opt::FLAG_WAIT_ALL | opt::FLAG_NO_CLEAR;
        assert_eq!(os_flags_check(&mut flags, 0b0100, keep), Some(0b0100));
        assert_eq!(flags, 0b0100);
    }
}
