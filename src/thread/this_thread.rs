//! Operations on the calling thread

use crate::error::OsResult;
use crate::kernel;
use crate::sync::os_pend_opts;
use crate::task;
use crate::thread::ThreadId;
use crate::time;
use crate::types::{opt, OsFlags, OsOpt};

/// Move the caller behind the other ready threads of its priority
pub fn yield_now() -> OsResult<()> {
    task::os_task_yield()
}

/// Sleep for at least `ms` milliseconds; `0` returns at once
pub fn sleep_for(ms: u32) -> OsResult<()> {
    if ms == 0 {
        return Ok(());
    }
    time::os_time_dly(time::os_ms_to_ticks(ms))
}

/// Flags of the calling thread (`0` outside a thread)
pub fn flags_get() -> OsFlags {
    task::os_task_flags_get().unwrap_or(0)
}

/// Clear flags, returning the value before clearing
pub fn flags_clear(mask: OsFlags) -> OsFlags {
    task::os_task_flags_clear(mask).unwrap_or(0)
}

fn flags_wait(mask: OsFlags, mode: OsOpt, ms: u32) -> OsFlags {
    let (timeout, pend_opt) = os_pend_opts(ms);
    match task::os_task_flags_wait(mask, mode | pend_opt, timeout) {
        Ok(value) => value,
        Err(err) => {
            crate::trace!("thread flags wait for {:#x} ended: {:?}", mask, err);
            flags_get()
        }
    }
}

/// Block until every bit of `mask` is set
///
/// Returns the flags that satisfied the wait, before the matched bits were
/// cleared.
pub fn flags_wait_all(mask: OsFlags) -> OsFlags {
    flags_wait(mask, opt::FLAG_WAIT_ALL, crate::types::OS_WAIT_FOREVER)
}

/// Block until any bit of `mask` is set
pub fn flags_wait_any(mask: OsFlags) -> OsFlags {
    flags_wait(mask, opt::FLAG_WAIT_ANY, crate::types::OS_WAIT_FOREVER)
}

/// Like [`flags_wait_all`] with a timeout in milliseconds
///
/// On timeout the currently set flags are returned. A zero timeout never
/// blocks.
pub fn flags_wait_all_for(mask: OsFlags, ms: u32) -> OsFlags {
    flags_wait(mask, opt::FLAG_WAIT_ALL, ms)
}

pub fn flags_wait_any_for(mask: OsFlags, ms: u32) -> OsFlags {
    flags_wait(mask, opt::FLAG_WAIT_ANY, ms)
}

/// Id of the calling thread, `None` from ISR context
pub fn get_id() -> Option<ThreadId> {
    kernel::os_tcb_self().ok().map(ThreadId::from_tcb)
}

pub fn get_name() -> Option<&'static str> {
    let cur = kernel::os_tcb_self().ok()?;
    crate::critical::critical_section(|_cs| unsafe { cur.as_ref() }.name)
}

/// End the calling thread
///
/// Owned mutexes pass to their next waiter and joiners are woken.
pub fn terminate() -> ! {
    task::os_task_terminate_self()
}
