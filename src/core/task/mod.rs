//! Task management module
//!
//! Provides task creation, termination, priority control, yield and join.
//! Entry return, termination and self-termination all end in one retire
//! path that unlinks the task from every kernel list.

mod flags;
mod stack;
mod tcb;

pub use flags::{os_task_flags_clear, os_task_flags_get, os_task_flags_set, os_task_flags_wait};
pub(crate) use flags::os_flags_check;
pub use stack::StackInfo;
pub(crate) use stack::{os_stk_fill, os_task_stk_chk, os_task_stk_ovf};
pub use tcb::{OsTaskEntry, OsTcb};

use alloc::boxed::Box;
use core::ptr::NonNull;

use crate::config::{CFG_PRIO_IDLE, CFG_STK_SIZE_MIN, CFG_TIME_QUANTA_DEFAULT};
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::port;
use crate::sched;
use crate::sync::mutex;
use crate::types::{OsPendOn, OsPendStatus, OsPrio, OsTaskState};

/// Start a task on a constructed TCB
///
/// The TCB already carries the name and base priority. The stack buffer is
/// filled, the port builds the initial context at its top, and the task is
/// made ready.
///
/// # Safety
/// `tcb` must stay allocated, and `stk_base..stk_base + stk_size` alive and
/// untouched by anyone else, until the task is deleted and reaped.
pub(crate) unsafe fn os_task_create(
    tcb: NonNull<OsTcb>,
    stk_base: *mut u8,
    stk_size: usize,
    entry: OsTaskEntry,
) -> OsResult<()> {
    if is_isr_context() {
        return Err(OsError::TaskCreateIsr);
    }

    if stk_size < CFG_STK_SIZE_MIN {
        return Err(OsError::StkSizeInvalid);
    }

    kernel::os_caller_check()?;

    let prio = critical_section(|_cs| unsafe { tcb.as_ref() }.base_prio);
    if prio >= CFG_PRIO_IDLE {
        return Err(OsError::PrioInvalid);
    }

    unsafe { os_stk_fill(stk_base, stk_size) };
    let stk_ptr = unsafe { port::os_task_stk_init(tcb, stk_base, stk_size) };

    let name = critical_section(|_cs| {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };
        tcb_ref.stk_ptr = stk_ptr;
        tcb_ref.stk_base = stk_base;
        tcb_ref.stk_size = stk_size;
        tcb_ref.prio = tcb_ref.base_prio;
        tcb_ref.time_quanta = CFG_TIME_QUANTA_DEFAULT;
        tcb_ref.time_quanta_ctr = CFG_TIME_QUANTA_DEFAULT;
        tcb_ref.flags = 0;
        tcb_ref.pend_on = OsPendOn::Nothing;
        tcb_ref.pend_status = OsPendStatus::Ok;
        tcb_ref.entry = Some(entry);
        tcb_ref.name
    });

    unsafe { port::os_task_spawn(tcb) }?;

    critical_section(|_cs| unsafe {
        (*tcb.as_ptr()).task_state = OsTaskState::Ready;
        sched::os_rdy_list_insert(tcb);
        sched::os_sched();
    });

    crate::debug!("task {:?} started at prio {}", name, prio);
    Ok(())
}

fn os_idle_task() -> ! {
    loop {
        port::os_cpu_idle();
    }
}

/// Create the IDLE task (kernel init, inside its critical section)
pub(crate) unsafe fn os_task_create_idle(tcb: NonNull<OsTcb>, stk: &mut [u8]) {
    let stk_base = stk.as_mut_ptr();
    let stk_size = stk.len();

    let tcb_ref = unsafe { &mut *tcb.as_ptr() };
    *tcb_ref = OsTcb::new();
    tcb_ref.name = Some("Idle");
    tcb_ref.prio = CFG_PRIO_IDLE;
    tcb_ref.base_prio = CFG_PRIO_IDLE;
    tcb_ref.entry = Some(Box::new(|| os_idle_task()));

    unsafe {
        os_stk_fill(stk_base, stk_size);
        tcb_ref.stk_ptr = port::os_task_stk_init(tcb, stk_base, stk_size);
    }
    tcb_ref.stk_base = stk_base;
    tcb_ref.stk_size = stk_size;
    tcb_ref.task_state = OsTaskState::Ready;

    unsafe { sched::os_rdy_list_insert(tcb) };
}

/// Turn the calling OS thread into a task (hosted port)
///
/// The task has no kernel-visible stack and is named `"main"`. Returns once
/// the thread is the running task.
#[cfg(not(target_os = "none"))]
pub(crate) unsafe fn os_task_adopt(tcb: NonNull<OsTcb>, prio: OsPrio, ctx: port::OsTaskCtx) {
    critical_section(|_cs| unsafe {
        let tcb_ref = &mut *tcb.as_ptr();
        tcb_ref.name = Some("main");
        tcb_ref.prio = prio;
        tcb_ref.base_prio = prio;
        tcb_ref.time_quanta = CFG_TIME_QUANTA_DEFAULT;
        tcb_ref.time_quanta_ctr = CFG_TIME_QUANTA_DEFAULT;
        tcb_ref.ctx = ctx;
        tcb_ref.task_state = OsTaskState::Ready;
        sched::os_rdy_list_insert(tcb);
        sched::os_sched();
    });
    crate::trace!("adopted an OS thread as task \"main\"");
}

/// Retire the task of an adopted OS thread that is exiting (hosted port)
#[cfg(not(target_os = "none"))]
pub(crate) fn os_task_detach(tcb: NonNull<OsTcb>) {
    critical_section(|_cs| unsafe {
        if kernel::is_tcb_cur(tcb) {
            kernel::KERNEL.sched_lock_reset();
        }
        os_task_retire(tcb);
        sched::os_sched();
    });
    crate::trace!("adopted task retired");
}

/// Run the task body on the task's own context, then exit
pub(crate) fn os_task_run(tcb: NonNull<OsTcb>) {
    let entry = critical_section(|_cs| unsafe { (*tcb.as_ptr()).entry.take() });
    if let Some(entry) = entry {
        entry();
    }
    os_task_exit();
}

/// Unlink a task from every kernel list and mark it deleted
///
/// Owned mutexes pass to their next waiter and joiners are woken.
unsafe fn os_task_retire(tcb: NonNull<OsTcb>) {
    let tcb_ptr = tcb.as_ptr();

    unsafe {
        match (*tcb_ptr).task_state {
            OsTaskState::Deleted => return,
            OsTaskState::Ready => sched::os_rdy_list_remove(tcb),
            OsTaskState::Delayed => kernel::tick_wheel_remove(tcb),
            OsTaskState::Pend | OsTaskState::PendTimeout => sched::os_pend_unlink(tcb),
        }

        (*tcb_ptr).task_state = OsTaskState::Deleted;
        mutex::os_mutex_release_all(tcb);
        (*tcb_ptr).prio = (*tcb_ptr).base_prio;

        while let Some(joiner) = (*tcb_ptr).join_list.head() {
            sched::os_pend_ready(joiner, OsPendStatus::Ok);
        }
    }
}

/// Exit path of a task whose entry returned
pub(crate) fn os_task_exit() {
    let Ok(cur) = kernel::os_tcb_self() else {
        return;
    };

    let name = critical_section(|_cs| unsafe {
        os_task_retire(cur);
        kernel::KERNEL.sched_lock_reset();
        sched::os_sched();
        cur.as_ref().name
    });
    crate::debug!("task {:?} exited", name);
}

/// Delete the calling task; never returns
pub fn os_task_terminate_self() -> ! {
    if let Ok(cur) = kernel::os_tcb_self() {
        crate::debug!("task {:?} terminated itself", unsafe { cur.as_ref() }.name);
        critical_section(|_cs| unsafe {
            os_task_retire(cur);
            port::os_task_kill(cur);
            kernel::KERNEL.sched_lock_reset();
            sched::os_sched();
        });
    }
    port::os_task_abandon()
}

/// Delete a task
///
/// Deleting the caller does not return. Deleting a task that is not running
/// (never started, or already deleted) succeeds without effect.
pub fn os_task_del(tcb: NonNull<OsTcb>) -> OsResult<()> {
    if is_isr_context() {
        return Err(OsError::TaskDelIsr);
    }

    if kernel::os_tcb_self().ok() == Some(tcb) {
        os_task_terminate_self();
    }

    let name = critical_section(|_cs| unsafe {
        if tcb.as_ref().is_deleted() {
            return None;
        }
        if kernel::is_tcb_cur(tcb) {
            kernel::KERNEL.sched_lock_reset();
        }
        os_task_retire(tcb);
        port::os_task_kill(tcb);
        sched::os_sched();
        Some(tcb.as_ref().name)
    });

    if let Some(name) = name {
        crate::debug!("task {:?} terminated", name);
    }
    Ok(())
}

/// Change the base priority of a task
///
/// The effective priority stays raised while the task owns a mutex that a
/// more urgent task waits on.
pub fn os_task_change_prio(tcb: NonNull<OsTcb>, prio: OsPrio) -> OsResult<()> {
    if is_isr_context() {
        return Err(OsError::TaskChangePrioIsr);
    }

    if prio >= CFG_PRIO_IDLE {
        return Err(OsError::PrioInvalid);
    }

    kernel::os_caller_check()?;

    critical_section(|_cs| unsafe {
        let tcb_ref = &mut *tcb.as_ptr();
        tcb_ref.base_prio = prio;

        if tcb_ref.is_deleted() {
            tcb_ref.prio = prio;
            return;
        }

        mutex::os_mutex_prio_recompute(tcb);
        sched::os_sched();
    });
    Ok(())
}

/// Give up the CPU to the next ready task of the same priority
pub fn os_task_yield() -> OsResult<()> {
    if is_isr_context() {
        return Err(OsError::YieldIsr);
    }

    let cur = kernel::os_tcb_self()?;

    if !kernel::KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }

    critical_section(|_cs| unsafe {
        let cur_ref = &mut *cur.as_ptr();
        cur_ref.time_quanta_ctr = cur_ref.time_quanta;
        sched::os_rdy_list_move_tail(cur);
        sched::os_sched();
    });
    Ok(())
}

/// Block until `tcb` is deleted
///
/// # Returns
/// * `Ok(())` - The task is deleted (or never ran)
/// * `Err(OsError::TaskJoinSelf)` - `tcb` is the caller
/// * `Err(OsError::SchedLocked)` - Would block with the scheduler locked
pub fn os_task_join(tcb: NonNull<OsTcb>) -> OsResult<()> {
    let cur = sched::os_pend_precheck()?;

    if cur == tcb {
        return Err(OsError::TaskJoinSelf);
    }

    let pended = critical_section(|_cs| unsafe {
        if tcb.as_ref().is_deleted() {
            return Ok(false);
        }

        if kernel::KERNEL.sched_lock_nesting() > 0 {
            return Err(OsError::SchedLocked);
        }

        let list = NonNull::new_unchecked(core::ptr::addr_of_mut!((*tcb.as_ptr()).join_list));
        sched::os_pend(cur, Some(list), OsPendOn::Join, tcb.as_ptr() as *const (), 0);
        sched::os_sched();
        Ok(true)
    })?;

    if pended {
        sched::os_pend_result(cur)
    } else {
        Ok(())
    }
}
