//! Scheduler module
//!
//! Priority-based preemptive scheduler with round-robin for same priority,
//! plus the helpers every blocking object uses to park and wake tasks.

mod pend_list;
mod rdy_list;

pub use pend_list::PendList;
pub use rdy_list::ReadyList;

use core::ptr::NonNull;

use crate::config::CFG_SCHED_ROUND_ROBIN_EN;
use crate::critical::{critical_section, is_isr_context, CriticalSection};
use crate::error::{OsError, OsResult};
use crate::kernel::{self, SchedState, SCHED};
use crate::sync::mutex::{self, OsMutex};
use crate::task::OsTcb;
use crate::types::{OsPendOn, OsPendStatus, OsPrio, OsTaskState, OsTick};

/// Main scheduling point
///
/// Determines the highest priority ready task and requests a context
/// switch if it is not the running one. It is called:
/// - After any operation that may change task readiness
/// - After releasing a semaphore/mutex
/// - When the running task blocks, yields or exits
///
/// Does nothing in ISR context (the ISR exit path decides), while the
/// scheduler is locked, or before the kernel is started.
pub fn os_sched() {
    if !kernel::KERNEL.is_running() {
        return;
    }

    if is_isr_context() {
        return;
    }

    if kernel::KERNEL.sched_lock_nesting() > 0 {
        return;
    }

    critical_section(|cs| {
        if unsafe { os_high_rdy_update(SCHED.get(cs)) } {
            crate::port::os_ctx_sw();
        }
    });
}

/// Record the head of the most urgent ready list as the next task
///
/// Returns true when it differs from the running task.
pub(crate) unsafe fn os_high_rdy_update(sched: &mut SchedState) -> bool {
    let high_prio = sched.prio_tbl.get_highest();
    let Some(high_rdy) = sched.rdy_list[high_prio as usize].head() else {
        return false;
    };

    let cpu = unsafe { kernel::cpu_state() };
    cpu.prio_high_rdy = high_prio;
    cpu.tcb_high_rdy = high_rdy.as_ptr();
    cpu.tcb_cur != high_rdy.as_ptr()
}

/// Round-robin scheduling for tasks at the same priority
///
/// Called from the tick interrupt. Rotating the list is enough: the
/// interrupt exit path notices the new head and requests the switch.
pub(crate) fn os_sched_round_robin(_cs: &CriticalSection) {
    if !CFG_SCHED_ROUND_ROBIN_EN {
        return;
    }

    if kernel::KERNEL.sched_lock_nesting() > 0 {
        return;
    }

    unsafe {
        let Some(cur_ptr) = kernel::tcb_cur_ptr() else {
            return;
        };
        let cur = &mut *cur_ptr.as_ptr();
        if cur.task_state != OsTaskState::Ready {
            return;
        }

        if cur.time_quanta_ctr > 0 {
            cur.time_quanta_ctr -= 1;
        }

        if cur.time_quanta_ctr == 0 {
            cur.time_quanta_ctr = cur.time_quanta;

            let rdy_list = kernel::rdy_list(cur.prio);
            if rdy_list.head() == Some(cur_ptr) && rdy_list.tail() != Some(cur_ptr) {
                rdy_list.remove(cur_ptr);
                rdy_list.insert_tail(cur_ptr);
            }
        }
    }
}

// ============ Ready list helpers ============

/// Make a task ready (tail of its priority level)
pub(crate) unsafe fn os_rdy_list_insert(tcb: NonNull<OsTcb>) {
    let prio = unsafe { tcb.as_ref() }.prio;

    unsafe {
        kernel::rdy_list(prio).insert_tail(tcb);
        kernel::prio_table().insert(prio);
    }
}

/// Make a task ready at the head of its priority level
pub(crate) unsafe fn os_rdy_list_insert_head(tcb: NonNull<OsTcb>) {
    let prio = unsafe { tcb.as_ref() }.prio;

    unsafe {
        kernel::rdy_list(prio).insert_head(tcb);
        kernel::prio_table().insert(prio);
    }
}

/// Remove a task from ready list
pub(crate) unsafe fn os_rdy_list_remove(tcb: NonNull<OsTcb>) {
    let prio = unsafe { tcb.as_ref() }.prio;

    unsafe {
        let rdy_list = kernel::rdy_list(prio);
        rdy_list.remove(tcb);

        if rdy_list.is_empty() {
            kernel::prio_table().remove(prio);
        }
    }
}

/// Move a ready task behind its equals
pub(crate) unsafe fn os_rdy_list_move_tail(tcb: NonNull<OsTcb>) {
    unsafe {
        let rdy_list = kernel::rdy_list(tcb.as_ref().prio);
        if rdy_list.tail() != Some(tcb) {
            rdy_list.remove(tcb);
            rdy_list.insert_tail(tcb);
        }
    }
}

/// Change the effective priority of a task
///
/// Keeps whichever list the task sits on ordered. A waiter on a mutex
/// passes the change on to the mutex owner.
pub(crate) unsafe fn os_task_prio_set(tcb: NonNull<OsTcb>, new_prio: OsPrio) {
    let tcb_ref = unsafe { &mut *tcb.as_ptr() };
    if tcb_ref.prio == new_prio {
        return;
    }

    match tcb_ref.task_state {
        OsTaskState::Ready => unsafe {
            os_rdy_list_remove(tcb);
            tcb_ref.prio = new_prio;
            if kernel::is_tcb_cur(tcb) {
                os_rdy_list_insert_head(tcb);
            } else {
                os_rdy_list_insert(tcb);
            }
        },
        OsTaskState::Pend | OsTaskState::PendTimeout => {
            tcb_ref.prio = new_prio;
            if let Some(list) = tcb_ref.pend_list_ptr {
                unsafe { (*list.as_ptr()).resort(tcb) };
            }
            if tcb_ref.pend_on == OsPendOn::Mutex {
                unsafe { mutex::os_mutex_prio_inherit(tcb_ref.pend_obj_ptr as *mut OsMutex) };
            }
        }
        OsTaskState::Delayed | OsTaskState::Deleted => tcb_ref.prio = new_prio,
    }
}

// ============ Pend helpers ============

/// Block a ready task, on `list` when the object keeps one
///
/// A non-zero `timeout` also links the task into the tick wheel. The caller
/// follows up with [`os_sched`] and, once running again, [`os_pend_result`].
pub(crate) unsafe fn os_pend(
    tcb: NonNull<OsTcb>,
    list: Option<NonNull<PendList>>,
    pend_on: OsPendOn,
    obj: *const (),
    timeout: OsTick,
) {
    let tcb_ref = unsafe { &mut *tcb.as_ptr() };

    unsafe { os_rdy_list_remove(tcb) };

    tcb_ref.pend_on = pend_on;
    tcb_ref.pend_status = OsPendStatus::Ok;
    tcb_ref.pend_obj_ptr = obj;
    tcb_ref.pend_list_ptr = list;

    if timeout > 0 {
        tcb_ref.task_state = OsTaskState::PendTimeout;
        unsafe { kernel::tick_wheel_insert(tcb, timeout) };
    } else {
        tcb_ref.task_state = OsTaskState::Pend;
    }

    if let Some(list) = list {
        unsafe { (*list.as_ptr()).insert_by_prio(tcb) };
    }
}

/// Take a pending task off its wait list and the tick wheel
///
/// Leaving a mutex wait list may lower the owner's inherited priority.
pub(crate) unsafe fn os_pend_unlink(tcb: NonNull<OsTcb>) {
    let tcb_ref = unsafe { &mut *tcb.as_ptr() };

    if let Some(list) = tcb_ref.pend_list_ptr.take() {
        unsafe { (*list.as_ptr()).remove(tcb) };
    }
    unsafe { kernel::tick_wheel_remove(tcb) };

    let pend_on = core::mem::replace(&mut tcb_ref.pend_on, OsPendOn::Nothing);
    let obj = core::mem::replace(&mut tcb_ref.pend_obj_ptr, core::ptr::null());

    if pend_on == OsPendOn::Mutex {
        unsafe { mutex::os_mutex_prio_inherit(obj as *mut OsMutex) };
    }
}

/// Wake a pending task with the given outcome
pub(crate) unsafe fn os_pend_ready(tcb: NonNull<OsTcb>, status: OsPendStatus) {
    unsafe { os_pend_unlink(tcb) };

    let tcb_ref = unsafe { &mut *tcb.as_ptr() };
    tcb_ref.pend_status = status;
    tcb_ref.task_state = OsTaskState::Ready;

    unsafe { os_rdy_list_insert(tcb) };
}

/// Outcome of the last pend of `tcb`
pub(crate) fn os_pend_result(tcb: NonNull<OsTcb>) -> OsResult<()> {
    critical_section(|_cs| match unsafe { tcb.as_ref() }.pend_status {
        OsPendStatus::Ok => Ok(()),
        OsPendStatus::Timeout => Err(OsError::Timeout),
    })
}

/// Common entry checks for an operation that may block the caller
///
/// Returns the calling task.
pub(crate) fn os_pend_precheck() -> OsResult<NonNull<OsTcb>> {
    if is_isr_context() {
        return Err(OsError::PendIsr);
    }

    let cur = kernel::os_tcb_self()?;

    if !kernel::KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }

    Ok(cur)
}
