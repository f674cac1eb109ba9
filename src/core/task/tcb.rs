//! Task Control Block (TCB) definition
//!
//! The TCB contains all the information needed to manage a task.

use alloc::boxed::Box;
use core::ptr::NonNull;

use crate::port::OsTaskCtx;
use crate::sched::PendList;
use crate::sync::mutex::OsMutex;
use crate::types::{
    OsFlags, OsOpt, OsPendOn, OsPendStatus, OsPrio, OsStkElement, OsTaskState, OsTick,
};

/// Task body, run once on the task's own context
pub type OsTaskEntry = Box<dyn FnOnce() + Send + 'static>;

/// Task Control Block
#[repr(C)]
pub struct OsTcb {
    // ============ Stack pointer ============
    /// Saved stack pointer (must stay the first field, PendSV reads it)
    pub stk_ptr: *mut OsStkElement,

    // ============ Stack information ============
    /// Lowest address of the stack buffer
    pub stk_base: *mut u8,
    /// Stack size in bytes
    pub stk_size: usize,

    // ============ Task identification ============
    /// Task name
    pub name: Option<&'static str>,

    // ============ Ready list links ============
    pub next_ptr: Option<NonNull<OsTcb>>,
    pub prev_ptr: Option<NonNull<OsTcb>>,

    // ============ Pend list links ============
    pub pend_next_ptr: Option<NonNull<OsTcb>>,
    pub pend_prev_ptr: Option<NonNull<OsTcb>>,
    /// Wait list the task is linked into
    pub pend_list_ptr: Option<NonNull<PendList>>,
    /// Object this task is pending on
    pub pend_obj_ptr: *const (),
    /// What type of object the task is pending on
    pub pend_on: OsPendOn,
    /// Result of pend operation
    pub pend_status: OsPendStatus,

    // ============ Tick list links ============
    pub tick_next_ptr: Option<NonNull<OsTcb>>,
    pub tick_prev_ptr: Option<NonNull<OsTcb>>,
    /// Remaining ticks for delay/timeout
    pub tick_remain: OsTick,
    /// Which tick wheel slot this task is in
    pub tick_wheel_slot: u8,
    /// Whether the task is linked into the tick wheel
    pub tick_linked: bool,

    // ============ Priority ============
    /// Effective priority (base raised by inheritance)
    pub prio: OsPrio,
    /// Base priority
    pub base_prio: OsPrio,

    // ============ State ============
    pub task_state: OsTaskState,

    // ============ Time slicing ============
    pub time_quanta: OsTick,
    pub time_quanta_ctr: OsTick,

    // ============ Flags ============
    /// Thread flags word
    pub flags: OsFlags,
    /// Flags being waited for
    pub flags_pend: OsFlags,
    /// Flags word that made the task ready
    pub flags_rdy: OsFlags,
    /// Flag wait options
    pub flags_opt: OsOpt,

    // ============ Message ============
    /// Hand-off slot of a task blocked on a queue
    pub msg_ptr: *mut (),

    // ============ Mutex priority inheritance ============
    /// Head of list of mutexes owned by this task
    pub mutex_grp_head: Option<NonNull<OsMutex>>,

    // ============ Join ============
    /// Tasks waiting for this one to be deleted
    pub join_list: PendList,

    // ============ Task entry point ============
    pub entry: Option<OsTaskEntry>,

    // ============ Port ============
    pub(crate) ctx: OsTaskCtx,
}

impl OsTcb {
    /// Create a new, unstarted TCB
    pub const fn new() -> Self {
        OsTcb {
            stk_ptr: core::ptr::null_mut(),
            stk_base: core::ptr::null_mut(),
            stk_size: 0,

            name: None,

            next_ptr: None,
            prev_ptr: None,

            pend_next_ptr: None,
            pend_prev_ptr: None,
            pend_list_ptr: None,
            pend_obj_ptr: core::ptr::null(),
            pend_on: OsPendOn::Nothing,
            pend_status: OsPendStatus::Ok,

            tick_next_ptr: None,
            tick_prev_ptr: None,
            tick_remain: 0,
            tick_wheel_slot: 0,
            tick_linked: false,

            prio: 0,
            base_prio: 0,

            task_state: OsTaskState::Deleted,

            time_quanta: 0,
            time_quanta_ctr: 0,

            flags: 0,
            flags_pend: 0,
            flags_rdy: 0,
            flags_opt: 0,

            msg_ptr: core::ptr::null_mut(),

            mutex_grp_head: None,

            join_list: PendList::new(),

            entry: None,

            ctx: OsTaskCtx::new(),
        }
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(self.task_state, OsTaskState::Pend | OsTaskState::PendTimeout)
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.task_state == OsTaskState::Deleted
    }
}

impl Default for OsTcb {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for OsTcb {}
unsafe impl Sync for OsTcb {}
