//! Global kernel state and initialization
//!
//! This module manages the global OS state including initialization,
//! starting the scheduler, and tracking kernel status.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use portable_atomic::AtomicU64;

use crate::config::{CFG_IDLE_STK_SIZE, CFG_PRIO_MAX, CFG_TICK_WHEEL_SIZE};
use crate::critical::{critical_section, is_isr_context};
use crate::core::cs_cell::CsCell;
use crate::error::{OsError, OsResult};
use crate::prio::PrioTable;
use crate::sched::ReadyList;
use crate::task::OsTcb;
use crate::types::{OsNestingCtr, OsPrio, OsTick};

// ============ Kernel State Structures ============

/// Atomic kernel flags
pub struct KernelFlags {
    initialized: AtomicBool,
    running: AtomicBool,
    int_nesting: AtomicU8,
    sched_lock_nesting: AtomicU8,
    tick_counter: AtomicU64,
}

impl KernelFlags {
    const fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
            int_nesting: AtomicU8::new(0),
            sched_lock_nesting: AtomicU8::new(0),
            tick_counter: AtomicU64::new(0),
        }
    }

    fn reset(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.int_nesting.store(0, Ordering::SeqCst);
        self.sched_lock_nesting.store(0, Ordering::SeqCst);
        self.tick_counter.store(0, Ordering::SeqCst);
    }

    /// Check if the OS is running
    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Check if OS is initialized
    #[inline(always)]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Get current tick count
    #[inline(always)]
    pub fn tick_get(&self) -> u64 {
        self.tick_counter.load(Ordering::Relaxed)
    }

    /// Get interrupt nesting level
    #[inline(always)]
    pub fn int_nesting(&self) -> OsNestingCtr {
        self.int_nesting.load(Ordering::Relaxed)
    }

    /// Get scheduler lock nesting level
    #[inline(always)]
    pub fn sched_lock_nesting(&self) -> OsNestingCtr {
        self.sched_lock_nesting.load(Ordering::SeqCst)
    }

    /// Increment and return tick count
    #[inline(always)]
    pub(crate) fn tick_increment(&self) -> u64 {
        self.tick_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Enter ISR
    #[inline(always)]
    pub(crate) fn int_enter(&self) {
        if self.is_running() {
            let nesting = self.int_nesting.load(Ordering::Relaxed);
            if nesting < 250 {
                self.int_nesting.store(nesting + 1, Ordering::Relaxed);
            }
        }
    }

    #[inline(always)]
    fn set_initialized(&self, val: bool) {
        self.initialized.store(val, Ordering::SeqCst);
    }

    #[inline(always)]
    fn set_running(&self, val: bool) {
        self.running.store(val, Ordering::SeqCst);
    }

    /// Decrement int nesting
    #[inline(always)]
    fn int_nesting_dec(&self) -> OsNestingCtr {
        let nesting = self.int_nesting.load(Ordering::Relaxed);
        if nesting > 0 {
            self.int_nesting.store(nesting - 1, Ordering::Relaxed);
        }
        nesting.saturating_sub(1)
    }

    fn try_sched_lock(&self) -> OsResult<()> {
        let nesting = self.sched_lock_nesting.load(Ordering::SeqCst);
        if nesting == OsNestingCtr::MAX {
            return Err(OsError::LockNestingOvf);
        }
        self.sched_lock_nesting.store(nesting + 1, Ordering::SeqCst);
        Ok(())
    }

    fn try_sched_unlock(&self) -> OsResult<OsNestingCtr> {
        let nesting = self.sched_lock_nesting.load(Ordering::SeqCst);
        if nesting == 0 {
            return Err(OsError::SchedNotLocked);
        }
        self.sched_lock_nesting.store(nesting - 1, Ordering::SeqCst);
        Ok(nesting - 1)
    }

    /// Drop every scheduler lock level (task exit while locked)
    #[inline(always)]
    pub(crate) fn sched_lock_reset(&self) {
        self.sched_lock_nesting.store(0, Ordering::SeqCst);
    }
}

// ============ Global Instances ============

/// Global kernel state instance
pub(crate) static KERNEL: KernelFlags = KernelFlags::new();

/// Scheduler state
pub struct SchedState {
    pub(crate) prio_tbl: PrioTable,
    pub(crate) rdy_list: [ReadyList; CFG_PRIO_MAX],
    pub(crate) tick_wheel: [Option<NonNull<OsTcb>>; CFG_TICK_WHEEL_SIZE],
}

impl SchedState {
    const fn new() -> Self {
        Self {
            prio_tbl: PrioTable::new(),
            rdy_list: [ReadyList::new(); CFG_PRIO_MAX],
            tick_wheel: [None; CFG_TICK_WHEEL_SIZE],
        }
    }

    fn reset(&mut self) {
        self.prio_tbl.init();
        for list in self.rdy_list.iter_mut() {
            list.init();
        }
        self.tick_wheel = [None; CFG_TICK_WHEEL_SIZE];
    }

    #[inline(always)]
    fn tick_wheel_slot(tick: u64) -> usize {
        (tick % CFG_TICK_WHEEL_SIZE as u64) as usize
    }

    /// Add task to tick wheel, expiring `ticks` from now
    unsafe fn tick_wheel_insert(&mut self, tcb: NonNull<OsTcb>, ticks: OsTick) {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };
        let expiry = KERNEL.tick_get().wrapping_add(ticks as u64);
        let slot = Self::tick_wheel_slot(expiry);

        tcb_ref.tick_remain = ticks;
        tcb_ref.tick_wheel_slot = slot as u8;
        tcb_ref.tick_linked = true;

        // Insert at head of slot
        tcb_ref.tick_next_ptr = self.tick_wheel[slot];
        tcb_ref.tick_prev_ptr = None;

        if let Some(mut old_head) = self.tick_wheel[slot] {
            unsafe { old_head.as_mut().tick_prev_ptr = Some(tcb) };
        }

        self.tick_wheel[slot] = Some(tcb);
    }

    /// Remove task from tick wheel
    unsafe fn tick_wheel_remove(&mut self, tcb: NonNull<OsTcb>) {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };
        if !tcb_ref.tick_linked {
            return;
        }
        let slot = tcb_ref.tick_wheel_slot as usize;

        if let Some(mut prev) = tcb_ref.tick_prev_ptr {
            unsafe { prev.as_mut().tick_next_ptr = tcb_ref.tick_next_ptr };
        } else {
            self.tick_wheel[slot] = tcb_ref.tick_next_ptr;
        }

        if let Some(mut next) = tcb_ref.tick_next_ptr {
            unsafe { next.as_mut().tick_prev_ptr = tcb_ref.tick_prev_ptr };
        }

        tcb_ref.tick_next_ptr = None;
        tcb_ref.tick_prev_ptr = None;
        tcb_ref.tick_linked = false;
        tcb_ref.tick_remain = 0;
    }
}

// SAFETY: the task pointers are only followed inside critical sections
unsafe impl Send for SchedState {}

/// Global scheduler state instance
pub(crate) static SCHED: CsCell<SchedState> = CsCell::new(SchedState::new());

/// IDLE task TCB
static IDLE_TCB: CsCell<OsTcb> = CsCell::new(OsTcb::new());

/// IDLE task stack
static IDLE_STK: CsCell<[u8; CFG_IDLE_STK_SIZE]> = CsCell::new([0; CFG_IDLE_STK_SIZE]);

// ============ CPU/Context Switch State ============

/// CPU context switch state
#[repr(C)]
pub struct CpuState {
    /// Current running task's TCB pointer
    pub tcb_cur: *mut OsTcb,
    /// Highest priority ready task's TCB pointer
    pub tcb_high_rdy: *mut OsTcb,
    /// Current running task's priority
    pub prio_cur: OsPrio,
    /// Highest ready priority
    pub prio_high_rdy: OsPrio,
}

impl CpuState {
    pub const fn new() -> Self {
        Self {
            tcb_cur: core::ptr::null_mut(),
            tcb_high_rdy: core::ptr::null_mut(),
            prio_cur: 0,
            prio_high_rdy: 0,
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for CpuState {
    fn default() -> Self {
        Self::new()
    }
}

/// Global CPU state instance
#[no_mangle]
#[used]
pub static mut CPU_STATE: CpuState = CpuState::new();

/// Access the CPU switch state
///
/// # Safety
/// Caller must be inside a critical section or the PendSV handler.
#[inline(always)]
pub(crate) unsafe fn cpu_state() -> &'static mut CpuState {
    unsafe { &mut *core::ptr::addr_of_mut!(CPU_STATE) }
}

// ============ Public API ============

/// Initialize the RTOS kernel
///
/// This must be called before any other OS function. It initializes the
/// priority table, ready lists, and internal state, and creates the IDLE
/// task. The hosted port calls it on first use.
///
/// # Returns
/// * `Ok(())` - Initialization successful
/// * `Err(OsError::OsRunning)` - OS is already running
pub fn os_init() -> OsResult<()> {
    if KERNEL.is_running() {
        return Err(OsError::OsRunning);
    }

    critical_section(|cs| {
        KERNEL.reset();
        unsafe { cpu_state().reset() };
        SCHED.get(cs).reset();

        let stk = IDLE_STK.get(cs);
        unsafe { crate::task::os_task_create_idle(os_idle_tcb(), stk) };

        KERNEL.set_initialized(true);
    });

    crate::info!("kernel initialized, {} priority levels", CFG_PRIO_MAX);
    Ok(())
}

/// Start multitasking
///
/// Switches to the highest priority ready task. On Cortex-M this never
/// returns. On the hosted port it starts the tick source and returns.
///
/// # Returns
/// * `Err(OsError::OsNotInit)` - OS not initialized
/// * `Err(OsError::OsRunning)` - OS is already running
pub fn os_start() -> OsResult<()> {
    if !KERNEL.is_initialized() {
        return Err(OsError::OsNotInit);
    }

    if KERNEL.is_running() {
        return Err(OsError::OsRunning);
    }

    critical_section(|cs| {
        let sched = SCHED.get(cs);
        let high_prio = sched.prio_tbl.get_highest();
        let head = sched.rdy_list[high_prio as usize]
            .head()
            .map_or(core::ptr::null_mut(), |p| p.as_ptr());

        let cpu = unsafe { cpu_state() };
        cpu.prio_high_rdy = high_prio;
        cpu.prio_cur = high_prio;
        cpu.tcb_high_rdy = head;
        cpu.tcb_cur = head;

        KERNEL.set_running(true);
    });

    crate::info!("kernel started");
    unsafe { crate::port::os_start_high_rdy() };

    Ok(())
}

/// Check whether multitasking has started
#[inline]
pub fn is_running() -> bool {
    KERNEL.is_running()
}

/// Exit ISR
///
/// Called at the end of every kernel-aware interrupt. When the outermost
/// interrupt returns and a different task became the one to run, a context
/// switch is requested.
pub fn os_int_exit() {
    if !KERNEL.is_running() {
        return;
    }

    critical_section(|cs| {
        if KERNEL.int_nesting() == 0 {
            return;
        }

        let new_nesting = KERNEL.int_nesting_dec();
        if new_nesting == 0 && KERNEL.sched_lock_nesting() == 0 {
            let sched = SCHED.get(cs);
            if unsafe { crate::sched::os_high_rdy_update(sched) } {
                crate::port::os_int_ctx_sw();
            }
        }
    });
}

/// Get the calling task
///
/// On the hosted port an OS thread that is not yet a task is adopted as one
/// (named `"main"`, at normal priority), booting the kernel if needed.
pub fn os_tcb_self() -> OsResult<NonNull<OsTcb>> {
    crate::port::os_task_self()
}

/// Check that the caller may create or reconfigure tasks
///
/// On Cortex-M tasks are usually created between [`os_init`] and
/// [`os_start`], so only initialization is required before start. The
/// hosted port boots and adopts the caller.
pub(crate) fn os_caller_check() -> OsResult<()> {
    if KERNEL.is_running() || cfg!(not(target_os = "none")) {
        return os_tcb_self().map(|_| ());
    }

    if KERNEL.is_initialized() {
        Ok(())
    } else {
        Err(OsError::OsNotInit)
    }
}

/// Lock the scheduler
///
/// Nests up to 255 levels. While locked, the calling task is never
/// preempted by another task and may not block.
pub fn os_sched_lock() -> OsResult<()> {
    if is_isr_context() {
        return Err(OsError::SchedLockIsr);
    }

    os_tcb_self()?;

    if !KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }

    critical_section(|_cs| KERNEL.try_sched_lock())
}

/// Unlock the scheduler, rescheduling when the last level is released
pub fn os_sched_unlock() -> OsResult<()> {
    if is_isr_context() {
        return Err(OsError::SchedUnlockIsr);
    }

    os_tcb_self()?;

    if !KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }

    critical_section(|_cs| {
        let remaining = KERNEL.try_sched_unlock()?;
        if remaining == 0 {
            crate::sched::os_sched();
        }
        Ok(())
    })
}

// ============ Internal accessors for other modules ============

/// The IDLE task
#[inline(always)]
pub(crate) fn os_idle_tcb() -> NonNull<OsTcb> {
    // SAFETY: pointer to a static
    unsafe { NonNull::new_unchecked(IDLE_TCB.as_ptr()) }
}

/// Get mutable reference to priority table
#[inline(always)]
pub(crate) unsafe fn prio_table() -> &'static mut PrioTable {
    unsafe { &mut SCHED.get_unchecked().prio_tbl }
}

/// Get reference to ready list for a priority
#[inline(always)]
pub(crate) unsafe fn rdy_list(prio: OsPrio) -> &'static mut ReadyList {
    unsafe { &mut SCHED.get_unchecked().rdy_list[prio as usize] }
}

/// Get current TCB pointer as Option<NonNull>
#[inline]
pub(crate) unsafe fn tcb_cur_ptr() -> Option<NonNull<OsTcb>> {
    NonNull::new(unsafe { cpu_state() }.tcb_cur)
}

/// Check whether `tcb` is the task the CPU is running
#[inline]
pub(crate) unsafe fn is_tcb_cur(tcb: NonNull<OsTcb>) -> bool {
    unsafe { cpu_state() }.tcb_cur == tcb.as_ptr()
}

// ============ Tick Wheel Management ============

/// Add task to tick wheel, expiring `ticks` from the current tick
pub(crate) unsafe fn tick_wheel_insert(tcb: NonNull<OsTcb>, ticks: OsTick) {
    unsafe {
        SCHED.get_unchecked().tick_wheel_insert(tcb, ticks);
    }
}

/// Remove task from tick wheel (no-op when not linked)
pub(crate) unsafe fn tick_wheel_remove(tcb: NonNull<OsTcb>) {
    unsafe {
        SCHED.get_unchecked().tick_wheel_remove(tcb);
    }
}

/// Get head of tick wheel at the slot for `tick`
#[inline]
pub(crate) unsafe fn tick_wheel_head(tick: u64) -> Option<NonNull<OsTcb>> {
    unsafe { SCHED.get_unchecked().tick_wheel[SchedState::tick_wheel_slot(tick)] }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared<T: Sync>(_: &T) {}

    #[test]
    fn kernel_statics_are_shareable() {
        shared(&SCHED);
        shared(&IDLE_TCB);
        shared(&KERNEL);
    }

    #[test]
    fn tick_wheel_slots_wrap() {
        assert_eq!(SchedState::tick_wheel_slot(0), 0);
        assert_eq!(SchedState::tick_wheel_slot(CFG_TICK_WHEEL_SIZE as u64 + 3), 3);
    }
}
