//! Cortex-M4 port implementation
//!
//! Provides context switching via PendSV exception handler and the system
//! tick via SysTick.

#![allow(named_asm_labels)]

use core::arch::{asm, naked_asm};
use core::ptr::NonNull;

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};

use crate::config::{CFG_CPU_CLK_HZ, CFG_TICK_RATE_HZ};
use crate::critical::critical_section;
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::task::{self, OsTcb};
use crate::types::OsStkElement;

/// Per-task port context (the saved frame lives on the task's stack)
#[derive(Debug, Default)]
pub struct OsTaskCtx;

impl OsTaskCtx {
    pub const fn new() -> Self {
        OsTaskCtx
    }
}

/// Interrupt stack for MSP
#[no_mangle]
static mut INTERRUPT_STACK: [u64; 256] = [0xDEADBEEF_DEADBEEF; 256];

// ============ Critical section ============

/// Enter a critical section (PRIMASK)
#[inline(always)]
pub unsafe fn os_cs_acquire() -> critical_section::RestoreState {
    unsafe { critical_section::acquire() }
}

/// Leave a critical section; a pended PendSV fires once interrupts are back
#[inline(always)]
pub unsafe fn os_cs_release(restore: critical_section::RestoreState) {
    unsafe { critical_section::release(restore) }
}

// ============ SysTick ============

/// Initialize SysTick timer for system tick generation
///
/// # Arguments
/// * `cnts` - Core clock cycles per tick
pub fn os_cpu_systick_init(cnts: u32) {
    let mut p = unsafe { cortex_m::Peripherals::steal() };

    p.SYST.set_reload(cnts - 1);
    p.SYST.clear_current();
    p.SYST.set_clock_source(SystClkSource::Core);
    p.SYST.enable_interrupt();
    p.SYST.enable_counter();
}

/// SysTick interrupt handler
#[no_mangle]
pub extern "C" fn SysTick() {
    crate::time::os_tick_handler();
}

/// Microseconds since the first tick
///
/// Whole ticks come from the kernel tick counter, the fraction from the
/// SysTick down-counter. A wrap the tick handler has not seen yet is
/// accounted for.
pub fn os_time_us() -> u64 {
    critical_section(|_cs| {
        let reload = SYST::get_reload() as u64 + 1;
        let mut ticks = kernel::KERNEL.tick_get();
        let mut current = SYST::get_current() as u64;

        if SCB::is_pendst_pending() {
            ticks += 1;
            current = SYST::get_current() as u64;
        }

        let us_per_tick = 1_000_000 / CFG_TICK_RATE_HZ as u64;
        let elapsed = reload - 1 - current;
        ticks * us_per_tick + elapsed * 1_000_000 / CFG_CPU_CLK_HZ as u64
    })
}

// ============ Start ============

/// Start the highest priority ready task
#[no_mangle]
#[allow(static_mut_refs)]
pub unsafe extern "C" fn os_start_high_rdy() {
    unsafe {
        let mut scb = cortex_m::Peripherals::steal().SCB;

        // Set PendSV and SysTick priority to lowest
        scb.set_priority(SystemHandler::PendSV, 0xF0);
        scb.set_priority(SystemHandler::SysTick, 0xF0);

        os_cpu_systick_init(CFG_CPU_CLK_HZ / CFG_TICK_RATE_HZ);

        // Switch MSP to dedicated interrupt stack
        let msp_top = &INTERRUPT_STACK as *const _ as u32
            + core::mem::size_of_val(&INTERRUPT_STACK) as u32;

        asm!("msr msp, {0}", in(reg) msp_top,);
        asm!("msr psp, {0}", in(reg) 0);

        // No task context to save on the first switch
        kernel::cpu_state().tcb_cur = core::ptr::null_mut();

        cortex_m::interrupt::enable();
        SCB::set_pendsv();
    }
}

/// Trigger context switch from task level
#[inline(always)]
pub fn os_ctx_sw() {
    SCB::set_pendsv();
}

/// Trigger context switch from interrupt level
#[inline(always)]
pub fn os_int_ctx_sw() {
    SCB::set_pendsv();
}

// ============ Task context ============

/// Context structure stored on stack
#[repr(C, align(4))]
struct UcStk {
    r4: u32,
    r5: u32,
    r6: u32,
    r7: u32,
    r8: u32,
    r9: u32,
    r10: u32,
    r11: u32,
    exc_return: u32, // LR value for exception return
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    lr: u32,
    pc: u32,
    xpsr: u32,
}
const CONTEXT_STACK_SIZE: usize = 17;

/// First code a task runs: its body, then the exit path
extern "C" fn os_task_trampoline(tcb: *mut OsTcb) -> ! {
    if let Some(tcb) = NonNull::new(tcb) {
        task::os_task_run(tcb);
    }
    os_task_abandon()
}

/// Build the initial exception frame at the top of a task stack
///
/// Returns the stack pointer PendSV restores from.
pub unsafe fn os_task_stk_init(
    tcb: NonNull<OsTcb>,
    stk_base: *mut u8,
    stk_size: usize,
) -> *mut OsStkElement {
    unsafe {
        let stk_top = stk_base.add(stk_size);
        let stk_aligned = ((stk_top as usize) & !7) as *mut u32;

        let frame_ptr = stk_aligned.sub(CONTEXT_STACK_SIZE) as *mut UcStk;

        frame_ptr.write(UcStk {
            r4: 0x04040404,
            r5: 0x05050505,
            r6: 0x06060606,
            r7: 0x07070707,
            r8: 0x08080808,
            r9: 0x09090909,
            r10: 0x10101010,
            r11: 0x11111111,
            exc_return: 0xFFFF_FFFD,
            r0: tcb.as_ptr() as u32,
            r1: 0,
            r2: 0,
            r3: 0,
            r12: 0,
            lr: os_task_return as *const () as u32,
            pc: (os_task_trampoline as usize as u32) | 1,
            xpsr: 0x0100_0000,
        });

        // 4 bytes below the frame, matching PendSV's "add r0, r0, #4"
        (frame_ptr as *mut u32).sub(1) as *mut OsStkElement
    }
}

/// The frame built by [`os_task_stk_init`] is all a task needs
pub unsafe fn os_task_spawn(_tcb: NonNull<OsTcb>) -> OsResult<()> {
    Ok(())
}

/// A deleted task is off its stack once PendSV switched away from it
pub fn os_task_reap(_tcb: NonNull<OsTcb>) {}

/// The running task
pub fn os_task_self() -> OsResult<NonNull<OsTcb>> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }
    unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::OsNotRunning)
}

/// A deleted task is never switched to again
pub unsafe fn os_task_kill(_tcb: NonNull<OsTcb>) {}

/// Park a deleted task until PendSV takes the CPU away
pub fn os_task_abandon() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

/// Idle task body
#[inline(always)]
pub fn os_cpu_idle() {
    cortex_m::asm::wfi();
}

/// Helper function called from PendSV to perform TCB switching
/// Returns new task's stack pointer
#[inline(never)]
#[no_mangle]
unsafe extern "C" fn pendsv_switch_context(cur_sp: *mut u32) -> *mut u32 {
    unsafe {
        let cpu = kernel::cpu_state();

        if !cpu.tcb_cur.is_null() {
            (*cpu.tcb_cur).stk_ptr = cur_sp;
        }

        cpu.tcb_cur = cpu.tcb_high_rdy;
        cpu.prio_cur = cpu.prio_high_rdy;

        if cpu.tcb_cur.is_null() {
            core::ptr::null_mut()
        } else {
            (*cpu.tcb_cur).stk_ptr
        }
    }
}

/// PendSV exception handler - performs full context switch
///
/// 1. Save R4-R11, LR to current task's PSP (skip if first task)
/// 2. Call switch_context to swap TCB pointers
/// 3. Restore R4-R11, LR from new task's stack
/// 4. Exception return
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    use crate::kernel::CPU_STATE;

    naked_asm!(
        "cpsid i",
        "dsb",
        "isb",

        "mrs r0, psp",

        "ldr r1, ={cpu_state}",
        "ldr r1, [r1]",
        "cbz r1, 1f",

        "stmdb r0!, {{r4-r11, lr}}",

        "sub r0, r0, #4",

        "1:",
        "bl pendsv_switch_context",

        "cbz r0, 2f",
        "add r0, r0, #4",
        "ldmia r0!, {{r4-r11, lr}}",

        "msr psp, r0",

        "2:",
        "cpsie i",
        "dsb",
        "isb",

        "bx lr",

        cpu_state = sym CPU_STATE,
    );
}

/// Return address of a task body; never reached through the trampoline
#[no_mangle]
fn os_task_return() -> ! {
    os_task_abandon()
}
