//! Stack switching for hosted tasks
//!
//! A task body runs on its own stack buffer. Its OS thread enters the
//! buffer with [`os_ctx_switch`] and comes back the same way once the body
//! is done or the task was deleted. The frame [`os_task_frame_init`] builds
//! looks like one [`os_ctx_switch`] left behind, returning into a stub that
//! calls `entry(tcb)`.

use core::arch::naked_asm;

use crate::task::OsTcb;
use crate::types::OsStkElement;

/// First Rust code a task runs on its stack buffer
pub(super) type OsTaskEntry = extern "C" fn(*mut OsTcb) -> !;

// ============ x86_64 ============

/// Callee-saved registers, `mxcsr`/`fcw` and the return address, plus a
/// zero return address for the stub
#[cfg(target_arch = "x86_64")]
const FRAME_WORDS: usize = 10;

/// Default `mxcsr` in the low half, default x87 control word above it
#[cfg(target_arch = "x86_64")]
const FPU_CTRL_DEFAULT: usize = 0x037F_0000_1F80;

/// Save the callee-saved state on the current stack, store the stack
/// pointer in `*from`, then resume the context saved at `to`
///
/// # Safety
/// `to` must come from [`os_task_frame_init`] or an earlier switch away
/// from a context that is still alive.
#[cfg(target_arch = "x86_64")]
#[unsafe(naked)]
pub(super) unsafe extern "C" fn os_ctx_switch(
    from: *mut *mut OsStkElement,
    to: *mut OsStkElement,
) {
    naked_asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "sub rsp, 8",
        "stmxcsr dword ptr [rsp]",
        "fnstcw word ptr [rsp + 4]",
        "mov qword ptr [rdi], rsp",
        "mov rsp, rsi",
        "ldmxcsr dword ptr [rsp]",
        "fldcw word ptr [rsp + 4]",
        "add rsp, 8",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    );
}

/// Landing point of a fresh frame: `r12` carries the TCB
#[cfg(target_arch = "x86_64")]
#[unsafe(naked)]
unsafe extern "C" fn os_task_start() -> ! {
    naked_asm!(
        "mov rdi, r12",
        "call {entry}",
        "ud2",
        entry = sym super::os_task_entry,
    );
}

#[cfg(target_arch = "x86_64")]
fn frame(tcb: *mut OsTcb) -> [usize; FRAME_WORDS] {
    [
        FPU_CTRL_DEFAULT,
        0,                          // r15
        0,                          // r14
        0,                          // r13
        tcb as usize,               // r12
        0,                          // rbx
        0,                          // rbp
        os_task_start as usize,
        0,
        0,
    ]
}

// ============ aarch64 ============

/// x19-x28, fp, lr and d8-d15
#[cfg(target_arch = "aarch64")]
const FRAME_WORDS: usize = 20;

/// Save the callee-saved state on the current stack, store the stack
/// pointer in `*from`, then resume the context saved at `to`
///
/// # Safety
/// `to` must come from [`os_task_frame_init`] or an earlier switch away
/// from a context that is still alive.
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
pub(super) unsafe extern "C" fn os_ctx_switch(
    from: *mut *mut OsStkElement,
    to: *mut OsStkElement,
) {
    naked_asm!(
        "sub sp, sp, #160",
        "stp x19, x20, [sp, #0]",
        "stp x21, x22, [sp, #16]",
        "stp x23, x24, [sp, #32]",
        "stp x25, x26, [sp, #48]",
        "stp x27, x28, [sp, #64]",
        "stp x29, x30, [sp, #80]",
        "stp d8, d9, [sp, #96]",
        "stp d10, d11, [sp, #112]",
        "stp d12, d13, [sp, #128]",
        "stp d14, d15, [sp, #144]",
        "mov x9, sp",
        "str x9, [x0]",
        "mov sp, x1",
        "ldp x19, x20, [sp, #0]",
        "ldp x21, x22, [sp, #16]",
        "ldp x23, x24, [sp, #32]",
        "ldp x25, x26, [sp, #48]",
        "ldp x27, x28, [sp, #64]",
        "ldp x29, x30, [sp, #80]",
        "ldp d8, d9, [sp, #96]",
        "ldp d10, d11, [sp, #112]",
        "ldp d12, d13, [sp, #128]",
        "ldp d14, d15, [sp, #144]",
        "add sp, sp, #160",
        "ret",
    );
}

/// Landing point of a fresh frame: `x19` carries the TCB
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
unsafe extern "C" fn os_task_start() -> ! {
    naked_asm!(
        "mov x0, x19",
        "mov x29, xzr",
        "bl {entry}",
        "brk #1",
        entry = sym super::os_task_entry,
    );
}

#[cfg(target_arch = "aarch64")]
fn frame(tcb: *mut OsTcb) -> [usize; FRAME_WORDS] {
    let mut words = [0; FRAME_WORDS];
    words[0] = tcb as usize;
    words[11] = os_task_start as usize;
    words
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("the hosted port switches stacks on x86_64 and aarch64 only");

// ============ Frame ============

/// Build the first frame at the 16-byte aligned top of a stack buffer
///
/// Returns the stack pointer to hand to [`os_ctx_switch`].
///
/// # Safety
/// `stk_base..stk_base + stk_size` must be writable and larger than the
/// frame.
pub(super) unsafe fn os_task_frame_init(
    tcb: *mut OsTcb,
    stk_base: *mut u8,
    stk_size: usize,
) -> *mut OsStkElement {
    unsafe {
        let top = stk_base.add(stk_size);
        let aligned = top.sub(top as usize & 15) as *mut usize;
        let sp = aligned.sub(FRAME_WORDS);
        for (i, word) in frame(tcb).into_iter().enumerate() {
            sp.add(i).write(word);
        }
        sp as *mut OsStkElement
    }
}

/// Address of the caller's stack frame
#[inline(always)]
pub(super) fn stack_pointer() -> *mut OsStkElement {
    let marker = 0u8;
    core::hint::black_box(core::ptr::addr_of!(marker)) as *mut OsStkElement
}
