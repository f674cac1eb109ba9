//! Hosted port
//!
//! Runs the kernel on an ordinary OS. Every task is backed by an OS thread;
//! a task started through [`Thread`](crate::Thread) runs its body on its own
//! stack buffer, entered from the OS thread with a stack switch.
//!
//! Only the thread holding the CPU token may execute task code, and only
//! the thread of the task the kernel considers current may take the token.
//! A context switch updates `CPU_STATE`, wakes the new current thread and
//! sends `SIGUSR1` to the token holder. The holder gives the token back
//! from the signal handler and stays suspended there until it is current
//! again, so a preempted task stops wherever it was. Kernel code runs with
//! the signal blocked.
//!
//! Threads the kernel did not create are adopted as a task named `"main"`
//! on their first kernel call and retired when they exit. A background
//! thread plays the SysTick interrupt: it is the only ISR context.
//!
//! A task preempted while it holds a host lock (stdio, allocator arena)
//! blocks every task that needs the same lock until it runs again.

mod context;

use core::ptr::{self, NonNull};
use std::cell::{Cell, RefCell};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Once, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use self::context::{os_ctx_switch, os_task_frame_init, stack_pointer};
use crate::config::CFG_TICK_RATE_HZ;
use crate::error::{OsError, OsResult};
use crate::kernel::{self, SCHED};
use crate::task::{self, OsTcb};
use crate::thread::Priority;
use crate::types::{OsStkElement, OsTaskState};

/// Signal that suspends the holder of the CPU token
const SIG_PREEMPT: libc::c_int = libc::SIGUSR1;

/// OS stack of a task thread; the task body runs on its own buffer
const HOST_STK_SIZE: usize = 64 * 1024;

const US_PER_TICK: u64 = 1_000_000 / CFG_TICK_RATE_HZ as u64;

const RUNNING: u8 = 0;
/// Deleted by the kernel; winds down at the next chance
const KILLED: u8 = 1;
/// Adopted thread tearing down its locals
const EXITED: u8 = 2;
/// Off the task stack for good
const GONE: u8 = 3;

/// Unwind payload that ends a deleted adopted thread
struct TaskExit;

/// The OS thread behind a task
pub struct HostThread {
    thread: OnceLock<thread::Thread>,
    pthread: OnceLock<libc::pthread_t>,
    state: AtomicU8,
    tcb: NonNull<OsTcb>,
}

// SAFETY: `tcb` is only dereferenced inside critical sections, and the
// pthread handle is only used while its thread is alive
unsafe impl Send for HostThread {}
unsafe impl Sync for HostThread {}

impl HostThread {
    fn new(tcb: NonNull<OsTcb>) -> Self {
        HostThread {
            thread: OnceLock::new(),
            pthread: OnceLock::new(),
            state: AtomicU8::new(RUNNING),
            tcb,
        }
    }

    /// Record the calling thread as the one behind the task
    fn bind(&self) {
        self.thread.get_or_init(thread::current);
        // SAFETY: always succeeds
        self.pthread.get_or_init(|| unsafe { libc::pthread_self() });
    }

    fn is_caller(&self) -> bool {
        ptr::eq(self, CURRENT.get())
    }

    /// Interrupt whatever the thread is doing
    fn kick(&self) {
        if let Some(&pthread) = self.pthread.get() {
            // SAFETY: the thread has not exited, see `turn`
            unsafe { libc::pthread_kill(pthread, SIG_PREEMPT) };
        }
    }

    /// Get the thread out of a park or a preemption wait
    fn wake(&self) {
        if self.is_caller() {
            return;
        }
        if let Some(thread) = self.thread.get() {
            thread.unpark();
        }
        self.kick();
    }
}

/// Per-task port context
#[derive(Default)]
pub struct OsTaskCtx(pub(crate) Option<Arc<HostThread>>);

impl OsTaskCtx {
    pub const fn new() -> Self {
        OsTaskCtx(None)
    }
}

/// Adopted thread's task, retired and freed when the thread exits
struct Adopted(Arc<HostThread>);

impl Drop for Adopted {
    fn drop(&mut self) {
        self.0.state.store(EXITED, Ordering::Release);

        let tcb = self.0.tcb;
        task::os_task_detach(tcb);
        CURRENT.set(ptr::null());
        // SAFETY: leaked in `adopt`, unlinked from every kernel list above
        drop(unsafe { Box::from_raw(tcb.as_ptr()) });
    }
}

thread_local! {
    static CURRENT: Cell<*const HostThread> = const { Cell::new(ptr::null()) };
    static CS_NESTING: Cell<u8> = const { Cell::new(0) };
    static IN_ISR: Cell<bool> = const { Cell::new(false) };
    static IN_PREEMPT: Cell<bool> = const { Cell::new(false) };
    /// Where the thread left its OS stack for the task stack
    static HOST_SP: Cell<*mut OsStkElement> = const { Cell::new(ptr::null_mut()) };
    static ADOPTED: RefCell<Option<Adopted>> = const { RefCell::new(None) };
}

/// Pending context switch (PendSV)
static PENDSV: AtomicBool = AtomicBool::new(false);

/// Thread allowed to execute task code
static CPU_HOLDER: AtomicPtr<HostThread> = AtomicPtr::new(ptr::null_mut());

static BOOT: Once = Once::new();
static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Microseconds since `EPOCH` at the last tick
static LAST_TICK_US: AtomicU64 = AtomicU64::new(0);

// ============ CPU token ============

enum Turn {
    Run,
    Wait,
    Exit,
}

/// May the calling thread run task code now?
///
/// Caller holds the raw critical section. A thread that may not run, or
/// is winding down, gives the token back.
fn turn() -> Turn {
    let ctx = CURRENT.get();
    if ctx.is_null() {
        return Turn::Run;
    }

    // SAFETY: CURRENT is cleared before its HostThread can go away
    let ctx = unsafe { &*ctx };
    let me = ctx as *const HostThread as *mut HostThread;
    let tcb = ctx.tcb.as_ptr();

    match ctx.state.load(Ordering::Acquire) {
        KILLED if thread::panicking() => return Turn::Run,
        KILLED => {
            unsafe { release_cpu(me) };
            return Turn::Exit;
        }
        EXITED => {
            unsafe { release_cpu(me) };
            return Turn::Run;
        }
        _ => {}
    }

    unsafe {
        if (*tcb).task_state == OsTaskState::Deleted {
            release_cpu(me);
            return Turn::Run;
        }

        if kernel::cpu_state().tcb_cur != tcb {
            save_stack_pointer(tcb);
            release_cpu(me);
            return Turn::Wait;
        }
    }

    match CPU_HOLDER.compare_exchange(ptr::null_mut(), me, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => Turn::Run,
        Err(holder) if holder == me => Turn::Run,
        Err(_) => {
            unsafe { save_stack_pointer(tcb) };
            Turn::Wait
        }
    }
}

/// Where the task stopped, for stack accounting
unsafe fn save_stack_pointer(tcb: *mut OsTcb) {
    if !HOST_SP.get().is_null() {
        unsafe { (*tcb).stk_ptr = stack_pointer() };
    }
}

/// Give the token back if `me` holds it
///
/// Caller holds the raw critical section.
unsafe fn release_cpu(me: *mut HostThread) {
    let released = CPU_HOLDER
        .compare_exchange(me, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
        .is_ok();
    if released {
        unsafe { wake_current() };
    }
}

/// Caller holds the raw critical section
unsafe fn wake_current() {
    let cur = unsafe { kernel::cpu_state() }.tcb_cur;
    if cur.is_null() {
        return;
    }
    if let Some(ctx) = unsafe { &(*cur).ctx.0 } {
        ctx.wake();
    }
}

/// Park until the calling thread is current and holds the token
///
/// The preemption signal must be blocked.
fn wait_until_current() {
    loop {
        match critical_section::with(|_| turn()) {
            Turn::Run => return,
            Turn::Wait => thread::park(),
            Turn::Exit => exit_task(),
        }
    }
}

/// Leave a deleted task for good
///
/// A task running on its own stack drops it without unwinding. An adopted
/// thread unwinds.
fn exit_task() -> ! {
    if HOST_SP.get().is_null() {
        unmask_preempt();
        panic::resume_unwind(Box::new(TaskExit));
    }
    leave_task_stack()
}

/// Switch back to the OS stack the task stack was entered from
fn leave_task_stack() -> ! {
    let mut abandoned = ptr::null_mut();
    // SAFETY: HOST_SP was saved by the switch in `task_main`, whose frame is
    // still alive
    unsafe {
        os_ctx_switch(&mut abandoned, HOST_SP.get());
        // nothing switches back to `abandoned`
        core::hint::unreachable_unchecked()
    }
}

// ============ Preemption signal ============

fn preempt_mask(how: libc::c_int) {
    unsafe {
        let mut set: libc::sigset_t = core::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, SIG_PREEMPT);
        libc::pthread_sigmask(how, &set, ptr::null_mut());
    }
}

#[inline]
fn mask_preempt() {
    preempt_mask(libc::SIG_BLOCK);
}

#[inline]
fn unmask_preempt() {
    preempt_mask(libc::SIG_UNBLOCK);
}

#[cfg(target_os = "linux")]
unsafe fn errno_location() -> *mut libc::c_int {
    unsafe { libc::__errno_location() }
}

#[cfg(target_os = "macos")]
unsafe fn errno_location() -> *mut libc::c_int {
    unsafe { libc::__error() }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
compile_error!("the hosted port runs on Linux and macOS");

/// Suspend the interrupted task until it is current and holds the token
extern "C" fn on_preempt(_signal: libc::c_int) {
    if IN_PREEMPT.get() || CURRENT.get().is_null() {
        return;
    }
    IN_PREEMPT.set(true);
    let errno = unsafe { *errno_location() };

    let mut waiting: libc::sigset_t = unsafe { core::mem::zeroed() };
    unsafe {
        libc::pthread_sigmask(libc::SIG_BLOCK, ptr::null(), &mut waiting);
        libc::sigdelset(&mut waiting, SIG_PREEMPT);
    }

    loop {
        match critical_section::with(|_| turn()) {
            Turn::Run => break,
            Turn::Wait => unsafe {
                libc::sigsuspend(&waiting);
            },
            Turn::Exit if !HOST_SP.get().is_null() => leave_task_stack(),
            // no unwinding out of a signal handler: never run again
            Turn::Exit => halt(),
        }
    }

    unsafe { *errno_location() = errno };
    IN_PREEMPT.set(false);
}

fn halt() -> ! {
    let mut all: libc::sigset_t = unsafe { core::mem::zeroed() };
    unsafe { libc::sigfillset(&mut all) };
    loop {
        unsafe { libc::sigsuspend(&all) };
    }
}

fn install_preempt_handler() -> io::Result<()> {
    unsafe {
        let mut action: libc::sigaction = core::mem::zeroed();
        action.sa_sigaction = on_preempt as extern "C" fn(libc::c_int) as libc::sighandler_t;
        action.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);

        if libc::sigaction(SIG_PREEMPT, &action, ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

// ============ Critical section ============

/// Enter a critical section, first waiting to be the current task
///
/// The preemption signal stays blocked until the outermost release.
pub unsafe fn os_cs_acquire() -> critical_section::RestoreState {
    let outermost = CS_NESTING.get() == 0 && !IN_ISR.get();
    if outermost {
        mask_preempt();
    }

    let restore = loop {
        let restore = unsafe { critical_section::acquire() };
        if !outermost {
            break restore;
        }

        match turn() {
            Turn::Run => break restore,
            Turn::Wait => {
                unsafe { critical_section::release(restore) };
                thread::park();
            }
            Turn::Exit => {
                unsafe { critical_section::release(restore) };
                exit_task();
            }
        }
    };

    CS_NESTING.set(CS_NESTING.get() + 1);
    restore
}

/// Leave a critical section, taking a pended context switch
pub unsafe fn os_cs_release(restore: critical_section::RestoreState) {
    let nesting = CS_NESTING.get().saturating_sub(1);
    CS_NESTING.set(nesting);

    if nesting == 0 && PENDSV.swap(false, Ordering::AcqRel) {
        unsafe { switch() };
    }

    unsafe { critical_section::release(restore) };

    if nesting == 0 && !IN_ISR.get() {
        wait_until_current();
        unmask_preempt();
    }
}

/// Make the head of the most urgent ready list current
///
/// The token holder is told to stop and the new current thread is woken.
unsafe fn switch() {
    let sched = unsafe { SCHED.get_unchecked() };
    let prio = sched.prio_tbl.get_highest();
    let Some(next) = sched.rdy_list[prio as usize].head() else {
        return;
    };

    let cpu = unsafe { kernel::cpu_state() };
    cpu.tcb_high_rdy = next.as_ptr();
    cpu.prio_high_rdy = prio;
    if cpu.tcb_cur == next.as_ptr() {
        return;
    }
    cpu.tcb_cur = next.as_ptr();
    cpu.prio_cur = prio;

    let holder = CPU_HOLDER.load(Ordering::Acquire);
    if !holder.is_null() && !ptr::eq(holder, CURRENT.get()) {
        // SAFETY: the holder keeps its HostThread alive until it releases
        unsafe { (*holder).kick() };
    }
    unsafe { wake_current() };
}

/// Request a context switch from task level
#[inline]
pub fn os_ctx_sw() {
    PENDSV.store(true, Ordering::Release);
}

/// Request a context switch from interrupt level
#[inline]
pub fn os_int_ctx_sw() {
    PENDSV.store(true, Ordering::Release);
}

/// Whether the caller is the tick thread
#[inline]
pub fn os_in_isr() -> bool {
    IN_ISR.get()
}

// ============ Boot and tick ============

fn boot() {
    BOOT.call_once(|| {
        if let Err(err) = kernel::os_init().and_then(|()| kernel::os_start()) {
            crate::error!("kernel boot failed: {:?}", err);
        }
    });
}

fn tick_main(epoch: Instant) {
    IN_ISR.set(true);
    mask_preempt();

    let period = Duration::from_micros(US_PER_TICK);
    let mut next = Instant::now();
    loop {
        next += period;
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else {
            // late: skip the missed ticks rather than firing them in a burst
            next = now;
        }

        crate::critical::critical_section(|_cs| {
            LAST_TICK_US.store(epoch.elapsed().as_micros() as u64, Ordering::Relaxed);
            crate::time::os_tick_handler();
        });
    }
}

/// Install the preemption signal and start the tick thread
pub unsafe fn os_start_high_rdy() {
    let epoch = *EPOCH.get_or_init(Instant::now);

    if let Err(err) = install_preempt_handler() {
        crate::error!("preemption signal unavailable: {}", err);
    }

    let spawned = thread::Builder::new()
        .name("os-tick".into())
        .spawn(move || tick_main(epoch));
    if let Err(err) = spawned {
        crate::error!("tick thread failed to start: {}", err);
    }
}

/// Microseconds since boot
///
/// Whole ticks come from the kernel tick counter and the fraction from the
/// time since the last tick, capped below one tick. Delays are measured in
/// the same ticks.
pub fn os_time_us() -> u64 {
    let Some(epoch) = EPOCH.get() else {
        return 0;
    };

    crate::critical::critical_section(|_cs| {
        let ticks = kernel::KERNEL.tick_get();
        let now = epoch.elapsed().as_micros() as u64;
        let into_tick = now.saturating_sub(LAST_TICK_US.load(Ordering::Relaxed));
        ticks * US_PER_TICK + into_tick.min(US_PER_TICK - 1)
    })
}

/// Idle task body; the idle task never gets a host thread
#[inline]
pub fn os_cpu_idle() {
    thread::yield_now();
}

// ============ Tasks ============

/// The calling task, adopting the calling thread if it is not one yet
pub fn os_task_self() -> OsResult<NonNull<OsTcb>> {
    boot();

    if IN_ISR.get() {
        return Err(OsError::TaskNotExist);
    }

    let ctx = CURRENT.get();
    if ctx.is_null() {
        return adopt();
    }

    let ctx = unsafe { &*ctx };
    match ctx.state.load(Ordering::Acquire) {
        RUNNING => Ok(ctx.tcb),
        KILLED if !thread::panicking() => exit_task(),
        _ => Err(OsError::TaskNotExist),
    }
}

fn adopt() -> OsResult<NonNull<OsTcb>> {
    // a thread already tearing down its locals could never be retired
    if ADOPTED.try_with(|_| ()).is_err() {
        return Err(OsError::TaskNotExist);
    }

    let tcb = NonNull::from(Box::leak(Box::new(OsTcb::new())));
    let ctx = Arc::new(HostThread::new(tcb));
    ctx.bind();

    let registered = ADOPTED.try_with(|adopted| *adopted.borrow_mut() = Some(Adopted(ctx.clone())));
    if registered.is_err() {
        task::os_task_detach(tcb);
        // SAFETY: leaked above and linked nowhere
        drop(unsafe { Box::from_raw(tcb.as_ptr()) });
        return Err(OsError::TaskNotExist);
    }

    CURRENT.set(Arc::as_ptr(&ctx));
    // returns once the thread is the current task
    unsafe { task::os_task_adopt(tcb, Priority::NORMAL.to_os(), OsTaskCtx(Some(ctx))) };
    Ok(tcb)
}

/// OS thread of a started task: waits for its first turn, then runs the
/// task on its stack buffer
fn task_main(ctx: Arc<HostThread>) {
    mask_preempt();
    ctx.bind();
    CURRENT.set(Arc::as_ptr(&ctx));

    let first = loop {
        match critical_section::with(|_| turn()) {
            Turn::Run => break true,
            Turn::Wait => thread::park(),
            Turn::Exit => break false,
        }
    };

    if first {
        let sp = critical_section::with(|_| unsafe { ctx.tcb.as_ref() }.stk_ptr);
        // SAFETY: `sp` is the frame built by `os_task_stk_init`; the task
        // comes back through `leave_task_stack`
        HOST_SP.with(|host| unsafe { os_ctx_switch(host.as_ptr(), sp) });
    }

    CURRENT.set(ptr::null());
    ctx.state.store(GONE, Ordering::Release);
}

/// First code a task runs on its stack buffer
extern "C" fn os_task_entry(tcb: *mut OsTcb) -> ! {
    unmask_preempt();

    if let Some(tcb) = NonNull::new(tcb) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| task::os_task_run(tcb)));
        if result.is_err() {
            crate::error!("task {:?} panicked", unsafe { tcb.as_ref() }.name);
            if panic::catch_unwind(task::os_task_exit).is_err() {
                crate::error!("task exit failed after a panic");
            }
        }
    }

    leave_task_stack()
}

/// Build the frame the task's thread enters its stack buffer with
pub unsafe fn os_task_stk_init(
    tcb: NonNull<OsTcb>,
    stk_base: *mut u8,
    stk_size: usize,
) -> *mut OsStkElement {
    unsafe { os_task_frame_init(tcb.as_ptr(), stk_base, stk_size) }
}

/// Start the OS thread that runs the task once it is scheduled
pub unsafe fn os_task_spawn(tcb: NonNull<OsTcb>) -> OsResult<()> {
    let ctx = Arc::new(HostThread::new(tcb));
    let name = crate::critical::critical_section(|_cs| unsafe { tcb.as_ref() }.name);

    let worker = ctx.clone();
    thread::Builder::new()
        .name(name.unwrap_or("task").into())
        .stack_size(HOST_STK_SIZE)
        .spawn(move || task_main(worker))
        .map_err(|err| {
            crate::error!("no OS thread for task {:?}: {}", name, err);
            OsError::TaskNoMoreTcb
        })?;

    crate::critical::critical_section(|_cs| unsafe { (*tcb.as_ptr()).ctx = OsTaskCtx(Some(ctx)) });
    Ok(())
}

/// Wait until a deleted task's thread is off its stack buffer
pub fn os_task_reap(tcb: NonNull<OsTcb>) {
    let ctx = crate::critical::critical_section(|_cs| unsafe { tcb.as_ref() }.ctx.0.clone());
    let Some(ctx) = ctx else {
        return;
    };
    if ctx.is_caller() {
        return;
    }

    while ctx.state.load(Ordering::Acquire) != GONE {
        thread::yield_now();
    }
}

/// Make a deleted task's thread wind down
///
/// A thread waiting for the CPU wakes up and leaves; it never runs task
/// code again.
pub unsafe fn os_task_kill(tcb: NonNull<OsTcb>) {
    if let Some(ctx) = unsafe { &tcb.as_ref().ctx.0 } {
        ctx.state.store(KILLED, Ordering::Release);
        ctx.wake();
    }
}

/// Leave the calling task for good
pub fn os_task_abandon() -> ! {
    exit_task()
}
