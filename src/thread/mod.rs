//! Threads
//!
//! [`Thread`] is the owning handle of a kernel task: it holds the TCB and
//! the stack, starts the task, and joins or terminates it. Priorities use
//! CMSIS numbering (bigger is more urgent) and are converted to the
//! kernel's inverted [`OsPrio`] at this boundary.

pub mod this_thread;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ptr::NonNull;

use crate::config::{CFG_PRIO_IDLE, CFG_STK_FILL, CFG_STK_SIZE_DEFAULT};
use crate::critical::critical_section;
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::port;
use crate::task::{self, OsTcb};
use crate::types::{OsFlags, OsPendOn, OsPrio, OsTaskState};

pub use crate::task::StackInfo;

// ============ Priority ============

/// Thread priority, CMSIS style: higher values are more urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Priority(i8);

impl Priority {
    pub const IDLE: Priority = Priority(1);
    pub const LOW: Priority = Priority(8);
    pub const BELOW_NORMAL: Priority = Priority(16);
    pub const NORMAL: Priority = Priority(24);
    pub const ABOVE_NORMAL: Priority = Priority(32);
    pub const HIGH: Priority = Priority(40);
    pub const REALTIME: Priority = Priority(48);

    /// Most urgent priority a thread may use
    pub const MAX: Priority = Priority(55);

    /// Validate a raw CMSIS priority (`1..=55`)
    pub const fn new(value: i8) -> OsResult<Self> {
        if value < Self::IDLE.0 || value > Self::MAX.0 {
            return Err(OsError::PrioInvalid);
        }
        Ok(Priority(value))
    }

    #[inline]
    pub const fn get(self) -> i8 {
        self.0
    }

    #[inline]
    pub(crate) const fn to_os(self) -> OsPrio {
        CFG_PRIO_IDLE - self.0 as u8
    }

    #[inline]
    pub(crate) const fn from_os(prio: OsPrio) -> Self {
        Priority(CFG_PRIO_IDLE.saturating_sub(prio) as i8)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl TryFrom<i8> for Priority {
    type Error = OsError;

    fn try_from(value: i8) -> OsResult<Self> {
        Self::new(value)
    }
}

// ============ State ============

/// Observable state of a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ThreadState {
    /// Not started, returned, or terminated
    Deleted,
    Ready,
    Running,
    WaitingDelay,
    WaitingJoin,
    WaitingThreadFlag,
    WaitingEventFlag,
    WaitingMutex,
    WaitingSemaphore,
    WaitingMessageGet,
    WaitingMessagePut,
}

impl ThreadState {
    pub(crate) fn from_kernel(state: OsTaskState, pend_on: OsPendOn, current: bool) -> Self {
        match state {
            OsTaskState::Deleted => ThreadState::Deleted,
            OsTaskState::Ready if current => ThreadState::Running,
            OsTaskState::Ready => ThreadState::Ready,
            OsTaskState::Delayed => ThreadState::WaitingDelay,
            OsTaskState::Pend | OsTaskState::PendTimeout => match pend_on {
                OsPendOn::TaskFlag => ThreadState::WaitingThreadFlag,
                OsPendOn::Flag => ThreadState::WaitingEventFlag,
                OsPendOn::Mutex => ThreadState::WaitingMutex,
                OsPendOn::Semaphore => ThreadState::WaitingSemaphore,
                OsPendOn::QueueGet => ThreadState::WaitingMessageGet,
                OsPendOn::QueuePut => ThreadState::WaitingMessagePut,
                OsPendOn::Join => ThreadState::WaitingJoin,
                OsPendOn::Nothing => ThreadState::Ready,
            },
        }
    }
}

/// Identity of a task, stable for the lifetime of its handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(usize);

impl ThreadId {
    pub(crate) fn from_tcb(tcb: NonNull<OsTcb>) -> Self {
        ThreadId(tcb.as_ptr() as usize)
    }
}

// ============ Stack ============

/// Stack memory of a thread
enum Stack<'a> {
    /// Allocated at start, released at join
    KernelOwned(Vec<u8>),
    /// Supplied by the caller, borrowed for the handle's lifetime
    Borrowed(&'a mut [u8]),
}

// ============ Thread ============

/// Owning handle of a kernel task
///
/// A thread is created `Deleted`, runs once after [`start`](Thread::start),
/// and is `Deleted` again when its body returns or it is terminated.
/// Dropping a running thread terminates it.
pub struct Thread<'a> {
    tcb: NonNull<OsTcb>,
    stack: Stack<'a>,
    stack_size: usize,
    started: bool,
    /// Stack usage and overflow state taken when the stack was released
    last_stack: Option<(StackInfo, bool)>,
}

// SAFETY: the TCB is only touched inside critical sections
unsafe impl Send for Thread<'_> {}
unsafe impl Sync for Thread<'_> {}

impl<'a> Thread<'a> {
    fn build(priority: Priority, stack: Stack<'a>, stack_size: usize, name: Option<&'static str>) -> Self {
        let mut tcb = Box::new(OsTcb::new());
        tcb.name = name;
        tcb.prio = priority.to_os();
        tcb.base_prio = priority.to_os();

        Thread {
            // SAFETY: Box::into_raw never returns null
            tcb: unsafe { NonNull::new_unchecked(Box::into_raw(tcb)) },
            stack,
            stack_size,
            started: false,
            last_stack: None,
        }
    }

    /// Thread with a default-sized kernel-owned stack
    pub fn new(priority: Priority) -> Self {
        Self::with_stack_size(priority, CFG_STK_SIZE_DEFAULT)
    }

    /// Thread with a kernel-owned stack of `stack_size` bytes
    pub fn with_stack_size(priority: Priority, stack_size: usize) -> Self {
        Self::build(priority, Stack::KernelOwned(Vec::new()), stack_size, None)
    }

    /// Named thread with a kernel-owned stack of `stack_size` bytes
    pub fn with_name(priority: Priority, stack_size: usize, name: &'static str) -> Self {
        Self::build(priority, Stack::KernelOwned(Vec::new()), stack_size, Some(name))
    }

    /// Thread running on caller-supplied stack memory
    pub fn with_stack(priority: Priority, stack: &'a mut [u8], name: Option<&'static str>) -> Self {
        let stack_size = stack.len();
        Self::build(priority, Stack::Borrowed(stack), stack_size, name)
    }

    /// Start running `f` on this thread
    ///
    /// # Returns
    /// * `Ok(())` - The task is ready (it already ran if more urgent than the caller)
    /// * `Err(OsError::TaskRunning)` - Already started
    /// * `Err(OsError::StkSizeInvalid)` - Stack smaller than `CFG_STK_SIZE_MIN`
    /// * `Err(OsError::StkAllocFail)` - No memory for the stack
    pub fn start<F>(&mut self, f: F) -> OsResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.started {
            return Err(OsError::TaskRunning);
        }

        let size = self.stack_size;
        if size < crate::config::CFG_STK_SIZE_MIN {
            return Err(OsError::StkSizeInvalid);
        }

        let base = match &mut self.stack {
            Stack::KernelOwned(buf) => {
                if buf.len() != size {
                    buf.try_reserve_exact(size).map_err(|_| OsError::StkAllocFail)?;
                    buf.resize(size, CFG_STK_FILL);
                }
                buf.as_mut_ptr()
            }
            Stack::Borrowed(buf) => buf.as_mut_ptr(),
        };

        unsafe { task::os_task_create(self.tcb, base, size, Box::new(f)) }?;
        self.started = true;
        Ok(())
    }

    /// Wait for the thread to finish, then release its stack
    ///
    /// Returns at once for a thread that never started or was already
    /// joined.
    pub fn join(&mut self) -> OsResult<()> {
        if !self.started || self.last_stack.is_some() {
            return Ok(());
        }

        task::os_task_join(self.tcb)?;
        self.release();
        Ok(())
    }

    /// Keep the final stack figures, then free what the task ran on
    fn release(&mut self) {
        port::os_task_reap(self.tcb);

        let snapshot = critical_section(|_cs| unsafe {
            let tcb = self.tcb.as_ref();
            (task::os_task_stk_chk(tcb), task::os_task_stk_ovf(tcb))
        });
        self.last_stack = Some(snapshot);

        if let Stack::KernelOwned(buf) = &mut self.stack {
            *buf = Vec::new();
        }
        critical_section(|_cs| unsafe {
            let tcb = &mut *self.tcb.as_ptr();
            tcb.stk_base = core::ptr::null_mut();
            tcb.stk_ptr = core::ptr::null_mut();
        });
    }

    /// Stop the thread
    ///
    /// Wakes its joiners and hands any mutex it holds to the next waiter.
    /// Terminating the calling thread does not return. The stack is released
    /// by [`join`](Thread::join) or drop.
    pub fn terminate(&self) -> OsResult<()> {
        if !self.started {
            return Ok(());
        }
        task::os_task_del(self.tcb)
    }

    pub fn get_state(&self) -> ThreadState {
        critical_section(|_cs| unsafe {
            let tcb = self.tcb.as_ref();
            ThreadState::from_kernel(tcb.task_state, tcb.pend_on, kernel::is_tcb_cur(self.tcb))
        })
    }

    /// Base priority (without inheritance)
    pub fn get_priority(&self) -> Priority {
        Priority::from_os(critical_section(|_cs| unsafe { self.tcb.as_ref() }.base_prio))
    }

    /// Change the base priority, even while the thread is blocked
    pub fn set_priority(&self, priority: Priority) -> OsResult<()> {
        task::os_task_change_prio(self.tcb, priority.to_os())
    }

    /// Stack size in bytes, constant for the lifetime of the thread
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    pub fn free_stack(&self) -> usize {
        self.stack_info().free
    }

    pub fn used_stack(&self) -> usize {
        self.stack_info().used
    }

    pub fn max_stack(&self) -> usize {
        self.stack_info().max
    }

    /// All stack figures from one observation
    pub fn stack_info(&self) -> StackInfo {
        if let Some((info, _)) = self.last_stack {
            return info;
        }

        if !self.started {
            return StackInfo {
                size: self.stack_size,
                free: self.stack_size,
                used: 0,
                max: 0,
            };
        }

        critical_section(|_cs| unsafe { task::os_task_stk_chk(self.tcb.as_ref()) })
    }

    /// `Err(OsError::StkOvf)` once the bottom of the stack was overwritten
    pub fn stack_check(&self) -> OsResult<()> {
        let overflowed = match self.last_stack {
            Some((_, overflowed)) => overflowed,
            None if !self.started => false,
            None => critical_section(|_cs| unsafe { task::os_task_stk_ovf(self.tcb.as_ref()) }),
        };

        if overflowed {
            Err(OsError::StkOvf)
        } else {
            Ok(())
        }
    }

    pub fn get_name(&self) -> Option<&'static str> {
        critical_section(|_cs| unsafe { self.tcb.as_ref() }.name)
    }

    pub fn get_id(&self) -> ThreadId {
        ThreadId::from_tcb(self.tcb)
    }

    /// Set thread flags, returning the flags after setting
    ///
    /// Valid from ISR context.
    pub fn flags_set(&self, mask: OsFlags) -> OsResult<OsFlags> {
        task::os_task_flags_set(self.tcb, mask)
    }
}

impl Drop for Thread<'_> {
    fn drop(&mut self) {
        if self.started && self.last_stack.is_none() {
            if let Err(err) = task::os_task_del(self.tcb) {
                crate::error!("dropping thread {:?}: {:?}", self.get_name(), err);
            }
            self.release();
        }

        // SAFETY: retired above (or never started), nothing links to it
        drop(unsafe { Box::from_raw(self.tcb.as_ptr()) });
    }
}

impl core::fmt::Debug for Thread<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread")
            .field("name", &self.get_name())
            .field("state", &self.get_state())
            .field("priority", &self.get_priority())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_maps_onto_kernel_levels() {
        assert_eq!(Priority::NORMAL.to_os(), 39);
        assert_eq!(Priority::MAX.to_os(), 8);
        assert_eq!(Priority::IDLE.to_os(), 62);
        assert_eq!(Priority::from_os(Priority::HIGH.to_os()), Priority::HIGH);
        assert!(Priority::REALTIME > Priority::HIGH);
        assert!(Priority::REALTIME.to_os() < Priority::HIGH.to_os());

        assert_eq!(Priority::new(0), Err(OsError::PrioInvalid));
        assert_eq!(Priority::new(56), Err(OsError::PrioInvalid));
        assert_eq!(Priority::try_from(25), Ok(Priority(25)));
    }

    #[test]
    fn kernel_state_mapping() {
        use OsPendOn::*;
        use OsTaskState::*;

        assert_eq!(ThreadState::from_kernel(Deleted, Nothing, false), ThreadState::Deleted);
        assert_eq!(ThreadState::from_kernel(Ready, Nothing, true), ThreadState::Running);
        assert_eq!(ThreadState::from_kernel(Ready, Nothing, false), ThreadState::Ready);
        assert_eq!(ThreadState::from_kernel(Delayed, Nothing, false), ThreadState::WaitingDelay);

        let waits = [
            (TaskFlag, ThreadState::WaitingThreadFlag),
            (Flag, ThreadState::WaitingEventFlag),
            (Mutex, ThreadState::WaitingMutex),
            (Semaphore, ThreadState::WaitingSemaphore),
            (QueueGet, ThreadState::WaitingMessageGet),
            (QueuePut, ThreadState::WaitingMessagePut),
            (Join, ThreadState::WaitingJoin),
        ];
        for (pend_on, expected) in waits {
            assert_eq!(ThreadState::from_kernel(Pend, pend_on, false), expected);
            assert_eq!(ThreadState::from_kernel(PendTimeout, pend_on, false), expected);
        }
    }

    #[test]
    fn unstarted_thread_reports_whole_stack_free() {
        let thread = Thread::with_name(Priority::LOW, 1024, "idle-handle");
        assert_eq!(thread.get_state(), ThreadState::Deleted);
        assert_eq!(thread.get_name(), Some("idle-handle"));
        assert_eq!(thread.get_priority(), Priority::LOW);

        let info = thread.stack_info();
        assert_eq!(info.size, 1024);
        assert_eq!(info.free + info.used, info.size);
        assert_eq!(thread.stack_check(), Ok(()));
    }
}
