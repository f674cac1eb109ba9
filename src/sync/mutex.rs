//! Mutex implementation with priority inheritance
//!
//! Mutexes provide mutual exclusion with automatic priority boosting
//! to prevent priority inversion. Every owned mutex is linked into its
//! owner's TCB, so the owner's effective priority can be recomputed as the
//! most urgent of its base priority and the heads of the wait lists of the
//! mutexes it holds.

use alloc::boxed::Box;
use core::ptr::NonNull;

use crate::core::cs_cell::CsCell;
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched::{self, PendList};
use crate::task::OsTcb;
use crate::thread::ThreadId;
use crate::types::{opt, OsNestingCtr, OsOpt, OsPendOn, OsPendStatus, OsTick};

use super::os_pend_opts;

/// Mutex kernel object
pub struct OsMutex {
    /// List of tasks waiting on this mutex
    pend_list: PendList,
    /// Task that owns the mutex
    owner: Option<NonNull<OsTcb>>,
    /// Nesting counter
    nesting_ctr: OsNestingCtr,
    /// Next mutex held by the same owner
    owner_next: Option<NonNull<OsMutex>>,
}

unsafe impl Send for OsMutex {}

impl OsMutex {
    const fn new() -> Self {
        OsMutex {
            pend_list: PendList::new(),
            owner: None,
            nesting_ctr: 0,
            owner_next: None,
        }
    }
}

// ============ Owner bookkeeping ============

unsafe fn os_mutex_grp_add(tcb: NonNull<OsTcb>, mutex: NonNull<OsMutex>) {
    unsafe {
        (*mutex.as_ptr()).owner_next = (*tcb.as_ptr()).mutex_grp_head;
        (*tcb.as_ptr()).mutex_grp_head = Some(mutex);
    }
}

unsafe fn os_mutex_grp_remove(tcb: NonNull<OsTcb>, mutex: NonNull<OsMutex>) {
    unsafe {
        let mut link = core::ptr::addr_of_mut!((*tcb.as_ptr()).mutex_grp_head);
        while let Some(cur) = *link {
            if cur == mutex {
                *link = (*cur.as_ptr()).owner_next.take();
                return;
            }
            link = core::ptr::addr_of_mut!((*cur.as_ptr()).owner_next);
        }
    }
}

/// Re-derive a task's effective priority from its base priority and the
/// waiters of every mutex it holds
pub(crate) unsafe fn os_mutex_prio_recompute(tcb: NonNull<OsTcb>) {
    unsafe {
        let mut prio = (*tcb.as_ptr()).base_prio;
        let mut next = (*tcb.as_ptr()).mutex_grp_head;

        while let Some(mutex) = next {
            if let Some(waiter) = (*mutex.as_ptr()).pend_list.head() {
                prio = prio.min(waiter.as_ref().prio);
            }
            next = (*mutex.as_ptr()).owner_next;
        }

        sched::os_task_prio_set(tcb, prio);
    }
}

/// The wait list of `mutex` changed: re-evaluate its owner
pub(crate) unsafe fn os_mutex_prio_inherit(mutex: *mut OsMutex) {
    let Some(mutex) = NonNull::new(mutex) else {
        return;
    };

    unsafe {
        if let Some(owner) = (*mutex.as_ptr()).owner {
            os_mutex_prio_recompute(owner);
        }
    }
}

/// Release `mutex` from its owner and give it to the most urgent waiter
unsafe fn os_mutex_hand_off(mutex: NonNull<OsMutex>) {
    let m = mutex.as_ptr();

    unsafe {
        (*m).nesting_ctr = 0;
        if let Some(owner) = (*m).owner.take() {
            os_mutex_grp_remove(owner, mutex);
            os_mutex_prio_recompute(owner);
        }

        if let Some(waiter) = (*m).pend_list.head() {
            sched::os_pend_ready(waiter, OsPendStatus::Ok);
            (*m).owner = Some(waiter);
            (*m).nesting_ctr = 1;
            os_mutex_grp_add(waiter, mutex);
            os_mutex_prio_recompute(waiter);
        }
    }
}

/// Hand every mutex `tcb` holds to its next waiter (task retire)
pub(crate) unsafe fn os_mutex_release_all(tcb: NonNull<OsTcb>) {
    unsafe {
        while let Some(mutex) = (*tcb.as_ptr()).mutex_grp_head {
            os_mutex_hand_off(mutex);
        }
    }
}

// ============ Safe Wrapper ============

/// Recursive mutex with priority inheritance
///
/// The kernel object lives on the heap so its address stays stable while it
/// is linked into an owner or waited on.
pub struct Mutex {
    inner: Box<CsCell<OsMutex>>,
}

impl Mutex {
    /// Create an unowned mutex
    pub fn new() -> Self {
        Mutex {
            inner: Box::new(CsCell::new(OsMutex::new())),
        }
    }

    #[inline(always)]
    fn obj(&self) -> NonNull<OsMutex> {
        // SAFETY: pointer into a live box
        unsafe { NonNull::new_unchecked(self.inner.as_ptr()) }
    }

    /// Acquire the mutex
    ///
    /// If the mutex is owned by a lower-priority task, the owner's priority
    /// is temporarily boosted to prevent priority inversion.
    ///
    /// # Arguments
    /// * `timeout` - Maximum ticks to wait (0 = forever)
    /// * `pend_opt` - Pend options
    fn pend(&self, timeout: OsTick, pend_opt: OsOpt) -> OsResult<()> {
        let cur = sched::os_pend_precheck()?;
        let mutex = self.obj();
        let m = mutex.as_ptr();

        let pended = critical_section(|_cs| unsafe {
            match (*m).owner {
                None => {
                    (*m).owner = Some(cur);
                    (*m).nesting_ctr = 1;
                    os_mutex_grp_add(cur, mutex);
                    Ok(false)
                }
                Some(owner) if owner == cur => {
                    if (*m).nesting_ctr == OsNestingCtr::MAX {
                        return Err(OsError::MutexOvf);
                    }
                    (*m).nesting_ctr += 1;
                    Ok(false)
                }
                Some(owner) => {
                    if pend_opt & opt::PEND_NON_BLOCKING != 0 {
                        return Err(OsError::PendWouldBlock);
                    }

                    if kernel::KERNEL.sched_lock_nesting() > 0 {
                        return Err(OsError::SchedLocked);
                    }

                    let list = NonNull::new_unchecked(core::ptr::addr_of_mut!((*m).pend_list));
                    sched::os_pend(cur, Some(list), OsPendOn::Mutex, m as *const (), timeout);
                    os_mutex_prio_recompute(owner);
                    sched::os_sched();
                    Ok(true)
                }
            }
        })?;

        // Ownership was handed over by the releasing task
        if pended {
            sched::os_pend_result(cur)
        } else {
            Ok(())
        }
    }

    /// Acquire the mutex, waiting as long as it takes
    pub fn lock(&self) -> OsResult<()> {
        self.pend(0, opt::PEND_BLOCKING)
    }

    /// Acquire the mutex only if it is free or already held by the caller
    pub fn trylock(&self) -> OsResult<()> {
        self.pend(0, opt::PEND_NON_BLOCKING)
    }

    /// Acquire the mutex, waiting at most `ms` milliseconds
    pub fn trylock_for(&self, ms: u32) -> OsResult<()> {
        let (timeout, pend_opt) = os_pend_opts(ms);
        self.pend(timeout, pend_opt)
    }

    /// Release the mutex
    ///
    /// The last release of a recursive lock hands the mutex to the most
    /// urgent waiter and drops any priority the caller inherited through it.
    pub fn unlock(&self) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::MutexNotOwner);
        }

        let cur = kernel::os_tcb_self()?;
        let mutex = self.obj();
        let m = mutex.as_ptr();

        critical_section(|_cs| unsafe {
            if (*m).owner != Some(cur) {
                return Err(OsError::MutexNotOwner);
            }

            if (*m).nesting_ctr > 1 {
                (*m).nesting_ctr -= 1;
                return Ok(());
            }

            os_mutex_hand_off(mutex);
            sched::os_sched();
            Ok(())
        })
    }

    /// Lock and return a guard that unlocks when dropped
    pub fn lock_guard(&self) -> OsResult<LockGuard<'_>> {
        self.lock()?;
        Ok(LockGuard { mutex: self })
    }

    /// Task holding the mutex
    pub fn get_owner(&self) -> Option<ThreadId> {
        critical_section(|cs| self.inner.get(cs).owner.map(ThreadId::from_tcb))
    }

    /// Check if mutex is owned
    pub fn is_owned(&self) -> bool {
        critical_section(|cs| self.inner.get(cs).owner.is_some())
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Mutex {
    fn drop(&mut self) {
        let mutex = self.obj();
        critical_section(|_cs| unsafe {
            if let Some(owner) = (*mutex.as_ptr()).owner.take() {
                os_mutex_grp_remove(owner, mutex);
                os_mutex_prio_recompute(owner);
            }
        });
    }
}

impl core::fmt::Debug for Mutex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mutex").field("owner", &self.get_owner()).finish()
    }
}

/// Scoped lock on a [`Mutex`]
///
/// Unlocks on drop, including while unwinding.
#[must_use = "the mutex unlocks as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    mutex: &'a Mutex,
}

impl<'a> LockGuard<'a> {
    /// Lock `mutex` for the lifetime of the guard
    pub fn new(mutex: &'a Mutex) -> OsResult<Self> {
        mutex.lock_guard()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        // Fails only when the holder was terminated, which already released it
        if let Err(err) = self.mutex.unlock() {
            crate::trace!("lock guard dropped by a non-owner: {:?}", err);
        }
    }
}
