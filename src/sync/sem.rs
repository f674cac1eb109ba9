//! Semaphore implementation
//!
//! Counting semaphores for task synchronization and resource counting.

use core::ptr::NonNull;

use crate::core::cs_cell::CsCell;
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched::{self, PendList};
use crate::types::{opt, OsOpt, OsPendOn, OsPendStatus, OsSemCtr, OsTick};

use super::os_pend_opts;

/// Semaphore state, reachable only inside a critical section
struct OsSem {
    /// List of tasks waiting on this semaphore
    pend_list: PendList,
    /// Current count
    count: OsSemCtr,
    /// Count ceiling for `release`
    max: OsSemCtr,
}

/// Counting semaphore
///
/// `acquire` takes a token, blocking in `WaitingSemaphore` while none is
/// available. `release` hands a token to the most urgent waiter, or adds it
/// to the count.
pub struct Semaphore {
    inner: CsCell<OsSem>,
}

impl Semaphore {
    /// Create a semaphore holding `count` tokens
    pub const fn new(count: OsSemCtr) -> Self {
        Self::with_max(count, OsSemCtr::MAX)
    }

    /// Create a semaphore whose count never exceeds `max`
    pub const fn with_max(count: OsSemCtr, max: OsSemCtr) -> Self {
        Semaphore {
            inner: CsCell::new(OsSem {
                pend_list: PendList::new(),
                count,
                max,
            }),
        }
    }

    /// Wait on (pend) the semaphore
    ///
    /// # Arguments
    /// * `timeout` - Maximum ticks to wait (0 = forever)
    /// * `pend_opt` - Pend options
    ///
    /// # Returns
    /// * `Ok(())` - Semaphore acquired
    /// * `Err(OsError::Timeout)` - Timeout expired
    /// * `Err(OsError::PendWouldBlock)` - Non-blocking and not available
    fn pend(&self, timeout: OsTick, pend_opt: OsOpt) -> OsResult<()> {
        let cur = sched::os_pend_precheck()?;

        let pended = critical_section(|cs| {
            let sem = self.inner.get(cs);
            if sem.count > 0 {
                sem.count -= 1;
                return Ok(false);
            }

            if pend_opt & opt::PEND_NON_BLOCKING != 0 {
                return Err(OsError::PendWouldBlock);
            }

            if kernel::KERNEL.sched_lock_nesting() > 0 {
                return Err(OsError::SchedLocked);
            }

            unsafe {
                sched::os_pend(
                    cur,
                    Some(NonNull::from(&mut sem.pend_list)),
                    OsPendOn::Semaphore,
                    self as *const Self as *const (),
                    timeout,
                );
            }
            sched::os_sched();
            Ok(true)
        })?;

        if pended {
            sched::os_pend_result(cur)
        } else {
            Ok(())
        }
    }

    /// Take a token, waiting as long as it takes
    pub fn acquire(&self) -> OsResult<()> {
        self.pend(0, opt::PEND_BLOCKING)
    }

    /// Take a token if one is available right now
    pub fn try_acquire(&self) -> OsResult<()> {
        self.pend(0, opt::PEND_NON_BLOCKING)
    }

    /// Take a token, waiting at most `ms` milliseconds
    ///
    /// `0` does not block; [`OS_WAIT_FOREVER`](crate::types::OS_WAIT_FOREVER)
    /// waits without a timeout.
    pub fn try_acquire_for(&self, ms: u32) -> OsResult<()> {
        let (timeout, pend_opt) = os_pend_opts(ms);
        self.pend(timeout, pend_opt)
    }

    /// Signal (post) the semaphore
    ///
    /// Valid from ISR context.
    ///
    /// # Returns
    /// * `Ok(())` - A waiter was readied or the count was incremented
    /// * `Err(OsError::SemOvf)` - The count is already at its maximum
    pub fn release(&self) -> OsResult<()> {
        if !is_isr_context() {
            kernel::os_tcb_self()?;
        }

        critical_section(|cs| {
            let sem = self.inner.get(cs);
            match sem.pend_list.head() {
                Some(waiter) => {
                    unsafe { sched::os_pend_ready(waiter, OsPendStatus::Ok) };
                    sched::os_sched();
                }
                None => {
                    if sem.count >= sem.max {
                        return Err(OsError::SemOvf);
                    }
                    sem.count += 1;
                }
            }
            Ok(())
        })
    }

    /// Get current semaphore count
    pub fn count(&self) -> OsSemCtr {
        critical_section(|cs| self.inner.get(cs).count)
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}

impl core::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Semaphore").field("count", &self.count()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_is_capped() {
        let sem = Semaphore::with_max(1, 1);
        assert_eq!(sem.count(), 1);
        assert_eq!(sem.release(), Err(OsError::SemOvf));
        assert_eq!(sem.try_acquire(), Ok(()));
        assert_eq!(sem.try_acquire(), Err(OsError::PendWouldBlock));
        assert_eq!(sem.try_acquire_for(0), Err(OsError::PendWouldBlock));
        assert_eq!(sem.release(), Ok(()));
        assert_eq!(sem.count(), 1);
    }
}
