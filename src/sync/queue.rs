//! Message queues
//!
//! A fixed-capacity FIFO of `N` values. Getters block in
//! `WaitingMessageGet` while it is empty and putters in
//! `WaitingMessagePut` while it is full. When a peer is already waiting the
//! value is handed over directly through the waiter's message slot, which
//! keeps FIFO order across blocking puts and gets.

use core::mem::MaybeUninit;
use core::ptr::NonNull;

use crate::core::cs_cell::CsCell;
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched::{self, PendList};
use crate::task::OsTcb;
use crate::types::{opt, OsOpt, OsPendOn, OsPendStatus, OsTick};

use super::os_pend_opts;

/// A rejected put, carrying the value back to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutError<T> {
    pub value: T,
    pub error: OsError,
}

impl<T> PutError<T> {
    /// Take the value back
    pub fn into_inner(self) -> T {
        self.value
    }
}

struct OsQ<T, const N: usize> {
    get_list: PendList,
    put_list: PendList,
    buf: [MaybeUninit<T>; N],
    head: usize,
    len: usize,
}

unsafe impl<T: Send, const N: usize> Send for OsQ<T, N> {}

impl<T, const N: usize> OsQ<T, N> {
    fn push(&mut self, value: T) {
        let idx = (self.head + self.len) % N;
        self.buf[idx].write(value);
        self.len += 1;
    }

    fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        // SAFETY: slots head..head+len are initialized
        let value = unsafe { self.buf[self.head].assume_init_read() };
        self.head = (self.head + 1) % N;
        self.len -= 1;
        Some(value)
    }
}

/// Bounded FIFO message queue
pub struct Queue<T, const N: usize> {
    inner: CsCell<OsQ<T, N>>,
}

/// Caller of a queue operation, or `None` for a non-blocking ISR call
fn os_q_precheck(pend_opt: OsOpt) -> OsResult<Option<NonNull<OsTcb>>> {
    if is_isr_context() && pend_opt & opt::PEND_NON_BLOCKING != 0 {
        return Ok(None);
    }
    sched::os_pend_precheck().map(Some)
}

impl<T: Send, const N: usize> Queue<T, N> {
    const CAPACITY_OK: () = assert!(N > 0, "queue capacity must be non-zero");

    /// Create an empty queue
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_OK;
        Queue {
            inner: CsCell::new(OsQ {
                get_list: PendList::new(),
                put_list: PendList::new(),
                buf: [const { MaybeUninit::uninit() }; N],
                head: 0,
                len: 0,
            }),
        }
    }

    fn post(&self, value: T, timeout: OsTick, pend_opt: OsOpt) -> Result<(), PutError<T>> {
        let cur = match os_q_precheck(pend_opt) {
            Ok(cur) => cur,
            Err(error) => return Err(PutError { value, error }),
        };

        let mut slot = Some(value);
        let slot_ptr: *mut Option<T> = &mut slot;

        let pended = critical_section(|cs| unsafe {
            let q = self.inner.get(cs);

            if let Some(getter) = q.get_list.head() {
                let dst = getter.as_ref().msg_ptr as *mut Option<T>;
                *dst = (*slot_ptr).take();
                sched::os_pend_ready(getter, OsPendStatus::Ok);
                sched::os_sched();
                return Ok(false);
            }

            if q.len < N {
                if let Some(value) = (*slot_ptr).take() {
                    q.push(value);
                }
                return Ok(false);
            }

            if pend_opt & opt::PEND_NON_BLOCKING != 0 {
                return Err(OsError::QFull);
            }

            if kernel::KERNEL.sched_lock_nesting() > 0 {
                return Err(OsError::SchedLocked);
            }

            let Some(cur) = cur else {
                return Err(OsError::QFull);
            };

            (*cur.as_ptr()).msg_ptr = slot_ptr as *mut ();
            sched::os_pend(
                cur,
                Some(NonNull::from(&mut q.put_list)),
                OsPendOn::QueuePut,
                self as *const Self as *const (),
                timeout,
            );
            sched::os_sched();
            Ok(true)
        });

        let result = match (pended, cur) {
            (Ok(true), Some(cur)) => sched::os_pend_result(cur),
            (Ok(_), _) => Ok(()),
            (Err(error), _) => Err(error),
        };

        match (result, slot) {
            (Err(error), Some(value)) => Err(PutError { value, error }),
            _ => Ok(()),
        }
    }

    fn pend(&self, timeout: OsTick, pend_opt: OsOpt) -> OsResult<T> {
        let cur = os_q_precheck(pend_opt)?;

        let mut slot: Option<T> = None;
        let slot_ptr: *mut Option<T> = &mut slot;

        let ready = critical_section(|cs| unsafe {
            let q = self.inner.get(cs);

            if let Some(value) = q.pop() {
                // A slot opened up: take the most urgent putter's value
                if let Some(putter) = q.put_list.head() {
                    let src = putter.as_ref().msg_ptr as *mut Option<T>;
                    if let Some(next) = (*src).take() {
                        q.push(next);
                    }
                    sched::os_pend_ready(putter, OsPendStatus::Ok);
                    sched::os_sched();
                }
                return Ok(Some(value));
            }

            if pend_opt & opt::PEND_NON_BLOCKING != 0 {
                return Err(OsError::QEmpty);
            }

            if kernel::KERNEL.sched_lock_nesting() > 0 {
                return Err(OsError::SchedLocked);
            }

            let Some(cur) = cur else {
                return Err(OsError::QEmpty);
            };

            (*cur.as_ptr()).msg_ptr = slot_ptr as *mut ();
            sched::os_pend(
                cur,
                Some(NonNull::from(&mut q.get_list)),
                OsPendOn::QueueGet,
                self as *const Self as *const (),
                timeout,
            );
            sched::os_sched();
            Ok(None)
        })?;

        if let Some(value) = ready {
            return Ok(value);
        }

        if let Some(cur) = cur {
            sched::os_pend_result(cur)?;
        }
        slot.ok_or(OsError::QEmpty)
    }

    /// Append a value, waiting as long as it takes for room
    pub fn put(&self, value: T) -> Result<(), PutError<T>> {
        self.post(value, 0, opt::PEND_BLOCKING)
    }

    /// Append a value if there is room right now
    ///
    /// Valid from ISR context.
    pub fn try_put(&self, value: T) -> Result<(), PutError<T>> {
        self.post(value, 0, opt::PEND_NON_BLOCKING)
    }

    /// Append a value, waiting at most `ms` milliseconds for room
    pub fn try_put_for(&self, value: T, ms: u32) -> Result<(), PutError<T>> {
        let (timeout, pend_opt) = os_pend_opts(ms);
        self.post(value, timeout, pend_opt)
    }

    /// Remove the oldest value, waiting as long as it takes
    pub fn get(&self) -> OsResult<T> {
        self.pend(0, opt::PEND_BLOCKING)
    }

    /// Remove the oldest value if there is one
    ///
    /// Valid from ISR context.
    pub fn try_get(&self) -> OsResult<T> {
        self.pend(0, opt::PEND_NON_BLOCKING)
    }

    /// Remove the oldest value, waiting at most `ms` milliseconds
    pub fn try_get_for(&self, ms: u32) -> OsResult<T> {
        let (timeout, pend_opt) = os_pend_opts(ms);
        self.pend(timeout, pend_opt)
    }

    /// Number of queued values
    pub fn count(&self) -> usize {
        critical_section(|cs| self.inner.get(cs).len)
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn is_full(&self) -> bool {
        self.count() == N
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<T: Send, const N: usize> Default for Queue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for Queue<T, N> {
    fn drop(&mut self) {
        let q = unsafe { self.inner.get_unchecked() };
        while q.pop().is_some() {}
    }
}

impl<T, const N: usize> core::fmt::Debug for Queue<T, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let len = critical_section(|cs| self.inner.get(cs).len);
        f.debug_struct("Queue").field("len", &len).field("capacity", &N).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;

    #[test]
    fn ring_wraps_in_order() {
        let q: Queue<u32, 3> = Queue::new();
        for round in 0..4 {
            assert_eq!(q.try_put(round * 10), Ok(()));
            assert_eq!(q.try_put(round * 10 + 1), Ok(()));
            assert_eq!(q.try_get(), Ok(round * 10));
            assert_eq!(q.try_get(), Ok(round * 10 + 1));
        }
        assert!(q.is_empty());
        assert_eq!(q.try_get(), Err(OsError::QEmpty));
        assert_eq!(q.try_get_for(0), Err(OsError::QEmpty));
    }

    #[test]
    fn full_queue_hands_value_back() {
        let q: Queue<&'static str, 2> = Queue::new();
        q.try_put("a").unwrap();
        q.try_put("b").unwrap();
        assert!(q.is_full());

        let err = q.try_put("c").unwrap_err();
        assert_eq!(err.error, OsError::QFull);
        assert_eq!(err.into_inner(), "c");
        assert_eq!(q.count(), 2);
        assert_eq!(q.capacity(), 2);
    }

    #[test]
    fn drop_releases_queued_values() {
        let marker = Arc::new(());
        {
            let q: Queue<Arc<()>, 4> = Queue::new();
            q.inner_push_for_test(marker.clone());
            q.inner_push_for_test(marker.clone());
            assert_eq!(Arc::strong_count(&marker), 3);
        }
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    impl<T, const N: usize> Queue<T, N> {
        fn inner_push_for_test(&self, value: T) {
            critical_section(|cs| self.inner.get(cs).push(value));
        }
    }
}
