//! Pend list - tasks waiting on a kernel object, most urgent first
//!
//! Every blocking object (semaphore, mutex, event flags, queue, thread join)
//! owns one of these. Tasks of equal priority keep arrival order.

use core::ptr::NonNull;

use crate::task::OsTcb;

/// Pend list for tasks waiting on a kernel object
#[derive(Debug)]
pub struct PendList {
    head: Option<NonNull<OsTcb>>,
    tail: Option<NonNull<OsTcb>>,
}

impl PendList {
    /// Create a new empty pend list
    pub const fn new() -> Self {
        PendList {
            head: None,
            tail: None,
        }
    }

    /// Check if list is empty
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Get head of list
    #[inline(always)]
    pub fn head(&self) -> Option<NonNull<OsTcb>> {
        self.head
    }

    /// Insert in priority order, after every waiter of the same priority
    pub fn insert_by_prio(&mut self, tcb: NonNull<OsTcb>) {
        let prio = unsafe { tcb.as_ref() }.prio;

        let mut current = self.head;
        let mut prev: Option<NonNull<OsTcb>> = None;

        while let Some(cur_ptr) = current {
            let cur_ref = unsafe { cur_ptr.as_ref() };
            if prio < cur_ref.prio {
                break;
            }
            prev = current;
            current = cur_ref.pend_next_ptr;
        }

        let tcb_mut = unsafe { &mut *tcb.as_ptr() };
        tcb_mut.pend_prev_ptr = prev;
        tcb_mut.pend_next_ptr = current;

        match prev {
            Some(p) => unsafe { (*p.as_ptr()).pend_next_ptr = Some(tcb) },
            None => self.head = Some(tcb),
        }

        match current {
            Some(c) => unsafe { (*c.as_ptr()).pend_prev_ptr = Some(tcb) },
            None => self.tail = Some(tcb),
        }
    }

    /// Remove specific TCB from list
    pub fn remove(&mut self, tcb: NonNull<OsTcb>) {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };

        match tcb_ref.pend_prev_ptr {
            Some(prev) => unsafe { (*prev.as_ptr()).pend_next_ptr = tcb_ref.pend_next_ptr },
            None => self.head = tcb_ref.pend_next_ptr,
        }

        match tcb_ref.pend_next_ptr {
            Some(next) => unsafe { (*next.as_ptr()).pend_prev_ptr = tcb_ref.pend_prev_ptr },
            None => self.tail = tcb_ref.pend_prev_ptr,
        }

        tcb_ref.pend_prev_ptr = None;
        tcb_ref.pend_next_ptr = None;
    }

    /// Re-position a waiter whose priority changed
    pub fn resort(&mut self, tcb: NonNull<OsTcb>) {
        self.remove(tcb);
        self.insert_by_prio(tcb);
    }
}

impl Default for PendList {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for PendList {}
unsafe impl Sync for PendList {}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use alloc::vec::Vec;

    fn leak(prio: u8) -> NonNull<OsTcb> {
        let mut tcb = Box::new(OsTcb::new());
        tcb.prio = prio;
        NonNull::from(Box::leak(tcb))
    }

    fn order(list: &PendList) -> Vec<u8> {
        let mut out = Vec::new();
        let mut cur = list.head();
        while let Some(t) = cur {
            let t = unsafe { t.as_ref() };
            out.push(t.prio);
            cur = t.pend_next_ptr;
        }
        out
    }

    #[test]
    fn priority_order_with_fifo_ties() {
        let a = leak(20);
        let b = leak(10);
        let c = leak(20);
        let d = leak(5);
        let mut list = PendList::new();
        for t in [a, b, c, d] {
            list.insert_by_prio(t);
        }
        assert_eq!(order(&list), [5, 10, 20, 20]);
        assert_eq!(unsafe { list.head().unwrap().as_ref() }.prio, 5);
        assert_eq!(unsafe { b.as_ref() }.pend_next_ptr, Some(a));

        unsafe { (*c.as_ptr()).prio = 1 };
        list.resort(c);
        assert_eq!(list.head(), Some(c));

        for t in [a, b, c, d] {
            list.remove(t);
            drop(unsafe { Box::from_raw(t.as_ptr()) });
        }
        assert!(list.is_empty());
    }
}
