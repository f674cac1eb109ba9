//! Ready list - doubly linked list of TCBs at a given priority
//!
//! Each priority level has its own ready list. Tasks are added to the
//! tail (FIFO for round-robin) and scheduled from the head.

use core::ptr::NonNull;

use crate::task::OsTcb;

/// Ready list for a single priority level
#[derive(Debug, Clone, Copy)]
pub struct ReadyList {
    head: Option<NonNull<OsTcb>>,
    tail: Option<NonNull<OsTcb>>,
}

impl ReadyList {
    /// Create a new empty ready list
    pub const fn new() -> Self {
        ReadyList {
            head: None,
            tail: None,
        }
    }

    /// Initialize/reset the ready list
    pub fn init(&mut self) {
        self.head = None;
        self.tail = None;
    }

    /// Get head of list (first to be scheduled)
    #[inline]
    pub fn head(&self) -> Option<NonNull<OsTcb>> {
        self.head
    }

    /// Get tail of list
    #[inline]
    pub fn tail(&self) -> Option<NonNull<OsTcb>> {
        self.tail
    }

    /// Check if list is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Insert TCB at the tail of the list (FIFO order)
    ///
    /// Caller must ensure tcb is valid and not already in any ready list.
    pub fn insert_tail(&mut self, tcb: NonNull<OsTcb>) {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };

        tcb_ref.next_ptr = None;
        tcb_ref.prev_ptr = self.tail;

        match self.tail {
            Some(tail) => unsafe { (*tail.as_ptr()).next_ptr = Some(tcb) },
            None => self.head = Some(tcb),
        }

        self.tail = Some(tcb);
    }

    /// Insert TCB at the head of the list
    ///
    /// Used when the running task changes level and should keep the CPU.
    pub fn insert_head(&mut self, tcb: NonNull<OsTcb>) {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };

        tcb_ref.prev_ptr = None;
        tcb_ref.next_ptr = self.head;

        match self.head {
            Some(head) => unsafe { (*head.as_ptr()).prev_ptr = Some(tcb) },
            None => self.tail = Some(tcb),
        }

        self.head = Some(tcb);
    }

    /// Remove a TCB from the list
    ///
    /// Caller must ensure tcb is valid and is in this list.
    pub fn remove(&mut self, tcb: NonNull<OsTcb>) {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };

        match tcb_ref.prev_ptr {
            Some(prev) => unsafe { (*prev.as_ptr()).next_ptr = tcb_ref.next_ptr },
            None => self.head = tcb_ref.next_ptr,
        }

        match tcb_ref.next_ptr {
            Some(next) => unsafe { (*next.as_ptr()).prev_ptr = tcb_ref.prev_ptr },
            None => self.tail = tcb_ref.prev_ptr,
        }

        tcb_ref.prev_ptr = None;
        tcb_ref.next_ptr = None;
    }
}

impl Default for ReadyList {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: ReadyList is only modified within critical sections
unsafe impl Send for ReadyList {}
unsafe impl Sync for ReadyList {}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;

    fn leak() -> NonNull<OsTcb> {
        NonNull::from(Box::leak(Box::new(OsTcb::new())))
    }

    fn free(tcb: NonNull<OsTcb>) {
        drop(unsafe { Box::from_raw(tcb.as_ptr()) });
    }

    #[test]
    fn fifo_order_and_removal() {
        let (a, b, c) = (leak(), leak(), leak());
        let mut list = ReadyList::new();

        list.insert_tail(a);
        list.insert_tail(b);
        list.insert_tail(c);
        assert_eq!(list.head(), Some(a));
        assert_eq!(list.tail(), Some(c));

        list.remove(b);
        assert_eq!(unsafe { a.as_ref() }.next_ptr, Some(c));
        assert_eq!(unsafe { c.as_ref() }.prev_ptr, Some(a));

        list.remove(a);
        list.insert_head(a);
        assert_eq!(list.head(), Some(a));

        list.remove(a);
        list.remove(c);
        assert!(list.is_empty());
        assert_eq!(list.tail(), None);

        free(a);
        free(b);
        free(c);
    }
}
