//! Preemptive RTOS kernel for the TMPM4G9 (Cortex-M4)
//!
//! A real-time operating system kernel providing:
//! - Priority-based preemptive scheduling with round-robin among equals
//! - Threads with thread flags, join, terminate and stack introspection
//! - Synchronization primitives (mutexes, semaphores, event flags, queues)
//! - Time management with tick-based delays and a microsecond ticker
//! - Context switching for ARM Cortex-M4, and a hosted port for testing

#![cfg_attr(target_os = "none", no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

// ============ Critical Section ============

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod cs_impl {
    use cortex_m::interrupt;
    use cortex_m::register::primask;
    use critical_section::{set_impl, Impl, RawRestoreState};

    struct SingleCoreCriticalSection;
    set_impl!(SingleCoreCriticalSection);

    unsafe impl Impl for SingleCoreCriticalSection {
        unsafe fn acquire() -> RawRestoreState {
            let was_active = primask::read().is_active();
            interrupt::disable();
            was_active
        }

        unsafe fn release(was_active: RawRestoreState) {
            if was_active {
                unsafe { interrupt::enable() }
            }
        }
    }
}

// ============ Modules ============

pub mod log;
#[cfg(all(target_arch = "arm", target_os = "none"))]
mod lang_items;

pub mod core;
pub mod sync;
pub mod thread;
pub mod port;

// ============ Re-exports ============

pub use crate::core::config;
pub use crate::core::config::*;
pub use crate::core::critical;
pub use crate::core::error;
pub use crate::core::error::{OsError, OsResult};
pub use crate::core::kernel;
pub use crate::core::kernel::{os_init, os_start};
pub use crate::core::prio;
pub use crate::core::types;
pub use crate::core::types::*;
pub use crate::core::task;
pub use crate::core::sched;
pub use crate::core::time;

pub use sync::{EventFlags, LockGuard, Mutex, PutError, Queue, Semaphore, SynchronizedIntegral};
pub use thread::{this_thread, Priority, StackInfo, Thread, ThreadId, ThreadState};

#[doc(hidden)]
pub mod __private {
    #[cfg(feature = "defmt")]
    pub use ::defmt;
    #[cfg(all(not(feature = "defmt"), not(target_os = "none")))]
    pub use ::log;
}
