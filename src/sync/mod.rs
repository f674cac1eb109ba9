//! Synchronization primitives
//!
//! Contains mutexes, semaphores, event flags, message queues and the
//! mutex-guarded integral counter.

pub mod flags;
pub mod integral;
pub mod mutex;
pub mod queue;
pub mod sem;

pub use flags::EventFlags;
pub use integral::SynchronizedIntegral;
pub use mutex::{LockGuard, Mutex};
pub use queue::{PutError, Queue};
pub use sem::Semaphore;

use crate::time::os_ms_to_ticks;
use crate::types::{opt, OsOpt, OsTick, OS_WAIT_FOREVER};

/// Kernel timeout and pend option for a millisecond wait
///
/// `0` never blocks and [`OS_WAIT_FOREVER`] waits without a timeout.
pub(crate) fn os_pend_opts(ms: u32) -> (OsTick, OsOpt) {
    match ms {
        0 => (0, opt::PEND_NON_BLOCKING),
        OS_WAIT_FOREVER => (0, opt::PEND_BLOCKING),
        ms => (os_ms_to_ticks(ms), opt::PEND_BLOCKING),
    }
}
