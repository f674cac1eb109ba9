//! Error types for the kernel
//!
//! Uses Rust's Result pattern instead of C-style error pointers. The
//! discriminants follow the µC/OS-III numbering so codes stay recognizable
//! in traces.

/// RTOS error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum OsError {
    // ============ Flag errors ============
    /// Empty mask or invalid wait option
    FlagPendOpt = 15103,

    // ============ Lock errors ============
    /// Scheduler lock nesting overflow
    LockNestingOvf = 21001,

    // ============ Mutex errors ============
    /// Caller is not the mutex owner
    MutexNotOwner = 22401,
    /// Mutex nesting overflow
    MutexOvf = 22404,

    // ============ OS state errors ============
    /// OS is not running
    OsNotRunning = 24201,
    /// OS is already running
    OsRunning = 24202,
    /// OS not initialized
    OsNotInit = 24203,

    // ============ Pend errors ============
    /// Cannot pend from ISR
    PendIsr = 25006,
    /// Pend would block (non-blocking mode)
    PendWouldBlock = 25008,

    // ============ Priority errors ============
    /// Invalid priority
    PrioInvalid = 25203,

    // ============ Queue errors ============
    /// Queue is full
    QFull = 26001,
    /// Queue is empty
    QEmpty = 26002,

    // ============ Scheduler errors ============
    /// Cannot lock scheduler from ISR
    SchedLockIsr = 28002,
    /// Scheduler is locked
    SchedLocked = 28003,
    /// Scheduler is not locked
    SchedNotLocked = 28004,
    /// Cannot unlock scheduler from ISR
    SchedUnlockIsr = 28005,

    // ============ Semaphore errors ============
    /// Semaphore overflow
    SemOvf = 28101,

    // ============ Stack errors ============
    /// Invalid stack size
    StkSizeInvalid = 28208,
    /// Stack memory could not be allocated
    StkAllocFail = 28209,
    /// Stack overflow detected
    StkOvf = 28210,

    // ============ Task errors ============
    /// Cannot change priority from ISR
    TaskChangePrioIsr = 29001,
    /// Cannot create task from ISR
    TaskCreateIsr = 29002,
    /// Cannot delete task from ISR
    TaskDelIsr = 29006,
    /// No more task contexts available
    TaskNoMoreTcb = 29008,
    /// Task does not exist
    TaskNotExist = 29010,
    /// Task is running
    TaskRunning = 29016,
    /// A task cannot join itself
    TaskJoinSelf = 29022,

    // ============ Time errors ============
    /// Cannot delay from ISR
    TimeDlyIsr = 29301,
    /// Minutes out of range
    TimeInvalidMinutes = 29303,
    /// Seconds out of range
    TimeInvalidSeconds = 29304,
    /// Milliseconds out of range
    TimeInvalidMs = 29305,

    // ============ Timeout ============
    /// Operation timed out
    Timeout = 29401,

    // ============ Yield errors ============
    /// Cannot yield from ISR
    YieldIsr = 34001,
}

/// Result type alias for RTOS operations
pub type OsResult<T> = Result<T, OsError>;

impl OsError {
    /// Numeric µC/OS-III error code
    #[inline]
    pub const fn code(self) -> u16 {
        self as u16
    }
}
