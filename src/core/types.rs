//! Core type definitions
//!
//! These types provide strong typing for RTOS primitives.

/// Task priority (0 = highest priority)
pub type OsPrio = u8;

/// Tick duration type
pub type OsTick = u32;

/// Semaphore counter type
pub type OsSemCtr = u32;

/// Nesting counter
pub type OsNestingCtr = u8;

/// Option flags for API calls
pub type OsOpt = u16;

/// Stack element type
pub type OsStkElement = u32;

/// Event flags type
pub type OsFlags = u32;

/// Millisecond timeout meaning "wait until satisfied"
pub const OS_WAIT_FOREVER: u32 = u32::MAX;

/// Task state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum OsTaskState {
    /// Task was never started, has exited, or was terminated
    Deleted = 0,
    /// Task is ready to run
    Ready = 1,
    /// Task is delayed
    Delayed = 2,
    /// Task is pending on a kernel object
    Pend = 3,
    /// Task is pending with timeout
    PendTimeout = 4,
}

/// What the task is pending on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum OsPendOn {
    Nothing = 0,
    TaskFlag = 1,
    Flag = 2,
    Mutex = 3,
    Semaphore = 4,
    QueueGet = 5,
    QueuePut = 6,
    Join = 7,
}

/// Pend status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum OsPendStatus {
    /// Pend succeeded
    Ok = 0,
    /// Timeout occurred
    Timeout = 1,
}

// ============ Option flags ============

/// Pend, post and flag options
pub mod opt {
    use super::OsOpt;

    pub const NONE: OsOpt = 0x0000;

    // Pend options
    pub const PEND_BLOCKING: OsOpt = 0x0000;
    pub const PEND_NON_BLOCKING: OsOpt = 0x8000;

    // Flag options
    pub const FLAG_WAIT_ANY: OsOpt = 0x0000;
    pub const FLAG_WAIT_ALL: OsOpt = 0x0001;
    pub const FLAG_NO_CLEAR: OsOpt = 0x0002;
}
