//! Core RTOS modules
//!
//! Kernel state, the scheduler with its ready and pend lists, task control
//! blocks with their stacks and thread flags, and tick-based time.

pub mod config;
pub mod critical;
pub mod cs_cell;
pub mod error;
pub mod kernel;
pub mod prio;
pub mod sched;
pub mod task;
pub mod time;
pub mod types;
