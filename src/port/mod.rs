//! Port layer - CPU-specific implementations
//!
//! This module provides the hardware abstraction layer for context switching
//! and other CPU-specific operations. Every port exposes the same set of
//! functions and types:
//!
//! - `os_cs_acquire` / `os_cs_release`: raw critical section entry and exit
//! - `os_ctx_sw` / `os_int_ctx_sw`: request a switch to `tcb_high_rdy`
//! - `os_start_high_rdy`: start the tick source and the first task
//! - `os_task_stk_init`, `os_task_spawn`, `os_task_reap`: task context life cycle
//! - `os_task_self`, `os_task_kill`, `os_task_abandon`
//! - `os_cpu_idle`, `os_time_us`
//! - `OsTaskCtx`

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod cortex_m4;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use cortex_m4::*;

#[cfg(not(target_os = "none"))]
mod hosted;

#[cfg(not(target_os = "none"))]
pub use hosted::*;

#[cfg(all(target_os = "none", not(target_arch = "arm")))]
compile_error!("no port for this bare-metal target");
