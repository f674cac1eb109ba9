//! Compile-time configuration for the kernel
//!
//! These constants control the behavior and resource limits of the RTOS.

/// Maximum number of priority levels
pub const CFG_PRIO_MAX: usize = 64;

/// System tick rate in Hz
pub const CFG_TICK_RATE_HZ: u32 = 1000;

/// Core clock feeding SysTick (TMPM4G9 fsys after PLL bring-up)
pub const CFG_CPU_CLK_HZ: u32 = 160_000_000;

/// Default time quanta for round-robin scheduling
pub const CFG_TIME_QUANTA_DEFAULT: u32 = 5;

/// Minimum task stack size in bytes
#[cfg(target_os = "none")]
pub const CFG_STK_SIZE_MIN: usize = 256;

/// Minimum task stack size in bytes (room for host signal frames)
#[cfg(not(target_os = "none"))]
pub const CFG_STK_SIZE_MIN: usize = 16 * 1024;

/// Stack size used when a thread does not ask for one
#[cfg(target_os = "none")]
pub const CFG_STK_SIZE_DEFAULT: usize = 4096;

#[cfg(not(target_os = "none"))]
pub const CFG_STK_SIZE_DEFAULT: usize = 64 * 1024;

/// Idle task stack size in bytes
pub const CFG_IDLE_STK_SIZE: usize = 512;

/// Number of entries in tick wheel
pub const CFG_TICK_WHEEL_SIZE: usize = 16;

/// Enable round-robin scheduling for same-priority tasks
pub const CFG_SCHED_ROUND_ROBIN_EN: bool = true;

/// Idle task priority
pub const CFG_PRIO_IDLE: u8 = (CFG_PRIO_MAX - 1) as u8;

/// Byte pattern a fresh stack is filled with (watermark detection)
pub const CFG_STK_FILL: u8 = 0xCC;

/// Word written at the lowest stack address (overflow detection)
pub const CFG_STK_MAGIC: u32 = 0xE25A_2EA5;
