//! Time management module
//!
//! Provides tick handling, time delays, and timeout management.

use crate::config::{CFG_TICK_RATE_HZ, CFG_TICK_WHEEL_SIZE};
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::port;
use crate::sched;
use crate::types::{OsPendStatus, OsTaskState, OsTick};

/// Convert milliseconds to ticks, rounding up
#[inline]
pub fn os_ms_to_ticks(ms: u32) -> OsTick {
    let ticks = (ms as u64 * CFG_TICK_RATE_HZ as u64).div_ceil(1000);
    ticks.min(OsTick::MAX as u64) as OsTick
}

/// Time delay in ticks
///
/// Delays the calling task for at least the specified number of system
/// ticks. The task is removed from the ready list and placed on the tick
/// wheel. When the delay expires, the tick handler moves the task back to
/// ready.
///
/// # Arguments
/// * `ticks` - Number of ticks to delay (0 = no delay)
///
/// # Returns
/// * `Ok(())` - Delay completed
/// * `Err(OsError::TimeDlyIsr)` - Cannot delay from ISR
/// * `Err(OsError::SchedLocked)` - Scheduler is locked
pub fn os_time_dly(ticks: OsTick) -> OsResult<()> {
    if is_isr_context() {
        return Err(OsError::TimeDlyIsr);
    }

    let cur = kernel::os_tcb_self()?;

    if !kernel::KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }

    if ticks == 0 {
        return Ok(());
    }

    critical_section(|_cs| {
        if kernel::KERNEL.sched_lock_nesting() > 0 {
            return Err(OsError::SchedLocked);
        }

        unsafe {
            sched::os_rdy_list_remove(cur);
            (*cur.as_ptr()).task_state = OsTaskState::Delayed;
            // the current tick is already partly gone
            kernel::tick_wheel_insert(cur, ticks.saturating_add(1));
        }

        sched::os_sched();
        Ok(())
    })
}

/// Delay for a wall-clock span. Hours saturate at 999.
pub fn os_time_dly_hmsm(hours: u16, minutes: u8, seconds: u8, milliseconds: u16) -> OsResult<()> {
    if minutes > 59 {
        return Err(OsError::TimeInvalidMinutes);
    }
    if seconds > 59 {
        return Err(OsError::TimeInvalidSeconds);
    }
    if milliseconds > 999 {
        return Err(OsError::TimeInvalidMs);
    }

    let total_ms = hours.min(999) as u32 * 3_600_000
        + minutes as u32 * 60_000
        + seconds as u32 * 1000
        + milliseconds as u32;

    os_time_dly(os_ms_to_ticks(total_ms))
}

/// Get current tick count
#[inline]
pub fn os_time_get() -> u64 {
    kernel::KERNEL.tick_get()
}

/// Monotonic time since boot in microseconds
#[inline]
pub fn os_time_get_us() -> u64 {
    port::os_time_us()
}

/// Monotonic time since boot in milliseconds
#[inline]
pub fn os_time_get_ms() -> u64 {
    os_time_get_us() / 1000
}

/// Tick handler
///
/// Called once per tick from the tick interrupt. Expires delays and pend
/// timeouts in the current wheel slot and applies round-robin.
pub fn os_tick_handler() {
    if !kernel::KERNEL.is_running() {
        return;
    }

    kernel::KERNEL.int_enter();

    critical_section(|cs| {
        let tick = kernel::KERNEL.tick_increment();
        unsafe { os_tick_wheel_process(tick) };
        sched::os_sched_round_robin(cs);
    });

    kernel::os_int_exit();
}

/// Process the tick wheel slot of `tick`
///
/// Entries further out than one wheel turn only lose a turn's worth of
/// remaining ticks.
unsafe fn os_tick_wheel_process(tick: u64) {
    let mut next = unsafe { kernel::tick_wheel_head(tick) };

    while let Some(tcb) = next {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };
        next = tcb_ref.tick_next_ptr;

        if tcb_ref.tick_remain > CFG_TICK_WHEEL_SIZE as OsTick {
            tcb_ref.tick_remain -= CFG_TICK_WHEEL_SIZE as OsTick;
            continue;
        }

        unsafe {
            match tcb_ref.task_state {
                OsTaskState::Delayed => {
                    kernel::tick_wheel_remove(tcb);
                    tcb_ref.task_state = OsTaskState::Ready;
                    sched::os_rdy_list_insert(tcb);
                }
                OsTaskState::Pend | OsTaskState::PendTimeout => {
                    sched::os_pend_ready(tcb, OsPendStatus::Timeout);
                }
                OsTaskState::Ready | OsTaskState::Deleted => kernel::tick_wheel_remove(tcb),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_to_ticks_at_one_khz() {
        assert_eq!(os_ms_to_ticks(0), 0);
        assert_eq!(os_ms_to_ticks(1), 1);
        assert_eq!(os_ms_to_ticks(250), 250);
        assert_eq!(os_ms_to_ticks(u32::MAX), u32::MAX);
    }

    #[test]
    fn hmsm_fields_are_range_checked() {
        assert_eq!(os_time_dly_hmsm(0, 60, 0, 0), Err(OsError::TimeInvalidMinutes));
        assert_eq!(os_time_dly_hmsm(0, 0, 60, 0), Err(OsError::TimeInvalidSeconds));
        assert_eq!(os_time_dly_hmsm(0, 0, 0, 1000), Err(OsError::TimeInvalidMs));
    }
}
