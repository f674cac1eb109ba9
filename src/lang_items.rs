//! Language items and default exception handlers (bare-metal only)

// When defmt feature is enabled, use defmt_rtt and panic_probe
#[cfg(feature = "defmt")]
use defmt_rtt as _;

#[cfg(feature = "defmt")]
use panic_probe as _;

#[cfg(not(feature = "defmt"))]
use panic_halt as _;

// Defmt panic handler
#[cfg(feature = "defmt")]
#[defmt::panic_handler]
fn defmt_panic() -> ! {
    cortex_m::asm::udf()
}

// Default HardFault handler
#[cortex_m_rt::exception]
unsafe fn HardFault(_ef: &cortex_m_rt::ExceptionFrame) -> ! {
    loop { cortex_m::asm::udf(); }
}

// Defmt timestamp in microseconds from the kernel ticker
#[cfg(feature = "defmt")]
defmt::timestamp!("{=u64:us}", crate::time::os_time_get_us());
