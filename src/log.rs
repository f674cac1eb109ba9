//! Logging macros for the kernel
//!
//! With the `defmt` feature the macros forward to `defmt` (RTT on target).
//! On hosted targets they forward to the `log` facade, so tests and demos
//! can install any logger. Bare-metal builds without `defmt` compile them
//! to nothing.

/// Forward one record to the active backend
#[cfg(feature = "defmt")]
#[doc(hidden)]
#[macro_export]
macro_rules! __os_log {
    ($level:ident, $($arg:tt)*) => { $crate::__private::defmt::$level!($($arg)*) };
}

#[cfg(all(not(feature = "defmt"), not(target_os = "none")))]
#[doc(hidden)]
#[macro_export]
macro_rules! __os_log {
    ($level:ident, $($arg:tt)*) => { $crate::__private::log::$level!($($arg)*) };
}

#[cfg(all(not(feature = "defmt"), target_os = "none"))]
#[doc(hidden)]
#[macro_export]
macro_rules! __os_log {
    ($level:ident, $($arg:tt)*) => {};
}

/// Debug message
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => { $crate::__os_log!(debug, $($arg)*) };
}

/// Info message
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => { $crate::__os_log!(info, $($arg)*) };
}

/// Error message
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => { $crate::__os_log!(error, $($arg)*) };
}

/// Trace message
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => { $crate::__os_log!(trace, $($arg)*) };
}

/// Warning message
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => { $crate::__os_log!(warn, $($arg)*) };
}
