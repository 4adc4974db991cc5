//! Internal tracing macros.
//!
//! Mirrors the development-time "Det" trace sink this module is grounded
//! on: diagnostics that never influence behavior, compiled to nothing
//! unless the host opts into `defmt` or `log`.

#[cfg(feature = "defmt")]
macro_rules! nm_trace {
    ($($arg:tt)*) => { defmt::trace!($($arg)*) };
}

#[cfg(all(feature = "log", not(feature = "defmt")))]
macro_rules! nm_trace {
    ($($arg:tt)*) => { log::trace!($($arg)*) };
}

#[cfg(not(any(feature = "defmt", feature = "log")))]
macro_rules! nm_trace {
    ($($arg:tt)*) => {{}};
}

#[cfg(feature = "defmt")]
macro_rules! nm_debug {
    ($($arg:tt)*) => { defmt::debug!($($arg)*) };
}

#[cfg(all(feature = "log", not(feature = "defmt")))]
macro_rules! nm_debug {
    ($($arg:tt)*) => { log::debug!($($arg)*) };
}

#[cfg(not(any(feature = "defmt", feature = "log")))]
macro_rules! nm_debug {
    ($($arg:tt)*) => {{}};
}

pub(crate) use nm_debug;
pub(crate) use nm_trace;
