use core::fmt;

#[cfg(any(test, feature = "tracing"))]
macro_rules! trace {
    ($($t:tt)*) => { tracing::trace!($($t)*) }
}

#[cfg(not(any(test, feature = "tracing")))]
macro_rules! trace {
    ($($t:tt)*) => {};
}

#[cfg(any(test, feature = "tracing"))]
macro_rules! debug {
    ($($t:tt)*) => { tracing::debug!($($t)*) }
}

#[cfg(not(any(test, feature = "tracing")))]
macro_rules! debug {
    ($($t:tt)*) => {};
}

#[cfg(any(test, feature = "tracing"))]
macro_rules! warn {
    ($($t:tt)*) => { tracing::warn!($($t)*) }
}

#[cfg(not(any(test, feature = "tracing")))]
macro_rules! warn {
    ($($t:tt)*) => {};
}

/// Unwraps `result`, panicking with the `Display` (rather than `Debug`)
/// output of the error.
#[track_caller]
pub(crate) fn expect_display<T, E: fmt::Display>(result: Result<T, E>, msg: &str) -> T {
    match result {
        Ok(t) => t,
        Err(error) => panic!("{msg}: {error}"),
    }
}
