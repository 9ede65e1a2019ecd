//! Virtual clocks and resettable timers.
//!
//! This module contains the core scheduling primitives:
//!
//! - [`Clock`]: a source of virtual time, which fires the timers bound to it.
//!   [`VirtualClock`] is a manually driven implementation.
//! - [`Setting`]: a timer's armed state (enabled, period, next deadline).
//! - [`Timer`]: binds a [`Setting`] to a [`Clock`], and notifies a
//!   [`TimerListener`] when the setting's deadline elapses.
//!
//! # Virtual Time
//!
//! All times in this module are *virtual*: an [`Instant`] is measured from the
//! epoch of the [`Clock`] that produced it, and that clock only moves when its
//! driver says so. Timers therefore fire against the sandbox's notion of time
//! rather than the host's, which is what allows a sandbox to be checkpointed
//! and restored (see [`Timer::pause`] and [`Timer::resume`]), or replayed
//! deterministically.
pub mod clock;
mod listener;
mod setting;
pub mod timer;

pub use self::{
    clock::{Clock, Expiry, Instant, TimerId, Turn, VirtualClock},
    listener::{ExpirationCounter, TimerListener},
    setting::Setting,
    timer::Timer,
};
pub use core::time::Duration;
