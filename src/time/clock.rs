//! [`Clock`]s provide a virtual time source, and fire [`Timer`]s bound to them
//! once their deadlines are reached.
//!
//! See the documentation for the [`Clock`] trait for more details.
//!
//! [`Timer`]: super::Timer
use super::timer::Shared;
use core::{
    fmt,
    ops::{Add, AddAssign, Sub, SubAssign},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use std::sync::Weak;

mod virt;

pub use self::virt::{Turn, VirtualClock};

/// A source of virtual time, and the mechanism that fires the [`Timer`]s bound
/// to it.
///
/// A `Clock` has two responsibilities:
///
/// 1. Reporting the current virtual time, via [`Clock::now`].
/// 2. Holding a registration for each armed [`Timer`], and calling
///    [`Expiry::fire`] on it once virtual time reaches the registered deadline.
///
/// # Virtual Time
///
/// Time reported by a `Clock` is *virtual*: it is decoupled from the host's
/// wall clock, so that the clock may be stopped while a sandbox is
/// checkpointed, or replayed deterministically. The only requirement is that
/// [`now`] is monotonically non-decreasing: a call to [`now`] MUST NOT ever
/// return an [`Instant`] earlier than one returned by a previous call.
///
/// # Firing Timers
///
/// [`Timer`]s call [`Clock::arm`] whenever their deadline changes, and
/// [`Clock::disarm`] when they are paused or destroyed. A `Clock`
/// implementation keeps at most one registration per [`TimerId`]: arming a
/// timer that is already registered replaces its previous registration.
///
/// Once virtual time reaches a registration's deadline, the clock calls
/// [`Expiry::fire`] from its own firing context. Implementations MUST NOT hold
/// any lock that [`Clock::arm`] or [`Clock::disarm`] would acquire while
/// calling [`Expiry::fire`], since firing a timer frequently re-arms it.
///
/// Firing an [`Expiry`] which has since been superseded (because the timer was
/// reconfigured, paused, or destroyed after the registration was made) is
/// always harmless: a stale `Expiry` does nothing.
///
/// [`now`]: Clock::now
/// [`Timer`]: super::Timer
pub trait Clock: Send + Sync {
    /// Returns the current virtual time.
    fn now(&self) -> Instant;

    /// Registers `expiry` to be fired once virtual time reaches `deadline`,
    /// replacing any existing registration for the same timer.
    fn arm(&self, deadline: Instant, expiry: Expiry);

    /// Removes any registration for `timer`.
    fn disarm(&self, timer: TimerId);
}

/// A point in virtual time, measured as the [`Duration`] elapsed since the
/// epoch of the [`Clock`] that produced it.
///
/// `Instant`s are analogous to [`std::time::Instant`], except that they are
/// only meaningful relative to other `Instant`s from the same [`Clock`].
///
/// [`std::time::Instant`]: https://doc.rust-lang.org/std/time/struct.Instant.html
#[derive(Copy, Clone, Default, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Instant(Duration);

/// Uniquely identifies a [`Timer`](super::Timer) within the process.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TimerId(u64);

/// A [`Timer`](super::Timer)'s registration with its [`Clock`].
///
/// An `Expiry` is handed to [`Clock::arm`] every time a timer's deadline
/// changes. Each `Expiry` captures the timer's *generation* at the time it was
/// created; once the timer is reconfigured, paused, or destroyed, any
/// outstanding `Expiry` values become stale, and firing them does nothing.
///
/// An `Expiry` does not keep its timer alive.
pub struct Expiry {
    id: TimerId,
    generation: u64,
    timer: Weak<Shared>,
}

// === impl Instant ===

impl Instant {
    /// The epoch of every [`Clock`].
    pub const ZERO: Self = Self(Duration::ZERO);

    /// The latest representable instant.
    pub const MAX: Self = Self(Duration::MAX);

    /// Returns an `Instant` `elapsed` after the clock's epoch.
    #[must_use]
    pub const fn from_elapsed(elapsed: Duration) -> Self {
        Self(elapsed)
    }

    /// Returns an `Instant` `nanos` nanoseconds after the clock's epoch.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(Duration::from_nanos(nanos))
    }

    /// Returns the amount of time elapsed from another instant to this one,
    /// or zero duration if that instant is later than this one.
    #[must_use]
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        self.checked_duration_since(earlier).unwrap_or_default()
    }

    /// Returns the amount of time elapsed from another instant to this one,
    /// or [`None`] if that instant is later than this one.
    #[must_use]
    pub fn checked_duration_since(&self, earlier: Instant) -> Option<Duration> {
        self.0.checked_sub(earlier.0)
    }

    /// Returns the amount of time elapsed since the clock's epoch.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.0
    }

    /// Returns `Some(t)` where `t` is the time `self + duration` if `t` can be
    /// represented as an `Instant`, [`None`] otherwise.
    #[must_use]
    pub fn checked_add(&self, duration: Duration) -> Option<Instant> {
        self.0.checked_add(duration).map(Instant)
    }

    /// Returns `Some(t)` where `t` is the time `self - duration` if `t` can be
    /// represented as an `Instant`, [`None`] otherwise.
    #[must_use]
    pub fn checked_sub(&self, duration: Duration) -> Option<Instant> {
        self.0.checked_sub(duration).map(Instant)
    }

    /// Returns `self + duration`, clamped to [`Instant::MAX`].
    #[must_use]
    pub fn saturating_add(&self, duration: Duration) -> Instant {
        Instant(self.0.saturating_add(duration))
    }

    /// Returns the number of whole nanoseconds since the clock's epoch,
    /// clamped to `u64::MAX`.
    #[must_use]
    pub(crate) fn as_nanos_saturating(&self) -> u64 {
        u64::try_from(self.0.as_nanos()).unwrap_or(u64::MAX)
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    /// # Panics
    ///
    /// This function may panic if the resulting point in time cannot be represented by the
    /// underlying data structure. See [`Instant::checked_add`] for a version without panic.
    fn add(self, other: Duration) -> Instant {
        self.checked_add(other)
            .expect("overflow when adding duration to instant")
    }
}

impl AddAssign<Duration> for Instant {
    fn add_assign(&mut self, other: Duration) {
        *self = *self + other;
    }
}

impl Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, other: Duration) -> Instant {
        self.checked_sub(other)
            .expect("overflow when subtracting duration from instant")
    }
}

impl SubAssign<Duration> for Instant {
    fn sub_assign(&mut self, other: Duration) {
        *self = *self - other;
    }
}

impl Sub<Instant> for Instant {
    type Output = Duration;

    /// Returns the amount of time elapsed from another instant to this one,
    /// or zero duration if that instant is later than this one.
    fn sub(self, other: Instant) -> Duration {
        self.duration_since(other)
    }
}

impl fmt::Debug for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instant({:?})", self.0)
    }
}

impl fmt::Display for Instant {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

// === impl TimerId ===

impl TimerId {
    pub(in crate::time) fn next() -> Self {
        // ids only need to be unique, so this counter is never modeled by loom.
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the numeric value of this id.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

// === impl Expiry ===

impl Expiry {
    pub(in crate::time) fn new(id: TimerId, generation: u64, timer: Weak<Shared>) -> Self {
        Self {
            id,
            generation,
            timer,
        }
    }

    /// Returns the [`TimerId`] of the timer this registration belongs to.
    #[must_use]
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Fires the timer this registration belongs to.
    ///
    /// This evaluates the timer's current setting against its clock's current
    /// time, notifying the timer's listener if one or more expirations have
    /// elapsed.
    ///
    /// # Returns
    ///
    /// - `true` if the timer's listener was notified.
    /// - `false` if this registration was stale (the timer was dropped,
    ///   destroyed, paused, or reconfigured since the registration was made),
    ///   or if the timer's deadline had not actually been reached yet.
    pub fn fire(self) -> bool {
        let Some(timer) = self.timer.upgrade() else {
            trace!(timer.id = %self.id, "timer dropped before firing");
            return false;
        };
        timer.expire(self.generation)
    }
}

impl fmt::Debug for Expiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expiry")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
