use super::Instant;
use core::time::Duration;

/// Describes the armed state of a [`Timer`](super::Timer).
///
/// A `Setting` is a plain value: timers are reconfigured by
/// [swapping](super::Timer::swap) in a whole new `Setting`.
///
/// - A *disabled* setting never fires. [`Setting::default()`] is the
///   disabled "zero" setting.
/// - An enabled setting with a zero `period` is a *one-shot* setting: it
///   fires once, when virtual time reaches `next`, and is then disabled.
/// - An enabled setting with a non-zero `period` is a *periodic* setting:
///   after each expiration, `next` is advanced by `period`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Setting {
    /// Whether the timer will fire.
    pub enabled: bool,

    /// The interval between expirations, or [`Duration::ZERO`] for a one-shot
    /// timer.
    pub period: Duration,

    /// The time of the next expiration, or of the most recent one once it
    /// has passed.
    ///
    /// Only meaningful while `enabled` is `true`.
    pub next: Instant,
}

impl Setting {
    /// Returns an enabled one-shot `Setting` that expires at `next`.
    #[must_use]
    pub const fn one_shot(next: Instant) -> Self {
        Self {
            enabled: true,
            period: Duration::ZERO,
            next,
        }
    }

    /// Returns an enabled periodic `Setting` that first expires at `next`,
    /// and then every `period` thereafter.
    ///
    /// A zero `period` results in a one-shot setting.
    #[must_use]
    pub const fn periodic(next: Instant, period: Duration) -> Self {
        Self {
            enabled: true,
            period,
            next,
        }
    }

    /// Returns a `Setting` which first expires `value` after `now`, and then
    /// every `interval` thereafter.
    ///
    /// This is the relative form used by `setitimer(2)` and
    /// `timer_settime(2)`: a zero `value` disarms the timer, regardless of
    /// `interval`.
    #[must_use]
    pub fn from_spec(value: Duration, interval: Duration, now: Instant) -> Self {
        if value.is_zero() {
            return Self::default();
        }
        Self::periodic(now.saturating_add(value), interval)
    }

    /// Returns a `Setting` which first expires at the absolute time `value`,
    /// and then every `interval` thereafter.
    ///
    /// This is the `TIMER_ABSTIME` form of `timer_settime(2)`: a `value` of
    /// [`Instant::ZERO`] disarms the timer, regardless of `interval`.
    #[must_use]
    pub fn from_abs_spec(value: Instant, interval: Duration) -> Self {
        if value == Instant::ZERO {
            return Self::default();
        }
        Self::periodic(value, interval)
    }

    /// Returns the `(value, interval)` pair describing this `Setting`
    /// relative to `now`, as reported by `getitimer(2)` and
    /// `timer_gettime(2)`.
    ///
    /// A disabled setting is `(0, 0)`. An enabled setting whose deadline has
    /// already been reached has a `value` of zero.
    #[must_use]
    pub fn to_spec(&self, now: Instant) -> (Duration, Duration) {
        if !self.enabled {
            return (Duration::ZERO, Duration::ZERO);
        }
        (self.next.duration_since(now), self.period)
    }

    /// Returns `true` if this is an enabled setting with a non-zero period.
    #[must_use]
    pub fn is_periodic(&self) -> bool {
        self.enabled && !self.period.is_zero()
    }

    /// Returns a copy of this setting with `enabled` cleared.
    #[must_use]
    pub(crate) fn disabled(self) -> Self {
        Self {
            enabled: false,
            ..self
        }
    }

    /// Evaluates this setting at time `now`.
    ///
    /// # Returns
    ///
    /// A tuple of the setting as it should be after `now`, and the number of
    /// expirations that occurred at or before `now`:
    ///
    /// - If the setting is disabled, or its deadline is after `now`, it is
    ///   returned unchanged along with zero expirations.
    /// - A one-shot setting whose deadline has been reached is returned
    ///   disabled, with one expiration.
    /// - A periodic setting whose deadline has been reached is returned with
    ///   `next` advanced past `now`, along with the number of periods that
    ///   elapsed. Periods that were missed (because the setting was not
    ///   evaluated in time) are coalesced into that single count, rather than
    ///   being reported one at a time.
    #[must_use]
    pub fn at(self, now: Instant) -> (Self, u64) {
        if !self.enabled || self.next > now {
            return (self, 0);
        }

        if self.period.is_zero() {
            return (self.disabled(), 1);
        }

        let period = self.period.as_nanos();
        let overdue = (now - self.next).as_nanos();
        let expirations = 1 + overdue / period;
        let next = self
            .next
            .checked_add(nanos_to_duration(expirations.saturating_mul(period)));
        let expirations = u64::try_from(expirations).unwrap_or(u64::MAX);
        match next {
            Some(next) => (Self { next, ..self }, expirations),
            // the next expiration is no longer representable, so this timer
            // will never fire again.
            None => (self.disabled(), expirations),
        }
    }
}

fn nanos_to_duration(nanos: u128) -> Duration {
    const NANOS_PER_SEC: u128 = 1_000_000_000;
    match u64::try_from(nanos / NANOS_PER_SEC) {
        Ok(secs) => Duration::new(secs, (nanos % NANOS_PER_SEC) as u32),
        Err(_) => Duration::MAX,
    }
}
