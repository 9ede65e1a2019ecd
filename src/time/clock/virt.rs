use super::{Clock, Expiry, Instant, TimerId};
use crate::loom::sync::atomic::{AtomicU64, Ordering::*};
use core::{fmt, time::Duration};
use maitake_sync::blocking::Mutex;
use std::collections::{BTreeMap, HashMap};

/// A manually driven [`Clock`].
///
/// A `VirtualClock` starts at its epoch ([`Instant::ZERO`], unless
/// constructed with [`VirtualClock::starting_at`]) and only moves when told
/// to, by calling [`VirtualClock::advance`] or [`VirtualClock::set`].
///
/// # Driving the Clock
///
/// &#x26a0;&#xfe0f; *A clock at rest will remain at rest unless acted upon by
/// an outside force!*
///
/// Advancing the clock also *turns* it: every [`Timer`] whose deadline has
/// been reached is fired, on the thread that advanced the clock. This makes
/// the driver of the clock the firing context for all timers bound to it.
/// [`VirtualClock::turn`] may also be called directly, for example after
/// timers were armed with deadlines that have already passed.
///
/// Timers armed *during* a turn with a deadline that has already been reached
/// are not fired by that turn; they fire on the next one. This bounds the
/// amount of work done by a single turn, even if a listener keeps re-arming
/// its timer in the past.
///
/// [`Timer`]: crate::time::Timer
pub struct VirtualClock {
    name: &'static str,

    /// The current time, in nanoseconds since the epoch.
    now: AtomicU64,

    /// Registered timers, ordered by deadline.
    queue: Mutex<Queue>,
}

/// Represents a single turn of a [`VirtualClock`].
#[derive(Debug)]
#[non_exhaustive]
pub struct Turn {
    /// The clock's time when the turn began.
    pub now: Instant,

    /// The number of timers whose listeners were notified by this turn.
    pub expired: usize,

    /// The deadline of the next registered timer, once this turn completed.
    next_deadline: Option<Instant>,
}

#[derive(Default)]
struct Queue {
    by_deadline: BTreeMap<(Instant, TimerId), Expiry>,
    deadlines: HashMap<TimerId, Instant>,
}

// === impl VirtualClock ===

impl VirtualClock {
    /// Returns a new `VirtualClock` whose time starts at [`Instant::ZERO`].
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Instant::ZERO)
    }

    /// Returns a new `VirtualClock` whose time starts at `start`.
    #[must_use]
    pub fn starting_at(start: Instant) -> Self {
        Self {
            name: "<unnamed virtual clock>",
            now: AtomicU64::new(start.as_nanos_saturating()),
            queue: Mutex::new(Queue::default()),
        }
    }

    /// Add an arbitrary user-defined name to this `VirtualClock`.
    ///
    /// This is generally used to describe what the clock's time represents
    /// (such as `"monotonic"` or `"realtime"`), and shows up in
    /// [`fmt::Debug`] output and diagnostics.
    #[must_use]
    pub fn named(self, name: &'static str) -> Self {
        Self { name, ..self }
    }

    /// Returns this clock's name, if it was given one using
    /// [`VirtualClock::named`].
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the current time of this clock.
    #[must_use]
    pub fn now(&self) -> Instant {
        Instant::from_nanos(self.now.load(Acquire))
    }

    /// Advances the clock by `duration`, and then [turns](Self::turn) it.
    pub fn advance(&self, duration: Duration) -> Turn {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        let _ = self
            .now
            .fetch_update(AcqRel, Acquire, |now| Some(now.saturating_add(nanos)));
        debug!(clock = self.name, ?duration, now = ?self.now(), "advanced clock");
        self.turn()
    }

    /// Sets the clock's time to `t`, and then [turns](Self::turn) it.
    ///
    /// A clock never goes backwards: if `t` is earlier than the current time,
    /// the time is left unchanged (but the clock is still turned).
    pub fn set(&self, t: Instant) -> Turn {
        let prev = self.now.fetch_max(t.as_nanos_saturating(), AcqRel);
        debug!(clock = self.name, prev, now = ?self.now(), "set clock");
        self.turn()
    }

    /// Fires every timer whose deadline is at or before the current time.
    ///
    /// # Returns
    ///
    /// A [`Turn`] describing what happened during this turn, including the
    /// [deadline of the next registered timer](Turn::time_to_next_deadline),
    /// if there is one.
    pub fn turn(&self) -> Turn {
        let now = self.now();
        // take every due registration out of the queue before firing any of
        // them, so that firing timers may re-arm without deadlocking.
        let due = self.queue.with_lock(|queue| queue.take_due(now));
        let due_count = due.len();

        let mut expired = 0;
        for expiry in due {
            trace!(clock = self.name, timer.id = %expiry.id(), ?now, "firing timer");
            if expiry.fire() {
                expired += 1;
            }
        }

        let next_deadline = self.next_deadline();
        if due_count > 0 {
            debug!(
                clock = self.name,
                ?now,
                due = due_count,
                expired,
                ?next_deadline,
                "turned clock"
            );
        }

        Turn {
            now,
            expired,
            next_deadline,
        }
    }

    /// Returns the deadline of the earliest registered timer, or [`None`] if
    /// no timers are registered.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.with_lock(|queue| queue.next_deadline())
    }

    /// Returns the number of timers currently registered with this clock.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.with_lock(|queue| queue.deadlines.len())
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Instant {
        VirtualClock::now(self)
    }

    fn arm(&self, deadline: Instant, expiry: Expiry) {
        trace!(clock = self.name, timer.id = %expiry.id(), ?deadline, "arming timer");
        self.queue.with_lock(|queue| queue.insert(deadline, expiry));
    }

    fn disarm(&self, timer: TimerId) {
        let removed = self.queue.with_lock(|queue| queue.remove(timer));
        trace!(clock = self.name, timer.id = %timer, removed, "disarmed timer");
    }
}

impl fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualClock")
            .field("name", &self.name)
            .field("now", &self.now())
            .field("pending", &self.pending())
            .finish()
    }
}

// === impl Queue ===

impl Queue {
    fn insert(&mut self, deadline: Instant, expiry: Expiry) {
        let id = expiry.id();
        if let Some(prev) = self.deadlines.insert(id, deadline) {
            self.by_deadline.remove(&(prev, id));
        }
        self.by_deadline.insert((deadline, id), expiry);
    }

    fn remove(&mut self, id: TimerId) -> bool {
        match self.deadlines.remove(&id) {
            Some(deadline) => self.by_deadline.remove(&(deadline, id)).is_some(),
            None => false,
        }
    }

    fn take_due(&mut self, now: Instant) -> Vec<Expiry> {
        let mut due = Vec::new();
        while let Some(entry) = self.by_deadline.first_entry() {
            let &(deadline, id) = entry.key();
            if deadline > now {
                break;
            }
            due.push(entry.remove());
            self.deadlines.remove(&id);
        }
        due
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.by_deadline
            .first_key_value()
            .map(|(&(deadline, _), _)| deadline)
    }
}

// === impl Turn ===

impl Turn {
    /// Returns the deadline of the next registered timer, or [`None`] if no
    /// timers are registered.
    #[inline]
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_deadline
    }

    /// Returns the [`Duration`] from the time at which this turn began to the
    /// deadline of the next registered timer, or [`None`] if no timers are
    /// registered.
    ///
    /// If the next deadline was already reached (a timer re-armed itself in
    /// the past during this turn), this returns [`Duration::ZERO`].
    #[inline]
    #[must_use]
    pub fn time_to_next_deadline(&self) -> Option<Duration> {
        self.next_deadline
            .map(|deadline| deadline.duration_since(self.now))
    }

    /// Returns `true` if timers are still registered with the clock after
    /// this turn.
    #[inline]
    #[must_use]
    pub fn has_remaining(&self) -> bool {
        self.next_deadline.is_some()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::time::{Setting, Timer, TimerListener};
    use std::sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    };

    #[derive(Default)]
    struct Count(AtomicU64);

    impl TimerListener for Count {
        fn notify(&self, expirations: u64, _: Setting) -> (Setting, bool) {
            self.0.fetch_add(expirations, Ordering::SeqCst);
            (Setting::default(), false)
        }
    }

    fn fixture() -> (Arc<VirtualClock>, Arc<Count>) {
        (
            Arc::new(VirtualClock::new().named("test")),
            Arc::new(Count::default()),
        )
    }

    #[test]
    fn clock_never_goes_backwards() {
        let _trace = crate::util::test::trace_init();
        let clock = VirtualClock::starting_at(Instant::from_elapsed(Duration::from_secs(5)));
        clock.set(Instant::from_elapsed(Duration::from_secs(1)));
        assert_eq!(clock.now(), Instant::from_elapsed(Duration::from_secs(5)));

        clock.advance(Duration::from_secs(2));
        assert_eq!(clock.now(), Instant::from_elapsed(Duration::from_secs(7)));

        clock.set(Instant::from_elapsed(Duration::from_secs(10)));
        assert_eq!(clock.now(), Instant::from_elapsed(Duration::from_secs(10)));
    }

    #[test]
    fn turn_reports_next_deadline() {
        let _trace = crate::util::test::trace_init();
        let (clock, count) = fixture();
        let t1 = Timer::new(clock.clone(), count.clone());
        let t2 = Timer::new(clock.clone(), count.clone());
        t1.swap(Setting::one_shot(Instant::from_elapsed(Duration::from_millis(10))));
        t2.swap(Setting::one_shot(Instant::from_elapsed(Duration::from_millis(25))));
        assert_eq!(clock.pending(), 2);

        let turn = clock.advance(Duration::from_millis(5));
        assert_eq!(turn.expired, 0);
        assert_eq!(turn.time_to_next_deadline(), Some(Duration::from_millis(5)));

        let turn = clock.advance(Duration::from_millis(5));
        assert_eq!(turn.expired, 1);
        assert_eq!(turn.time_to_next_deadline(), Some(Duration::from_millis(15)));
        assert!(turn.has_remaining());

        let turn = clock.advance(Duration::from_secs(1));
        assert_eq!(turn.expired, 1);
        assert!(!turn.has_remaining());
        assert_eq!(turn.time_to_next_deadline(), None);
        assert_eq!(count.0.load(Ordering::SeqCst), 2);
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn rearming_replaces_registration() {
        let _trace = crate::util::test::trace_init();
        let (clock, count) = fixture();
        let timer = Timer::new(clock.clone(), count.clone());
        for ms in [30, 20, 10] {
            timer.swap(Setting::one_shot(Instant::from_elapsed(Duration::from_millis(ms))));
        }
        assert_eq!(clock.pending(), 1);
        assert_eq!(
            clock.next_deadline(),
            Some(Instant::from_elapsed(Duration::from_millis(10)))
        );

        let turn = clock.advance(Duration::from_millis(100));
        assert_eq!(turn.expired, 1);
        assert_eq!(count.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_timers_do_not_fire() {
        let _trace = crate::util::test::trace_init();
        let (clock, count) = fixture();
        let timer = Timer::new(clock.clone(), count.clone());
        timer.swap(Setting::one_shot(Instant::from_elapsed(Duration::from_millis(10))));
        drop(timer);

        assert_eq!(clock.pending(), 0);
        let turn = clock.advance(Duration::from_millis(100));
        assert_eq!(turn.expired, 0);
        assert_eq!(count.0.load(Ordering::SeqCst), 0);
    }
}
