use super::Setting;
use crate::loom::sync::atomic::{AtomicU64, Ordering::*};

/// Receives notifications from a [`Timer`](super::Timer) when its
/// [`Setting`]'s deadline elapses.
///
/// # Reentrancy
///
/// [`notify`](TimerListener::notify) is called with the timer's internal lock
/// held, usually from within the clock's firing mechanism. Implementations
/// must **not** block, and must **not** call back into the timer that is
/// notifying them. Any follow-up work (such as reconfiguring the timer, or
/// running user code) must be handed off to an
/// [`Executor`](crate::executor::Executor).
///
/// [`destroy`](TimerListener::destroy) is called once, after the last
/// notification has returned.
pub trait TimerListener: Send + Sync {
    /// Called when the timer's deadline has elapsed.
    ///
    /// `expirations` is the number of expirations that elapsed since the
    /// timer was last evaluated (always at least one). For periodic settings,
    /// periods which were missed because the timer could not be evaluated in
    /// time are coalesced into this count. `setting` is the timer's setting
    /// after those expirations.
    ///
    /// # Returns
    ///
    /// A tuple of `(setting, rearm)`. If `rearm` is `true`, the returned
    /// `setting` is installed as the timer's new setting. Otherwise, the timer
    /// is disabled until it is reconfigured.
    fn notify(&self, expirations: u64, setting: Setting) -> (Setting, bool);

    /// Called when the timer is destroyed.
    fn destroy(&self) {}
}

/// A [`TimerListener`] that counts expirations, and keeps periodic timers
/// running.
///
/// This is the bookkeeping behind interval timers: the owner of the timer
/// periodically [takes](ExpirationCounter::take) the accumulated count, and
/// any expirations beyond the first are overruns.
#[derive(Debug)]
pub struct ExpirationCounter {
    expirations: AtomicU64,
    notifications: AtomicU64,
}

impl ExpirationCounter {
    /// Returns a new `ExpirationCounter` with no recorded expirations.
    #[must_use]
    pub fn new() -> Self {
        Self {
            expirations: AtomicU64::new(0),
            notifications: AtomicU64::new(0),
        }
    }

    /// Returns the total number of expirations recorded since the last call
    /// to [`take`](Self::take).
    #[must_use]
    pub fn expirations(&self) -> u64 {
        self.expirations.load(Acquire)
    }

    /// Returns the number of times the timer notified this listener.
    #[must_use]
    pub fn notifications(&self) -> u64 {
        self.notifications.load(Acquire)
    }

    /// Returns the number of expirations recorded since the last call to
    /// `take`, and resets the count to zero.
    pub fn take(&self) -> u64 {
        self.expirations.swap(0, AcqRel)
    }
}

impl Default for ExpirationCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerListener for ExpirationCounter {
    fn notify(&self, expirations: u64, setting: Setting) -> (Setting, bool) {
        self.expirations.fetch_add(expirations, AcqRel);
        self.notifications.fetch_add(1, AcqRel);
        (setting, true)
    }
}
