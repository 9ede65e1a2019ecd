//! A [`Timer`] binds a [`Setting`] to a [`Clock`], and notifies a
//! [`TimerListener`] when that setting's deadline elapses.
//!
//! See the [`Timer`] type's documentation for details.
use super::{
    clock::{Clock, Expiry, Instant, TimerId},
    listener::TimerListener,
    Setting,
};
use core::fmt;
use maitake_sync::blocking::Mutex;
use std::sync::{Arc, Weak};


/// A resettable timer driven by a virtual [`Clock`].
///
/// A `Timer` holds exactly one [`Setting`] at a time. When the clock's time
/// reaches that setting's deadline, the timer calls its [`TimerListener`]'s
/// [`notify`] method, which decides whether (and how) the timer is re-armed.
///
/// # Reconfiguring Timers
///
/// A timer is reconfigured by atomically [swapping](Timer::swap) in a new
/// `Setting`. A swap is a single instant at which one setting supersedes
/// another: if the previous setting's deadline had already been reached but
/// the clock had not yet fired the timer, the swap delivers those
/// expirations to the listener itself, so that an expiration is never lost,
/// and never claimed both by the firing clock and by the swap.
///
/// # Listener Reentrancy
///
/// The listener is called with the timer's internal lock held, from whatever
/// context fired the timer (usually the clock's driver). A listener must
/// **never** block, and must **never** call back into the same `Timer`: doing
/// so will deadlock. Work that needs to reconfigure the timer, perform I/O, or
/// run arbitrary user code must be deferred to an [`Executor`], as
/// [`TcpipTimer`] does.
///
/// # Destroying Timers
///
/// [`Timer::destroy`] consumes the timer, so a destroyed timer cannot be used
/// again. Dropping a `Timer` destroys it as well. Once a timer is destroyed, no
/// new notifications will start. A notification that is already in progress
/// when the timer is destroyed is allowed to complete: `destroy` waits for it
/// to return.
///
/// # Checkpointing
///
/// A timer can be [paused](Timer::pause), which stops all notifications, and
/// later [resumed](Timer::resume). When a periodic timer is resumed, every
/// period that elapsed while it was paused is coalesced into a single
/// notification.
///
/// [`notify`]: TimerListener::notify
/// [`Executor`]: crate::executor::Executor
/// [`TcpipTimer`]: crate::tcpip::TcpipTimer
pub struct Timer {
    shared: Arc<Shared>,
}

pub(in crate::time) struct Shared {
    id: TimerId,
    clock: Arc<dyn Clock>,
    listener: Arc<dyn TimerListener>,
    state: Mutex<State>,
    this: Weak<Shared>,
}

#[derive(Debug)]
struct State {
    /// The current setting.
    setting: Setting,

    /// The setting most recently handed to the listener by the firing path.
    observed: Setting,

    /// Incremented every time the timer's registration with the clock
    /// changes, invalidating any outstanding [`Expiry`].
    generation: u64,

    paused: bool,
    destroyed: bool,
}

/// What to do with the setting returned by the listener.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Rearm {
    /// Install the returned setting if the listener asked for it.
    Apply,
    /// Discard it: the caller is about to overwrite the setting anyway.
    Discard,
}

// === impl Timer ===

impl Timer {
    /// Returns a new, disarmed `Timer` bound to `clock`, which will notify
    /// `listener` when it expires.
    ///
    /// The timer does nothing until it is given an enabled [`Setting`] using
    /// [`Timer::swap`].
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, listener: Arc<dyn TimerListener>) -> Self {
        let shared = Arc::new_cyclic(|this| Shared {
            id: TimerId::next(),
            clock,
            listener,
            state: Mutex::new(State {
                setting: Setting::default(),
                observed: Setting::default(),
                generation: 0,
                paused: false,
                destroyed: false,
            }),
            this: this.clone(),
        });
        debug!(timer.id = %shared.id, "created timer");
        Self { shared }
    }

    /// Returns this timer's [`TimerId`].
    #[must_use]
    pub fn id(&self) -> TimerId {
        self.shared.id
    }

    /// Borrows the [`Clock`] this timer is bound to.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.shared.clock
    }

    /// Atomically replaces this timer's current [`Setting`] with `setting`.
    ///
    /// # Returns
    ///
    /// A tuple of `(previous, last_observed)`, where:
    ///
    /// - `previous` is the setting that was in effect immediately before the
    ///   swap, as of the instant of the swap. If its deadline had already been
    ///   reached, but the clock had not fired the timer yet, those
    ///   expirations are delivered to the listener by the swap, and
    ///   `previous` reflects the setting *after* them (so a one-shot setting
    ///   whose expiration was delivered by the swap is returned disabled).
    /// - `last_observed` is the setting that was most recently handed to the
    ///   listener, or [`Setting::default()`] if the timer has never fired.
    ///
    /// When an expiration is delivered by the swap, the setting returned by
    /// the listener is discarded, since it is immediately replaced by
    /// `setting`.
    pub fn swap(&self, setting: Setting) -> (Setting, Setting) {
        self.shared.swap(setting)
    }

    /// Returns the current time, and this timer's current [`Setting`] as of
    /// that time.
    ///
    /// If the timer's deadline has been reached but the clock has not fired
    /// it yet, the expirations are delivered to the listener first, exactly
    /// as if the clock had fired the timer.
    pub fn get(&self) -> (Instant, Setting) {
        self.shared.get()
    }

    /// Pauses this timer.
    ///
    /// While paused, the timer's setting is retained, but the listener is
    /// never notified.
    pub fn pause(&self) {
        self.shared.pause()
    }

    /// Resumes this timer after it was [paused](Timer::pause).
    ///
    /// If the timer's deadline was reached while it was paused, the listener
    /// is notified immediately, with every period that elapsed coalesced into a
    /// single notification.
    pub fn resume(&self) {
        self.shared.resume()
    }

    /// Destroys this timer.
    ///
    /// This removes the timer's registration with its clock, and calls the
    /// listener's [`destroy`](TimerListener::destroy) method. No new
    /// notifications will start once `destroy` returns.
    pub fn destroy(self) {
        // the actual teardown happens in `Drop`.
        drop(self)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shared.destroy()
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("id", &self.shared.id)
            .finish_non_exhaustive()
    }
}

// === impl Shared ===

impl Shared {
    /// Called by the clock when a registration made by this timer fires.
    pub(in crate::time) fn expire(&self, generation: u64) -> bool {
        self.state.with_lock(|state| {
            if state.destroyed || state.paused || state.generation != generation {
                trace!(
                    timer.id = %self.id,
                    generation,
                    current = state.generation,
                    state.destroyed,
                    state.paused,
                    "stale expiry"
                );
                return false;
            }

            let now = self.clock.now();
            let notified = self.advance_locked(state, now, Rearm::Apply);
            self.schedule_locked(state);
            notified
        })
    }

    fn swap(&self, setting: Setting) -> (Setting, Setting) {
        self.state.with_lock(|state| {
            debug_assert!(!state.destroyed, "swapped a destroyed timer");
            let now = self.clock.now();
            if !state.paused {
                self.advance_locked(state, now, Rearm::Discard);
            }
            let previous = state.setting;
            state.setting = setting;
            debug!(
                timer.id = %self.id,
                ?now,
                previous.enabled,
                setting.enabled,
                setting.next = ?setting.next,
                setting.period = ?setting.period,
                "swapped timer setting"
            );
            self.schedule_locked(state);
            (previous, state.observed)
        })
    }

    fn get(&self) -> (Instant, Setting) {
        self.state.with_lock(|state| {
            let now = self.clock.now();
            if !state.paused && self.advance_locked(state, now, Rearm::Apply) {
                self.schedule_locked(state);
            }
            (now, state.setting)
        })
    }

    fn pause(&self) {
        self.state.with_lock(|state| {
            if state.paused {
                return;
            }
            state.paused = true;
            debug!(timer.id = %self.id, "paused timer");
            self.schedule_locked(state);
        })
    }

    fn resume(&self) {
        self.state.with_lock(|state| {
            if !state.paused {
                return;
            }
            state.paused = false;
            let now = self.clock.now();
            debug!(timer.id = %self.id, ?now, "resumed timer");
            self.advance_locked(state, now, Rearm::Apply);
            self.schedule_locked(state);
        })
    }

    fn destroy(&self) {
        let destroyed = self.state.with_lock(|state| {
            if state.destroyed {
                return false;
            }
            state.destroyed = true;
            self.schedule_locked(state);
            true
        });

        if destroyed {
            debug!(timer.id = %self.id, "destroyed timer");
            self.listener.destroy();
        }
    }

    /// Evaluates the current setting at `now`, notifying the listener if any
    /// expirations have elapsed. Returns `true` if the listener was notified.
    fn advance_locked(&self, state: &mut State, now: Instant, rearm: Rearm) -> bool {
        let (setting, expirations) = state.setting.at(now);
        state.setting = setting;
        if expirations == 0 {
            return false;
        }

        state.observed = setting;
        trace!(
            timer.id = %self.id,
            ?now,
            expirations,
            setting.enabled,
            setting.next = ?setting.next,
            "notifying listener"
        );
        let (next, should_rearm) = self.listener.notify(expirations, setting);
        if rearm == Rearm::Apply {
            state.setting = if should_rearm { next } else { setting.disabled() };
        }
        true
    }

    /// Updates the timer's registration with its clock to match its current
    /// state.
    fn schedule_locked(&self, state: &mut State) {
        state.generation = state.generation.wrapping_add(1);
        if state.destroyed || state.paused || !state.setting.enabled {
            self.clock.disarm(self.id);
            return;
        }

        let expiry = Expiry::new(self.id, state.generation, self.this.clone());
        self.clock.arm(state.setting.next, expiry);
    }
}
