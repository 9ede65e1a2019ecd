//! One-shot "reset/stop" timers for network protocol stacks.
//!
//! A network stack's retransmission and keepalive timers want a much
//! simpler interface than [`Timer`]: a callback that runs once, some
//! duration from now, which can be pushed back with
//! [`reset`](TcpipTimer::reset) or cancelled with
//! [`stop`](TcpipTimer::stop). [`TcpipTimer`] provides that interface on top
//! of a [`Timer`] bound to a virtual [`Clock`], so that protocol timers
//! follow the sandbox's notion of time.
//!
//! # Callback Context
//!
//! The callback never runs inside the timer's notification: when the timer
//! fires, a task is handed to an [`Executor`], which stops the
//! `TcpipTimer` and then runs the callback. The callback is therefore free to
//! block, take locks, and [`reset`](TcpipTimer::reset) its own timer.
//!
//! Note that the deferred task stops the timer *before* running the
//! callback. A [`reset`](TcpipTimer::reset) made from elsewhere after the
//! timer fired, but before its task ran, is cancelled by that stop. Code that
//! needs to re-arm a timer once it fires should do so from the callback.
//!
//! # Examples
//!
//! ```
//! use ktime::{
//!     executor::RunQueue,
//!     tcpip,
//!     time::{Duration, VirtualClock},
//! };
//! use std::sync::{
//!     atomic::{AtomicUsize, Ordering},
//!     Arc,
//! };
//!
//! let clock = Arc::new(VirtualClock::new());
//! let executor = Arc::new(RunQueue::new());
//! let fired = Arc::new(AtomicUsize::new(0));
//!
//! let timer = tcpip::after_func_on(executor.clone(), clock.clone(), Duration::from_millis(100), {
//!     let fired = fired.clone();
//!     move || {
//!         fired.fetch_add(1, Ordering::SeqCst);
//!     }
//! });
//!
//! // 30ms in, push the deadline back to 50ms from now.
//! clock.advance(Duration::from_millis(30));
//! timer.reset(Duration::from_millis(50));
//!
//! clock.advance(Duration::from_millis(49));
//! executor.run_until_idle();
//! assert_eq!(fired.load(Ordering::SeqCst), 0);
//!
//! clock.advance(Duration::from_millis(1));
//! executor.run_until_idle();
//! assert_eq!(fired.load(Ordering::SeqCst), 1);
//!
//! // the timer stopped itself before running the callback.
//! assert!(!timer.is_armed());
//! assert!(!timer.stop());
//! ```
use crate::{
    executor::{self, Executor, ExecutorError},
    time::{Clock, Duration, Setting, Timer, TimerListener},
    util::expect_display,
};
use core::fmt;
use maitake_sync::blocking::Mutex;
use std::sync::{Arc, Weak};

/// A one-shot timer which runs a callback once its duration elapses.
///
/// A `TcpipTimer` is either *stopped* or *armed*. [`reset`](Self::reset)
/// arms it, and [`stop`](Self::stop) stops it; once it fires, it stops itself
/// before running its callback. Every time a stopped `TcpipTimer` is armed, a
/// fresh [`Timer`] is created for it.
///
/// # Dropping Timers
///
/// Dropping a `TcpipTimer` does **not** stop it. An armed timer whose handle
/// is dropped keeps running until it fires, and its callback still runs; the
/// timer's resources are released once that callback's task has stopped it.
/// Call [`stop`](Self::stop) before dropping the handle to cancel the timer.
/// Dropping a stopped `TcpipTimer` releases it immediately.
pub struct TcpipTimer {
    inner: Arc<Inner>,
}

struct Inner {
    clock: Arc<dyn Clock>,
    notifier: Arc<FunctionNotifier>,
    state: Mutex<State>,

    /// Keeps the adapter alive while it is armed and its handle has been
    /// dropped. Cleared by the next `stop`.
    detached: Mutex<Option<Arc<Inner>>>,
}

enum State {
    Stopped,
    Armed(Timer),
}

/// The [`TimerListener`] behind a [`TcpipTimer`].
///
/// It ignores the expiration count and setting, hands a task to its
/// executor which stops the owning `TcpipTimer` and then runs the callback,
/// and disables the timer.
pub(crate) struct FunctionNotifier {
    adapter: Weak<Inner>,
    executor: Arc<dyn Executor>,
    callback: Arc<dyn Fn() + Send + Sync>,
}

/// Returns a new [`TcpipTimer`], which runs `f` on the
/// [default executor](executor::default_executor) once `duration` has elapsed
/// on `clock`.
///
/// # Panics
///
/// If the default executor has not been initialized yet, and its worker
/// threads could not be started. Use [`try_after_func`] to handle that error
/// instead.
#[track_caller]
pub fn after_func(
    clock: Arc<dyn Clock>,
    duration: Duration,
    f: impl Fn() + Send + Sync + 'static,
) -> TcpipTimer {
    expect_display(
        try_after_func(clock, duration, f),
        "failed to start the default executor",
    )
}

/// Returns a new [`TcpipTimer`], which runs `f` on the
/// [default executor](executor::default_executor) once `duration` has elapsed
/// on `clock`.
///
/// # Errors
///
/// - [`ExecutorError::Spawn`] if the default executor had to be started, and
///   its worker threads could not be spawned.
pub fn try_after_func(
    clock: Arc<dyn Clock>,
    duration: Duration,
    f: impl Fn() + Send + Sync + 'static,
) -> Result<TcpipTimer, ExecutorError> {
    let executor = executor::default_executor()?;
    Ok(after_func_on(executor, clock, duration, f))
}

/// Returns a new [`TcpipTimer`], which runs `f` on `executor` once `duration`
/// has elapsed on `clock`.
///
/// The returned handle is only needed to [`reset`](TcpipTimer::reset) or
/// [`stop`](TcpipTimer::stop) the timer. Dropping it leaves the timer armed.
pub fn after_func_on(
    executor: Arc<dyn Executor>,
    clock: Arc<dyn Clock>,
    duration: Duration,
    f: impl Fn() + Send + Sync + 'static,
) -> TcpipTimer {
    let timer = TcpipTimer::new(executor, clock, f);
    timer.reset(duration);
    timer
}

// === impl TcpipTimer ===

impl TcpipTimer {
    /// Returns a new, stopped `TcpipTimer` which will run `f` on `executor`
    /// each time it fires.
    #[must_use]
    pub fn new(
        executor: Arc<dyn Executor>,
        clock: Arc<dyn Clock>,
        f: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        let callback: Arc<dyn Fn() + Send + Sync> = Arc::new(f);
        let inner = Arc::new_cyclic(|adapter| Inner {
            clock,
            notifier: Arc::new(FunctionNotifier {
                adapter: adapter.clone(),
                executor,
                callback,
            }),
            state: Mutex::new(State::Stopped),
            detached: Mutex::new(None),
        });
        Self { inner }
    }

    /// Arms this timer to fire once `duration` from now.
    ///
    /// If the timer is already armed, its deadline is replaced. If it is
    /// stopped, a new [`Timer`] is created.
    pub fn reset(&self, duration: Duration) {
        self.inner.reset(duration)
    }

    /// Stops this timer.
    ///
    /// # Returns
    ///
    /// - `true` if the timer was armed when it was stopped. Its callback will
    ///   not run.
    /// - `false` if the timer was already stopped, or if its expiration was
    ///   already claimed (in which case the callback runs exactly once).
    pub fn stop(&self) -> bool {
        self.inner.stop()
    }

    /// Returns `true` if this timer is currently armed.
    ///
    /// This is a diagnostic: the answer may be stale by the time it is
    /// returned.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.inner
            .state
            .with_lock(|state| matches!(state, State::Armed(_)))
    }
}

impl Drop for TcpipTimer {
    fn drop(&mut self) {
        self.inner.detach();
    }
}

impl fmt::Debug for TcpipTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.state.with_lock(|state| {
            let mut dbg = f.debug_struct("TcpipTimer");
            match state {
                State::Stopped => dbg.field("state", &"Stopped"),
                State::Armed(timer) => dbg.field("state", &"Armed").field("timer", timer),
            }
            .finish()
        })
    }
}

// === impl Inner ===

impl Inner {
    fn reset(&self, duration: Duration) {
        self.state.with_lock(|state| {
            if let State::Stopped = state {
                let timer = Timer::new(self.clock.clone(), self.notifier.clone());
                trace!(timer.id = %timer.id(), "arming stopped tcpip timer");
                *state = State::Armed(timer);
            }

            if let State::Armed(timer) = state {
                let next = self.clock.now().saturating_add(duration);
                timer.swap(Setting::one_shot(next));
            }
        })
    }

    fn stop(&self) -> bool {
        let (was_armed, detached) = self.state.with_lock(|state| {
            let was_armed = match core::mem::replace(state, State::Stopped) {
                State::Stopped => false,
                State::Armed(timer) => {
                    let (previous, _) = timer.swap(Setting::default());
                    trace!(timer.id = %timer.id(), was_armed = previous.enabled, "stopped tcpip timer");
                    timer.destroy();
                    previous.enabled
                }
            };
            (was_armed, self.detached.with_lock(Option::take))
        });
        // a detached adapter is only stopped by its own callback task, which
        // holds another reference, so this is never the last one.
        drop(detached);
        was_armed
    }

    /// Called when the handle is dropped. An armed adapter keeps a reference
    /// to itself until it is stopped, so that it still fires.
    fn detach(self: &Arc<Self>) {
        self.state.with_lock(|state| {
            if let State::Armed(timer) = state {
                trace!(timer.id = %timer.id(), "tcpip timer handle dropped while armed");
                let this = self.clone();
                self.detached.with_lock(|detached| *detached = Some(this));
            }
        })
    }
}

// === impl FunctionNotifier ===

impl TimerListener for FunctionNotifier {
    #[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
    fn notify(&self, _: u64, _: Setting) -> (Setting, bool) {
        let adapter = self.adapter.clone();
        let callback = self.callback.clone();
        let task = Box::new(move || {
            if let Some(adapter) = adapter.upgrade() {
                adapter.stop();
            }
            callback();
        });

        if let Err(error) = self.executor.execute(task) {
            warn!(%error, "executor refused timer callback; expiration dropped");
        }
        (Setting::default(), false)
    }
}
