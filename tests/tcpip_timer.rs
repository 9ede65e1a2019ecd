use ktime::{
    executor::{RunQueue, WorkerPool},
    tcpip::{self, TcpipTimer},
    time::VirtualClock,
};
use std::{
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc,
    },
    time::Duration,
};

mod util;
use util::{ms, trace_init, StalledClock};

/// A virtual clock and a run queue, so that tests decide exactly when
/// timers fire and when their callbacks run.
struct Harness {
    clock: Arc<VirtualClock>,
    queue: Arc<RunQueue>,
    fired: Arc<AtomicUsize>,
}

impl Harness {
    fn new() -> Self {
        trace_init();
        Self {
            clock: Arc::new(VirtualClock::new().named("harness")),
            queue: Arc::new(RunQueue::new()),
            fired: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn after(&self, duration: Duration) -> TcpipTimer {
        let fired = self.fired.clone();
        tcpip::after_func_on(self.queue.clone(), self.clock.clone(), duration, move || {
            fired.fetch_add(1, Ordering::SeqCst);
        })
    }

    /// Advances the clock to `ms` milliseconds since the epoch, and runs any
    /// callbacks that became ready.
    fn advance_to(&self, ms: u64) {
        self.clock
            .set(ktime::time::Instant::from_elapsed(Duration::from_millis(ms)));
        self.queue.run_until_idle();
    }

    fn fired(&self) -> usize {
        self.fired.load(Ordering::SeqCst)
    }
}

#[test]
fn stop_is_idempotent() {
    let harness = Harness::new();
    let timer = harness.after(ms(100));

    assert!(timer.stop());
    assert!(!timer.stop());
    assert!(!timer.stop());

    harness.advance_to(1_000);
    assert_eq!(harness.fired(), 0);
}

#[test]
fn stop_before_deadline_cancels() {
    let harness = Harness::new();
    let timer = harness.after(ms(100));

    harness.advance_to(99);
    assert!(timer.stop(), "timer was armed when it was stopped");
    harness.advance_to(10_000);
    assert_eq!(harness.fired(), 0);
}

#[test]
fn fires_exactly_once_after_resets() {
    let harness = Harness::new();
    let timer = harness.after(ms(100));

    harness.advance_to(10);
    timer.reset(ms(100));
    harness.advance_to(20);
    timer.reset(ms(100));

    harness.advance_to(119);
    assert_eq!(harness.fired(), 0, "resets push the deadline back");
    harness.advance_to(120);
    assert_eq!(harness.fired(), 1);
    harness.advance_to(1_000);
    assert_eq!(harness.fired(), 1, "superseded deadlines never fire");
}

#[test]
fn reset_is_relative_to_call_time() {
    let harness = Harness::new();
    let timer = harness.after(ms(100));

    harness.advance_to(30);
    timer.reset(ms(50));

    harness.advance_to(79);
    assert_eq!(harness.fired(), 0);
    harness.advance_to(80);
    assert_eq!(harness.fired(), 1, "fires at 30ms + 50ms");

    harness.advance_to(100);
    harness.advance_to(130);
    assert_eq!(harness.fired(), 1, "neither the initial nor a cumulative deadline fires");
    assert!(!timer.is_armed());
}

#[test]
fn reset_after_stop_fires_once() {
    let harness = Harness::new();
    let timer = harness.after(ms(100));

    harness.advance_to(10);
    assert!(timer.stop());
    harness.advance_to(20);
    timer.reset(ms(30));
    assert!(timer.is_armed());

    harness.advance_to(49);
    assert_eq!(harness.fired(), 0);
    harness.advance_to(50);
    assert_eq!(harness.fired(), 1);
    harness.advance_to(500);
    assert_eq!(harness.fired(), 1);
}

#[test]
fn reset_after_firing_fires_again() {
    let harness = Harness::new();
    let timer = harness.after(ms(10));

    harness.advance_to(10);
    assert_eq!(harness.fired(), 1);
    assert!(!timer.stop(), "a fired timer is stopped");

    timer.reset(ms(10));
    harness.advance_to(20);
    assert_eq!(harness.fired(), 2);
}

#[test]
fn discarded_timer_still_fires() {
    let harness = Harness::new();
    let _ = harness.after(ms(10));
    assert_eq!(harness.clock.pending(), 1, "the discarded timer is still armed");

    harness.advance_to(9);
    assert_eq!(harness.fired(), 0);
    harness.advance_to(10);
    assert_eq!(harness.fired(), 1);
    assert_eq!(harness.clock.pending(), 0);

    harness.advance_to(1_000);
    assert_eq!(harness.fired(), 1);
}

#[test]
fn stop_then_discard_cancels() {
    let harness = Harness::new();
    let timer = harness.after(ms(10));
    assert!(timer.stop());
    drop(timer);

    harness.advance_to(1_000);
    assert_eq!(harness.fired(), 0);
}

#[test]
fn stop_racing_due_expiration() {
    trace_init();
    let clock = Arc::new(StalledClock::new());
    let queue = Arc::new(RunQueue::new());
    let fired = Arc::new(AtomicUsize::new(0));
    let timer = tcpip::after_func_on(queue.clone(), clock.clone(), ms(10), {
        let fired = fired.clone();
        move || {
            fired.fetch_add(1, Ordering::SeqCst);
        }
    });

    // the deadline passes, but the clock has not fired the timer yet.
    clock.set(ms(20));
    assert_eq!(clock.armed(), 1);

    assert!(
        !timer.stop(),
        "the expiration was claimed before the timer stopped"
    );
    assert_eq!(clock.armed(), 0);
    assert_eq!(clock.fire_due(), 0);

    assert_eq!(queue.run_until_idle(), 1);
    assert_eq!(fired.load(Ordering::SeqCst), 1, "the callback runs exactly once");
}

#[test]
fn runs_callbacks_on_worker_pool() {
    trace_init();
    let pool = Arc::new(
        WorkerPool::builder()
            .workers(NonZeroUsize::new(2).unwrap())
            .thread_name("tcpip-test")
            .build()
            .unwrap(),
    );
    let clock = Arc::new(VirtualClock::new());
    let (tx, rx) = mpsc::channel();

    let timers = (0..8u64)
        .map(|i| {
            let tx = tx.clone();
            tcpip::after_func_on(pool.clone(), clock.clone(), ms(10 * (i + 1)), move || {
                tx.send(i).unwrap();
            })
        })
        .collect::<Vec<_>>();

    // stop every other timer before any of them fire.
    for timer in timers.iter().skip(1).step_by(2) {
        assert!(timer.stop());
    }

    clock.advance(ms(1_000));
    let mut fired = rx
        .iter()
        .take(4)
        .collect::<Vec<_>>();
    fired.sort_unstable();
    assert_eq!(fired, vec![0, 2, 4, 6]);
    assert!(rx.recv_timeout(ms(100)).is_err(), "stopped timers must not fire");

    pool.shutdown();
}

#[test]
fn callback_can_reset_its_timer() {
    trace_init();
    let pool = Arc::new(WorkerPool::builder().thread_name("rearm-test").build().unwrap());
    let clock = Arc::new(VirtualClock::new());
    let (tx, rx) = mpsc::channel::<()>();

    let timer = Arc::new(TcpipTimer::new(pool.clone(), clock.clone(), move || {
        let _ = tx.send(());
    }));

    timer.reset(ms(10));
    for _ in 0..3 {
        clock.advance(ms(10));
        rx.recv_timeout(Duration::from_secs(5))
            .expect("callback should run");
        // wait for the callback's task to have stopped the timer before
        // rearming it, so that the stop does not cancel the new deadline.
        while timer.is_armed() {
            std::thread::yield_now();
        }
        timer.reset(ms(10));
    }
    assert!(timer.stop());
}

#[test]
fn after_func_uses_default_executor() {
    trace_init();
    let clock = Arc::new(VirtualClock::new());
    let (tx, rx) = mpsc::channel();
    let caller = std::thread::current().id();

    let _timer = tcpip::after_func(clock.clone(), ms(5), move || {
        let _ = tx.send(std::thread::current().id());
    });
    clock.advance(ms(5));

    let ran_on = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("callback should run on the default executor");
    assert_ne!(ran_on, caller, "callbacks run off the clock driver's thread");
}

#[test]
fn concurrent_resets_and_stops() {
    trace_init();
    const THREADS: usize = 4;
    const ITERS: usize = 200;

    let pool = Arc::new(WorkerPool::builder().thread_name("stress").build().unwrap());
    let clock = Arc::new(VirtualClock::new());
    let fired = Arc::new(AtomicUsize::new(0));
    let timer = Arc::new(TcpipTimer::new(pool.clone(), clock.clone(), {
        let fired = fired.clone();
        move || {
            fired.fetch_add(1, Ordering::SeqCst);
        }
    }));

    let driver = std::thread::spawn({
        let clock = clock.clone();
        move || {
            for _ in 0..ITERS * 2 {
                clock.advance(Duration::from_micros(250));
                std::thread::yield_now();
            }
        }
    });

    let resets = Arc::new(AtomicUsize::new(0));
    let workers = (0..THREADS)
        .map(|i| {
            let timer = timer.clone();
            let resets = resets.clone();
            std::thread::spawn(move || {
                for j in 0..ITERS {
                    if (i + j) % 3 == 0 {
                        timer.stop();
                    } else {
                        timer.reset(ms(1));
                        resets.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect::<Vec<_>>();

    for worker in workers {
        worker.join().unwrap();
    }
    driver.join().unwrap();
    timer.stop();
    pool.shutdown();

    assert!(fired.load(Ordering::SeqCst) <= resets.load(Ordering::SeqCst));
    assert!(!timer.is_armed());
}
