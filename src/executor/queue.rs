use super::{Executor, ExecutorError, Task};
use core::fmt;
use maitake_sync::blocking::Mutex;
use std::collections::VecDeque;

/// An [`Executor`] that only runs tasks when its owner
/// [ticks](RunQueue::tick) it.
///
/// Tasks are run on the thread that calls [`RunQueue::tick`] (or
/// [`RunQueue::run_until_idle`]), in the order they were submitted. Unlike a
/// [`WorkerPool`](super::WorkerPool), a panicking task is *not* caught: it
/// unwinds out of `tick`.
pub struct RunQueue {
    tasks: Mutex<VecDeque<Task>>,
}

/// Summarizes the results of a single [`RunQueue::tick`].
#[derive(Debug)]
#[non_exhaustive]
pub struct Tick {
    /// The number of tasks run on this tick.
    pub completed: usize,

    /// `true` if the tick completed with tasks remaining in the queue. These
    /// are tasks submitted while the tick was running.
    pub has_remaining: bool,
}

impl RunQueue {
    /// Returns a new, empty `RunQueue`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
        }
    }

    /// Returns the number of tasks waiting to run.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.with_lock(|tasks| tasks.len())
    }

    /// Returns `true` if no tasks are waiting to run.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs every task that was queued when the tick began.
    ///
    /// Tasks submitted by the tasks run on this tick are left for the next
    /// one.
    pub fn tick(&self) -> Tick {
        let batch = self.tasks.with_lock(core::mem::take);
        let completed = batch.len();
        for task in batch {
            task();
        }

        let has_remaining = !self.is_empty();
        if completed > 0 {
            trace!(completed, has_remaining, "run queue ticked");
        }
        Tick {
            completed,
            has_remaining,
        }
    }

    /// Ticks this queue until it is empty, and returns the total number of
    /// tasks that were run.
    pub fn run_until_idle(&self) -> usize {
        let mut completed = 0;
        loop {
            let tick = self.tick();
            completed += tick.completed;
            if !tick.has_remaining {
                return completed;
            }
        }
    }
}

impl Default for RunQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for RunQueue {
    fn execute(&self, task: Task) -> Result<(), ExecutorError> {
        self.tasks.with_lock(|tasks| tasks.push_back(task));
        Ok(())
    }
}

impl fmt::Debug for RunQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunQueue")
            .field("len", &self.len())
            .finish()
    }
}
