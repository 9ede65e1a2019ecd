use super::{Executor, ExecutorError, Task};
use core::{fmt, num::NonZeroUsize};
use parking_lot::{Condvar, Mutex};
use std::{
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
};

/// An [`Executor`] backed by a fixed pool of OS threads.
///
/// Tasks are run in the order they were submitted, by whichever worker is
/// idle first. A task that panics is logged and discarded; the worker that
/// ran it keeps going.
///
/// Dropping a `WorkerPool` [shuts it down](WorkerPool::shutdown).
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    count: usize,
}

/// Configures a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct Builder {
    workers: Option<NonZeroUsize>,
    thread_name: String,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
}

struct Queue {
    tasks: VecDeque<Task>,
    closed: bool,
}

// === impl WorkerPool ===

impl WorkerPool {
    /// Returns a new [`Builder`] for configuring a `WorkerPool`.
    #[must_use]
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Starts a new `WorkerPool` with `workers` threads.
    ///
    /// # Errors
    ///
    /// - [`ExecutorError::Spawn`] if a worker thread could not be spawned.
    pub fn new(workers: NonZeroUsize) -> Result<Self, ExecutorError> {
        Self::builder().workers(workers).build()
    }

    /// Returns the number of worker threads in this pool.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.count
    }

    /// Returns the number of tasks waiting for a worker.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().tasks.len()
    }

    /// Shuts down this pool.
    ///
    /// Once this is called, the pool no longer accepts new tasks. Tasks that
    /// were already submitted still run: this waits for the workers to drain
    /// the queue and exit.
    ///
    /// Calling `shutdown` more than once does nothing.
    pub fn shutdown(&self) {
        let was_closed = {
            let mut queue = self.shared.queue.lock();
            core::mem::replace(&mut queue.closed, true)
        };
        if !was_closed {
            debug!(workers = self.count, "shutting down worker pool");
            self.shared.available.notify_all();
        }

        let workers = core::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for worker in workers {
            // a task may drop the last reference to the pool; a worker cannot
            // join itself.
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}

impl Executor for WorkerPool {
    fn execute(&self, task: Task) -> Result<(), ExecutorError> {
        {
            let mut queue = self.shared.queue.lock();
            if queue.closed {
                return Err(ExecutorError::Closed);
            }
            queue.tasks.push_back(task);
        }
        self.shared.available.notify_one();
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.shared.queue.lock();
        f.debug_struct("WorkerPool")
            .field("workers", &self.count)
            .field("queued", &queue.tasks.len())
            .field("closed", &queue.closed)
            .finish()
    }
}

// === impl Builder ===

impl Builder {
    /// Sets the number of worker threads.
    ///
    /// By default, one worker is started per available CPU.
    #[must_use]
    pub fn workers(self, workers: NonZeroUsize) -> Self {
        Self {
            workers: Some(workers),
            ..self
        }
    }

    /// Sets the name prefix of the worker threads. Each worker's name is
    /// this prefix followed by its index.
    #[must_use]
    pub fn thread_name(self, name: impl Into<String>) -> Self {
        Self {
            thread_name: name.into(),
            ..self
        }
    }

    /// Starts the configured [`WorkerPool`].
    ///
    /// # Errors
    ///
    /// - [`ExecutorError::Spawn`] if a worker thread could not be spawned.
    ///   Any workers that were already started are shut down.
    pub fn build(self) -> Result<WorkerPool, ExecutorError> {
        let count = self
            .workers
            .or_else(|| thread::available_parallelism().ok())
            .map_or(1, NonZeroUsize::get);
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                tasks: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        });
        let pool = WorkerPool {
            shared,
            workers: Mutex::new(Vec::with_capacity(count)),
            count,
        };

        for idx in 0..count {
            let shared = pool.shared.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{idx}", self.thread_name))
                .spawn(move || shared.run(idx))
                // dropping `pool` here shuts down the workers spawned so far.
                .map_err(ExecutorError::Spawn)?;
            pool.workers.lock().push(handle);
        }

        debug!(workers = count, thread_name = %self.thread_name, "started worker pool");
        Ok(pool)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            workers: None,
            thread_name: String::from("worker"),
        }
    }
}

// === impl Shared ===

impl Shared {
    #[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
    fn run(&self, worker: usize) {
        trace!(worker, "worker started");
        loop {
            let task = {
                let mut queue = self.queue.lock();
                loop {
                    if let Some(task) = queue.tasks.pop_front() {
                        break task;
                    }
                    if queue.closed {
                        trace!(worker, "worker exiting");
                        return;
                    }
                    self.available.wait(&mut queue);
                }
            };

            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(task)) {
                let msg = panic
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
                    .unwrap_or("<non-string panic payload>");
                warn!(worker, panic = msg, "task panicked");
            }
        }
    }
}
