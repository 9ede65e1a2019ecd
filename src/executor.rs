//! Hand-off of deferred work out of timer notification context.
//!
//! A [`TimerListener`](crate::time::TimerListener) is called with its timer's
//! lock held, and must never block or call back into that timer. Work that
//! needs to do either is handed to an [`Executor`], which runs it later on
//! some other context.
//!
//! This module provides two executors:
//!
//! - [`WorkerPool`], a pool of OS threads. This is what the
//!   [default executor](default_executor) uses.
//! - [`RunQueue`], a queue of tasks that is only run when its owner calls
//!   [`RunQueue::tick`]. This makes the order in which deferred work runs
//!   deterministic, which is mostly useful for tests and simulations.
use once_cell::sync::OnceCell;
use std::{io, sync::Arc};

mod pool;
mod queue;

pub use self::{
    pool::{Builder, WorkerPool},
    queue::{RunQueue, Tick},
};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs [`Task`]s outside of the context that submitted them.
pub trait Executor: Send + Sync {
    /// Submits `task` to be run later.
    ///
    /// This must never block, and must never run `task` on the calling
    /// thread before returning, since it is called from within timer
    /// notifications.
    ///
    /// # Errors
    ///
    /// - [`ExecutorError::Closed`] if the executor no longer accepts tasks.
    ///   `task` is dropped without being run.
    fn execute(&self, task: Task) -> Result<(), ExecutorError>;
}

/// Errors returned by [`Executor`]s.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExecutorError {
    /// The executor has been shut down, and no longer accepts tasks.
    #[error("executor has been shut down")]
    Closed,

    /// A [`WorkerPool`] could not spawn one of its worker threads.
    #[error("failed to spawn worker thread")]
    Spawn(#[source] io::Error),
}

/// Errors returned by [`set_default_executor`].
#[derive(Debug, thiserror::Error)]
#[error("the default executor has already been initialized")]
pub struct AlreadyInitialized(());

static DEFAULT: OnceCell<Arc<dyn Executor>> = OnceCell::new();

/// Sets the executor used by [`after_func`](crate::tcpip::after_func).
///
/// The default executor can only be set a single time, and only before it is
/// first used: once it has been initialized (either by this function, or
/// lazily by [`default_executor`]), subsequent calls return an
/// [`AlreadyInitialized`] error.
pub fn set_default_executor(executor: Arc<dyn Executor>) -> Result<(), AlreadyInitialized> {
    DEFAULT.set(executor).map_err(|_| AlreadyInitialized(()))
}

/// Returns the default executor.
///
/// If no executor was installed using [`set_default_executor`], a
/// [`WorkerPool`] with one worker per available CPU is started the first time
/// this is called.
///
/// # Errors
///
/// - [`ExecutorError::Spawn`] if the default worker pool had to be started,
///   and its threads could not be spawned.
pub fn default_executor() -> Result<Arc<dyn Executor>, ExecutorError> {
    DEFAULT
        .get_or_try_init(|| {
            let pool = WorkerPool::builder().thread_name("ktime-worker").build()?;
            debug!(workers = pool.workers(), "started default worker pool");
            Ok(Arc::new(pool) as Arc<dyn Executor>)
        })
        .cloned()
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    #[inline]
    fn execute(&self, task: Task) -> Result<(), ExecutorError> {
        (**self).execute(task)
    }
}
