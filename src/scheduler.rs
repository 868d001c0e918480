
//! Distributes code-block jobs to worker threads.
//!
//! Trees are built with an optional `ThreadToken`. Without one, or with a sequential token,
//! every job runs on the thread that submits it, before the submitting call returns.
//! With a thread pool, jobs run in the background, and the thread that waits for a result
//! helps executing pending jobs instead of idling.
//!
//! Jobs own all of their data, so no arena memory is ever shared with a worker thread.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result, UnitResult};


/// A unit of work that can be sent to another thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Executes jobs. Injected into trees through a `ThreadToken`.
pub trait JobScheduler: Send + Sync {

    /// Whether jobs may run on other threads than the submitting one.
    /// Trees built with a multi-threaded scheduler require a token in every call.
    fn is_multi_threaded(&self) -> bool;

    /// Run the job, either now or at some later point.
    fn spawn(&self, job: Job);

    /// Execute some pending work on the calling thread, if there is any.
    /// Returns whether work was done.
    fn help(&self) -> bool;
}

/// Runs every job immediately on the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sequential;

/// Runs jobs on a `rayon_core` thread pool.
#[cfg(feature = "rayon")]
#[derive(Debug)]
pub struct ThreadPool {
    pool: rayon_core::ThreadPool,
}

/// Identifies the scheduler a tree was built for. Cheap to clone.
#[derive(Clone)]
pub struct ThreadToken {
    scheduler: Arc<dyn JobScheduler>,
}

/// Submits jobs and collects their results, in completion order.
pub(crate) struct JobQueue<T> {
    scheduler: Arc<dyn JobScheduler>,
    sender: flume::Sender<std::thread::Result<T>>,
    receiver: flume::Receiver<std::thread::Result<T>>,
    in_flight: usize,
}


impl JobScheduler for Sequential {
    fn is_multi_threaded(&self) -> bool { false }
    fn spawn(&self, job: Job) { job() }
    fn help(&self) -> bool { false }
}

#[cfg(feature = "rayon")]
impl ThreadPool {

    /// Create a pool with the specified number of worker threads.
    /// Zero selects the number of available cores.
    pub fn new(thread_count: usize) -> Result<Self> {
        let pool = rayon_core::ThreadPoolBuilder::new()
            .num_threads(thread_count)
            .thread_name(|index| format!("dwtflow worker #{}", index))
            .build()
            .map_err(|error| Error::resource(format!("cannot create thread pool: {}", error)))?;

        tracing::debug!(threads = pool.current_num_threads(), "created code-block thread pool");
        Ok(ThreadPool { pool })
    }

    /// Number of worker threads.
    pub fn thread_count(&self) -> usize { self.pool.current_num_threads() }
}

#[cfg(feature = "rayon")]
impl JobScheduler for ThreadPool {
    fn is_multi_threaded(&self) -> bool { true }

    fn spawn(&self, job: Job) { self.pool.spawn_fifo(job) }

    fn help(&self) -> bool {
        // only succeeds when called from one of the workers
        matches!(rayon_core::yield_now(), Some(rayon_core::Yield::Executed))
    }
}


impl ThreadToken {

    /// Use the specified scheduler.
    pub fn new(scheduler: impl JobScheduler + 'static) -> Self {
        ThreadToken { scheduler: Arc::new(scheduler) }
    }

    /// Share an existing scheduler.
    pub fn from_shared(scheduler: Arc<dyn JobScheduler>) -> Self {
        ThreadToken { scheduler }
    }

    /// Run all jobs on the calling thread.
    pub fn sequential() -> Self { Self::new(Sequential) }

    /// Run jobs on a new thread pool. Zero threads selects the number of available cores.
    #[cfg(feature = "rayon")]
    pub fn thread_pool(thread_count: usize) -> Result<Self> {
        Ok(Self::new(ThreadPool::new(thread_count)?))
    }

    /// Whether jobs may run on other threads.
    pub fn is_multi_threaded(&self) -> bool { self.scheduler.is_multi_threaded() }

    #[cfg(test)]
    pub(crate) fn scheduler(&self) -> &Arc<dyn JobScheduler> { &self.scheduler }

    /// The scheduler of an optional token, falling back to sequential execution.
    pub(crate) fn scheduler_or_sequential(token: Option<&ThreadToken>) -> Arc<dyn JobScheduler> {
        token.map_or_else(|| Arc::new(Sequential) as Arc<dyn JobScheduler>, |token| token.scheduler.clone())
    }

    /// Errors if a tree that was built for multi-threading is called without a token.
    pub(crate) fn check(multi_threaded: bool, token: Option<&ThreadToken>) -> UnitResult {
        if multi_threaded && token.is_none() {
            return Err(Error::contract("multi-threaded trees must be called with a thread token"));
        }

        Ok(())
    }
}

impl fmt::Debug for ThreadToken {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("ThreadToken")
            .field("multi_threaded", &self.is_multi_threaded())
            .finish()
    }
}


impl<T: Send + 'static> JobQueue<T> {

    pub fn new(scheduler: Arc<dyn JobScheduler>) -> Self {
        let (sender, receiver) = flume::unbounded();
        JobQueue { scheduler, sender, receiver, in_flight: 0 }
    }

    /// Number of submitted jobs whose result has not been collected yet.
    #[cfg(test)]
    pub fn in_flight(&self) -> usize { self.in_flight }

    /// Hand a job to the scheduler. Its result is available through `next_result`.
    pub fn submit(&mut self, job: impl FnOnce() -> T + Send + 'static) {
        let sender = self.sender.clone();
        self.in_flight += 1;

        self.scheduler.spawn(Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(job));

            // the queue may have been dropped in the meantime,
            // in which case nobody is interested in the result
            let _ = sender.send(result);
        }));
    }

    /// Collect a finished result without waiting. Returns `None` if no job has finished yet.
    pub fn try_next_result(&mut self) -> Result<Option<T>> {
        match self.receiver.try_recv() {
            Ok(result) => self.accept(result).map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Wait for the next job to finish. Returns `None` if no job is in flight.
    /// While waiting, the calling thread executes pending jobs if it is a worker of the scheduler.
    pub fn next_result(&mut self) -> Result<Option<T>> {
        if self.in_flight == 0 { return Ok(None); }

        loop {
            if let Ok(result) = self.receiver.try_recv() {
                return self.accept(result).map(Some);
            }

            if !self.scheduler.help() {
                match self.receiver.recv_timeout(Duration::from_millis(2)) {
                    Ok(result) => return self.accept(result).map(Some),
                    Err(flume::RecvTimeoutError::Timeout) => continue,
                    Err(flume::RecvTimeoutError::Disconnected) => {
                        return Err(Error::contract("job channel closed while jobs were in flight"))
                    }
                }
            }
        }
    }

    /// Wait for every job in flight, returning the first error, if any.
    pub fn join(&mut self, mut on_result: impl FnMut(T) -> UnitResult) -> UnitResult {
        let mut first_error = None;

        while self.in_flight > 0 {
            let outcome = self.next_result().and_then(|result| match result {
                Some(result) => on_result(result),
                None => Ok(()),
            });

            if let Err(error) = outcome {
                first_error.get_or_insert(error);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    fn accept(&mut self, result: std::thread::Result<T>) -> Result<T> {
        self.in_flight -= 1;
        result.map_err(|_| Error::contract("a scheduled job panicked"))
    }
}

impl<T> Drop for JobQueue<T> {
    fn drop(&mut self) {
        // do not leave running jobs behind a dropped tree
        while self.in_flight > 0 {
            match self.receiver.recv() {
                Ok(_) => self.in_flight -= 1,
                Err(_) => break,
            }
        }
    }
}

impl<T> fmt::Debug for JobQueue<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("JobQueue").field("in_flight", &self.in_flight).finish()
    }
}
