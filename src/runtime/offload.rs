use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, trace};
use crate::config::OffloadConfig;
use crate::runtime::task::panic_message;

static GLOBAL: LazyLock<OffloadPool> = LazyLock::new(OffloadPool::new);

pub const DEFAULT_THREAD_NAME: &str = "scatter-cpu";

#[derive(Debug, Error)]
pub enum OffloadError {
    #[error("offloaded work panicked: {message}")]
    Panicked { message: String },
    #[error("cpu worker went away before the work completed")]
    WorkerGone,
    #[error("failed to start cpu worker thread")]
    Start(#[source] ThreadPoolBuildError),
}

/// CPU 密集型任务卸载池
///
/// A single-thread rayon pool that runs CPU-heavy closures away from the
/// async scheduler. Work is executed one job at a time, in submission order.
/// The pool is built on first use and torn down by [`OffloadPool::shutdown`].
#[derive(Debug)]
pub struct OffloadPool {
    enabled: AtomicBool,
    thread_name: String,
    worker: Mutex<Option<ThreadPool>>,
}

impl Default for OffloadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl OffloadPool {
    pub fn new() -> Self {
        Self::with_thread_name(DEFAULT_THREAD_NAME)
    }

    pub fn with_thread_name(thread_name: &str) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            thread_name: thread_name.to_string(),
            worker: Mutex::new(None),
        }
    }

    /// A pool that runs every job inline on the calling task.
    pub fn disabled() -> Self {
        let pool = Self::new();
        pool.set_enabled(false);
        pool
    }

    pub fn from_config(config: &OffloadConfig) -> Self {
        let pool = Self::with_thread_name(&config.thread_name);
        pool.set_enabled(config.enabled);
        pool
    }

    pub fn global() -> &'static OffloadPool {
        &GLOBAL
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_some()
    }

    /// Starts the worker thread if it is not running yet.
    pub fn start(&self) -> Result<(), OffloadError> {
        let mut worker = self.lock();
        if worker.is_none() {
            *worker = Some(self.build_pool()?);
            debug!(thread = %self.thread_name, "cpu worker started");
        }
        Ok(())
    }

    /// Runs `work` on the worker thread and suspends the calling task until it finishes.
    ///
    /// The scheduler stays free to drive other tasks meanwhile. A panic in
    /// `work` comes back as [`OffloadError::Panicked`]. When the pool is
    /// disabled `work` runs inline, exactly as a direct call would.
    pub async fn run_cpu_bound<F, R>(&self, work: F) -> Result<R, OffloadError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if !self.is_enabled() {
            return Ok(work());
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut worker = self.lock();
            if worker.is_none() {
                *worker = Some(self.build_pool()?);
                debug!(thread = %self.thread_name, "cpu worker started lazily");
            }
            let Some(pool) = worker.as_ref() else {
                return Err(OffloadError::WorkerGone);
            };
            pool.spawn_fifo(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(work))
                    .map_err(|payload| OffloadError::Panicked { message: panic_message(&*payload) });
                // the caller may have stopped waiting
                let _ = tx.send(result);
            });
        }

        trace!("cpu-bound job submitted");
        rx.await.map_err(|_| OffloadError::WorkerGone)?
    }

    /// Waits for queued work to finish, then drops the pool.
    /// The next `run_cpu_bound` builds a fresh one.
    pub async fn shutdown(&self) {
        let Some(pool) = self.lock().take() else {
            return;
        };

        // one thread, fifo: this runs after everything queued before it
        let (tx, rx) = oneshot::channel();
        pool.spawn_fifo(move || {
            let _ = tx.send(());
        });
        match rx.await {
            Ok(()) => debug!(thread = %self.thread_name, "cpu worker stopped"),
            Err(_) => error!(thread = %self.thread_name, "cpu worker went away during shutdown"),
        }
        drop(pool);
    }

    fn build_pool(&self) -> Result<ThreadPool, OffloadError> {
        let name = self.thread_name.clone();
        ThreadPoolBuilder::new()
            .num_threads(1)
            .thread_name(move |_| name.clone())
            .panic_handler(|payload| {
                error!(panic = %panic_message(&*payload), "cpu worker job panicked");
            })
            .build()
            .map_err(OffloadError::Start)
    }

    fn lock(&self) -> MutexGuard<'_, Option<ThreadPool>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
