//! Bounded-concurrency execution of copy jobs.
//!
//! One rayon pool is built per run. Each directory level opens a scope on the
//! calling thread: jobs spawned into it run on the pool, and the scope does
//! not return until every job of the level has finished. Because the scope
//! body itself stays on the calling thread, a level may recurse into a
//! subdirectory (opening a nested scope) while its own earlier jobs are still
//! in flight, and the pool bound holds across all of them.

use rayon::{Scope, ThreadPool, ThreadPoolBuilder};
use thiserror::Error;

/// Pool size when none is configured.
pub const DEFAULT_WORKERS: usize = 8;

#[derive(Debug, Error)]
#[error("Failed to start copy worker pool with {workers} threads: {source}")]
pub struct PoolError {
    workers: usize,
    #[source]
    source: rayon::ThreadPoolBuildError,
}

/// Runs copy jobs either inline or on a bounded thread pool.
pub struct CopyWorkerPool {
    pool: Option<ThreadPool>,
}

impl CopyWorkerPool {
    /// Every job runs to completion on the calling thread before the next one
    /// is dispatched.
    pub fn sequential() -> Self {
        Self { pool: None }
    }

    /// At most `workers` jobs run at the same time. Zero falls back to
    /// [`DEFAULT_WORKERS`].
    pub fn bounded(workers: usize) -> Result<Self, PoolError> {
        let workers = if workers == 0 { DEFAULT_WORKERS } else { workers };
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("sortcopy-copy-{}", i))
            .build()
            .map_err(|source| PoolError { workers, source })?;
        Ok(Self { pool: Some(pool) })
    }

    /// Maximum number of jobs in flight.
    pub fn workers(&self) -> usize {
        self.pool
            .as_ref()
            .map(ThreadPool::current_num_threads)
            .unwrap_or(1)
    }

    /// Runs `level` with a dispatcher for one directory level and waits for
    /// every job dispatched through it before returning.
    pub fn run_level<'scope, F, R>(&self, level: F) -> R
    where
        F: FnOnce(&Dispatcher<'_, 'scope>) -> R,
    {
        match &self.pool {
            Some(pool) => pool.in_place_scope(|scope| level(&Dispatcher::Pooled(scope))),
            None => level(&Dispatcher::Inline),
        }
    }
}

/// Hands jobs of one directory level to the pool.
pub enum Dispatcher<'a, 'scope> {
    Inline,
    Pooled(&'a Scope<'scope>),
}

impl<'scope> Dispatcher<'_, 'scope> {
    pub fn dispatch<J>(&self, job: J)
    where
        J: FnOnce() + Send + 'scope,
    {
        match self {
            Dispatcher::Inline => job(),
            Dispatcher::Pooled(scope) => scope.spawn(move |_| job()),
        }
    }
}
