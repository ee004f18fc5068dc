//! Per-run shared state.
//!
//! Every copy worker of a run receives a reference to the same
//! [`RunContext`]. All counters live behind one mutex; the context is frozen
//! into a [`RunResult`] once traversal completes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Traversing,
    Aggregating,
    Done,
}

#[derive(Debug, Default)]
struct Tally {
    extensions: HashSet<String>,
    unprocessed: Vec<PathBuf>,
    sub_dirs: usize,
    copied: usize,
}

/// Mutable state shared by the traversal and its copy workers.
#[derive(Debug)]
pub struct RunContext {
    tally: Mutex<Tally>,
    phase: Mutex<RunPhase>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            tally: Mutex::new(Tally::default()),
            phase: Mutex::new(RunPhase::Idle),
        }
    }

    // A worker that panicked mid-update leaves the tally usable: every
    // mutation is a single insert or push.
    fn tally(&self) -> MutexGuard<'_, Tally> {
        self.tally.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the extension of a copied (or, in dry run, planned) file.
    pub fn record_copy(&self, extension: &str) {
        let mut tally = self.tally();
        tally.copied += 1;
        if !tally.extensions.contains(extension) {
            tally.extensions.insert(extension.to_string());
        }
    }

    /// Records a file that was not copied.
    pub fn record_unprocessed(&self, path: &Path) {
        self.tally().unprocessed.push(path.to_path_buf());
    }

    pub fn record_sub_dir(&self) {
        self.tally().sub_dirs += 1;
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_phase(&self, phase: RunPhase) {
        let mut current = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(from = ?*current, to = ?phase, "run phase");
        *current = phase;
    }

    /// Freezes the context into the final result.
    pub fn finish(self, elapsed: Duration, cancelled: bool) -> RunResult {
        let tally = self.tally.into_inner().unwrap_or_else(PoisonError::into_inner);
        RunResult {
            unique_extension_count: tally.extensions.len(),
            sub_dir_count: tally.sub_dirs,
            copied_count: tally.copied,
            unprocessed: tally.unprocessed,
            elapsed,
            cancelled,
        }
    }
}

/// Aggregated outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    /// Distinct extensions among copied files, the empty extension included.
    pub unique_extension_count: usize,
    pub sub_dir_count: usize,
    pub copied_count: usize,
    /// Files not copied, in discovery order.
    pub unprocessed: Vec<PathBuf>,
    pub elapsed: Duration,
    /// True when the run stopped early on a cancel request.
    pub cancelled: bool,
}

/// Cooperative cancellation signal shared between the driver, the traversal
/// and the copy workers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
