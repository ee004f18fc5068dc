//! Recursive walk of the source tree.
//!
//! Each directory is one level of the worker pool: its files are dispatched
//! as copy jobs, its subdirectories are walked in place, and the level does
//! not return until every copy it dispatched has finished. A subtree is
//! therefore complete before its parent moves on to its next entry.

use crate::allocator::{PathAllocator, Target};
use crate::audit::{AuditLog, AuditRecord};
use crate::config::CompiledFilters;
use crate::date_resolver::{DateResolver, NoDates};
use crate::error::{Result, SortError};
use crate::file_organizer::FileOrganizer;
use crate::output::OutputFormatter;
use crate::rule_index::{ClassifiedFile, RuleIndex};
use crate::run_state::{CancelToken, RunContext, RunPhase, RunResult};
use crate::worker_pool::{CopyWorkerPool, Dispatcher};
use indicatif::ProgressBar;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Walks a source tree and copies every eligible file into the destination.
pub struct Traverser<'a> {
    rules: &'a RuleIndex,
    allocator: &'a PathAllocator,
    pool: &'a CopyWorkerPool,
    filters: Option<&'a CompiledFilters>,
    dates: &'a dyn DateResolver,
    audit: Option<&'a AuditLog>,
    ctx: RunContext,
    cancel: CancelToken,
    dry_run: bool,
    progress: Option<ProgressBar>,
}

impl<'a> Traverser<'a> {
    pub fn new(
        rules: &'a RuleIndex,
        allocator: &'a PathAllocator,
        pool: &'a CopyWorkerPool,
    ) -> Self {
        Self {
            rules,
            allocator,
            pool,
            filters: None,
            dates: &NoDates,
            audit: None,
            ctx: RunContext::new(),
            cancel: CancelToken::new(),
            dry_run: false,
            progress: None,
        }
    }

    pub fn with_filters(mut self, filters: &'a CompiledFilters) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn with_date_resolver(mut self, dates: &'a dyn DateResolver) -> Self {
        self.dates = dates;
        self
    }

    pub fn with_audit(mut self, audit: &'a AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Plans every copy without creating anything.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Shows a progress bar over the entries of the source root.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.progress = show_progress.then(|| OutputFormatter::create_progress_bar(0));
        self
    }

    /// Like [`with_progress`](Self::with_progress), drawing on `bar`.
    ///
    /// An entry counts once it is done: a directory after its subtree, a file
    /// after its copy.
    pub fn with_progress_bar(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    /// Walks `src` and returns the aggregated result.
    ///
    /// A directory that cannot be listed aborts the run. Cancellation does
    /// not: the result is returned with `cancelled` set.
    pub fn run(self, src: &Path) -> Result<RunResult> {
        let started = Instant::now();
        self.ctx.set_phase(RunPhase::Traversing);

        let cancelled = match self.walk(src, src, true) {
            Ok(()) => self.cancel.is_cancelled(),
            Err(SortError::Cancelled) => true,
            Err(e) => return Err(e),
        };
        if cancelled {
            warn!("run cancelled, no further copies were started");
        }

        self.ctx.set_phase(RunPhase::Aggregating);
        let ctx = self.ctx;
        ctx.set_phase(RunPhase::Done);
        Ok(ctx.finish(started.elapsed(), cancelled))
    }

    fn walk(&self, root: &Path, dir: &Path, top_level: bool) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SortError::Cancelled);
        }

        let list_error = |source| SortError::ListDir {
            path: dir.to_path_buf(),
            source,
        };
        let mut entries = fs::read_dir(dir)
            .map_err(list_error)?
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(list_error)?;
        entries.sort_by_key(|entry| entry.file_name());
        debug!(dir = %dir.display(), entries = entries.len(), "listing directory");

        let progress = self.progress.as_ref().filter(|_| top_level);
        if let Some(pb) = progress {
            pb.set_length(entries.len() as u64);
        }

        let outcome = self.pool.run_level(|level| {
            for entry in &entries {
                if self.cancel.is_cancelled() {
                    return Err(SortError::Cancelled);
                }

                let path = entry.path();
                if let Some(pb) = progress {
                    pb.set_message(entry.file_name().to_string_lossy().into_owned());
                }
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                if is_dir {
                    self.ctx.record_sub_dir();
                    self.walk(root, &path, false)?;
                    if let Some(pb) = progress {
                        pb.inc(1);
                    }
                } else {
                    self.visit_file(root, &path, level, progress);
                }
            }
            Ok(())
        });

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }
        outcome
    }

    fn visit_file<'s>(
        &'s self,
        root: &Path,
        path: &Path,
        level: &Dispatcher<'_, 's>,
        progress: Option<&ProgressBar>,
    ) {
        let relative = path.strip_prefix(root).unwrap_or(path);
        let excluded = self.filters.is_some_and(|f| !f.should_include(relative));
        if excluded {
            debug!(path = %path.display(), "excluded by filters");
        } else if let Some(reason) = skip_reason(path) {
            warn!(path = %path.display(), reason = %reason, "skipping file");
            self.ctx.record_unprocessed(path);
        } else {
            let file = self.rules.classify_file(path);
            let progress = progress.cloned();
            level.dispatch(move || {
                self.copy_one(file);
                if let Some(pb) = progress {
                    pb.inc(1);
                }
            });
            return;
        }

        if let Some(pb) = progress {
            pb.inc(1);
        }
    }

    fn copy_one(&self, file: ClassifiedFile) {
        if self.cancel.is_cancelled() {
            debug!(path = %file.source_path.display(), "cancelled before copy");
            return;
        }

        let date_bucket = self
            .rules
            .date_mode(&file.category)
            .and_then(|mode| match self.dates.resolve(&file.source_path, mode) {
                Ok(bucket) => bucket,
                Err(e) => {
                    warn!(
                        path = %file.source_path.display(),
                        error = %e,
                        "no content date, copying without date bucket"
                    );
                    None
                }
            });
        let target = Target {
            category: &file.category,
            special_subdir: self.rules.special_subdir(&file.category, &file.extension),
            date_bucket: date_bucket.as_deref(),
        };

        if self.dry_run {
            match FileOrganizer::plan_copy(self.allocator, &file.source_path, &target) {
                Ok(op) => {
                    info!(
                        from = %op.original_path.display(),
                        to = %op.new_path.display(),
                        "would copy"
                    );
                    self.ctx.record_copy(&file.extension);
                }
                Err(e) => {
                    warn!(error = %e, "cannot plan copy");
                    self.ctx.record_unprocessed(&file.source_path);
                }
            }
            return;
        }

        let copied =
            FileOrganizer::copy_to_category_with_record(self.allocator, &file.source_path, &target);
        match copied {
            Ok(op) => {
                debug!(
                    from = %op.original_path.display(),
                    to = %op.new_path.display(),
                    category = %op.category,
                    "copied"
                );
                if let Some(audit) = self.audit {
                    let record =
                        AuditRecord::success(&op.original_path, &file.file_name(), &op.new_path);
                    if let Err(e) = audit.record(&record) {
                        error!(path = %op.new_path.display(), error = %e, "audit record lost");
                    }
                }
                self.ctx.record_copy(&file.extension);
            }
            Err(e) => {
                warn!(error = %e, "copy failed");
                self.ctx.record_unprocessed(&file.source_path);
            }
        }
    }
}

/// Why a file cannot be copied, if it cannot.
fn skip_reason(path: &Path) -> Option<String> {
    match fs::metadata(path) {
        Err(e) => Some(format!("cannot stat: {}", e)),
        Ok(meta) if !meta.is_file() => Some("not a regular file".to_string()),
        Ok(meta) if meta.len() == 0 => Some("empty file".to_string()),
        Ok(_) => None,
    }
}
