//! Command-line interface module for sortcopy.
//!
//! This module handles:
//! - Argument parsing
//! - Source and destination validation
//! - Wiring rules, destination setup, audit log, date lookup and the worker
//!   pool into one traversal

use crate::allocator::PathAllocator;
use crate::audit::AuditLog;
use crate::config::RuleConfig;
use crate::date_resolver::{DateResolver, ExifTool, NoDates};
use crate::error::{Result, SortError};
use crate::output::{OutputFormatter, format_elapsed, human_size};
use crate::rule_index::RuleIndex;
use crate::run_state::{CancelToken, RunResult};
use crate::traverser::Traverser;
use crate::worker_pool::{CopyWorkerPool, DEFAULT_WORKERS};
use clap::Parser;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Copy a directory tree into category folders.
#[derive(Parser, Debug)]
#[command(name = "sortcopy")]
#[command(about = "Copy a directory tree into category-based destination folders")]
#[command(version)]
pub struct Cli {
    /// Source directory to copy from
    #[arg(long)]
    pub src: PathBuf,

    /// Destination root (default: <src>_cp next to the source)
    #[arg(long)]
    pub dst: Option<PathBuf>,

    /// Rule file (default: ./sortcopy.toml, then ~/.config/sortcopy/rules.toml)
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Write a CSV audit trail of every copy to this file
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Plan the copy and report counts without creating anything
    #[arg(long)]
    pub dry_run: bool,

    /// Copy files of a directory concurrently
    #[arg(long = "async")]
    pub concurrent: bool,

    /// Maximum concurrent copies with --async
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet output (warnings and errors only)
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Cli {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            src: self.src.clone(),
            dst: self.dst.clone(),
            rules: self.rules.clone(),
            audit_log: self.log.clone(),
            dry_run: self.dry_run,
            concurrent: self.concurrent,
            workers: self.workers,
            show_progress: !self.quiet,
        }
    }
}

/// Everything a run needs besides the cancel signal.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub src: PathBuf,
    pub dst: Option<PathBuf>,
    pub rules: Option<PathBuf>,
    pub audit_log: Option<PathBuf>,
    pub dry_run: bool,
    pub concurrent: bool,
    pub workers: usize,
    pub show_progress: bool,
}

impl RunOptions {
    /// Sequential, non-dry run with default destination and rules.
    pub fn new(src: impl Into<PathBuf>) -> Self {
        Self {
            src: src.into(),
            dst: None,
            rules: None,
            audit_log: None,
            dry_run: false,
            concurrent: false,
            workers: DEFAULT_WORKERS,
            show_progress: false,
        }
    }
}

/// Runs the CLI: copies the tree and prints the summary.
///
/// # Examples
///
/// ```no_run
/// use clap::Parser;
/// use sortcopy::cli::{Cli, run_cli};
/// use sortcopy::run_state::CancelToken;
///
/// let cli = Cli::parse_from(["sortcopy", "--src", "/home/user/backup", "--async"]);
/// match run_cli(&cli, &CancelToken::new()) {
///     Ok(result) => println!("{} files copied", result.copied_count),
///     Err(e) => eprintln!("Error: {}", e),
/// }
/// ```
pub fn run_cli(cli: &Cli, cancel: &CancelToken) -> Result<RunResult> {
    let options = cli.run_options();
    let result = run(&options, cancel)?;
    OutputFormatter::run_summary(&result, options.dry_run);
    Ok(result)
}

/// Copies `options.src` into the destination tree.
///
/// Date buckets are resolved with `exiftool` when the rules ask for them and
/// the program is available.
pub fn run(options: &RunOptions, cancel: &CancelToken) -> Result<RunResult> {
    execute(options, cancel, None)
}

/// Like [`run`], with a caller-supplied date resolver.
pub fn run_with_resolver(
    options: &RunOptions,
    cancel: &CancelToken,
    dates: &dyn DateResolver,
) -> Result<RunResult> {
    execute(options, cancel, Some(dates))
}

fn execute(
    options: &RunOptions,
    cancel: &CancelToken,
    injected: Option<&dyn DateResolver>,
) -> Result<RunResult> {
    let src = validate_source(&options.src)?;
    info!(
        src = %src.display(),
        size = %human_size(dir_size(&src)),
        "source directory"
    );

    let dst = match &options.dst {
        Some(dst) => dst.clone(),
        None => {
            let dst = default_destination(&src);
            warn!(dst = %dst.display(), "no destination given, using default");
            dst
        }
    };
    ensure_not_nested(&src, &dst)?;

    let config = RuleConfig::load(options.rules.as_deref())?;
    let rules = RuleIndex::from_rules(&config.rules);
    let filters = config.compile_filters()?;
    debug!(rules = config.rules.len(), "rules loaded");

    let allocator = PathAllocator::new(&dst);
    if options.dry_run {
        OutputFormatter::dry_run_notice(&format!(
            "Planning copy of {} into {}; nothing will be written.",
            src.display(),
            dst.display()
        ));
    } else {
        allocator
            .prepare(&rules)
            .map_err(|source| SortError::DestinationSetup {
                path: dst.clone(),
                source,
            })?;
    }

    let audit = match &options.audit_log {
        Some(path) if !options.dry_run => Some(AuditLog::create(path)?),
        _ => None,
    };

    let exiftool = if injected.is_none() && config.uses_date_buckets() {
        detect_exiftool()
    } else {
        None
    };
    let dates: &dyn DateResolver = match (injected, &exiftool) {
        (Some(dates), _) => dates,
        (None, Some(tool)) => tool,
        (None, None) => &NoDates,
    };

    let pool = if options.concurrent {
        CopyWorkerPool::bounded(options.workers)?
    } else {
        CopyWorkerPool::sequential()
    };
    info!(workers = pool.workers(), dry_run = options.dry_run, "starting copy");

    let mut traverser = Traverser::new(&rules, &allocator, &pool)
        .with_filters(&filters)
        .with_date_resolver(dates)
        .with_cancel(cancel.clone())
        .dry_run(options.dry_run)
        .with_progress(options.show_progress);
    if let Some(audit) = &audit {
        traverser = traverser.with_audit(audit);
    }
    let result = traverser.run(&src)?;

    if let Some(audit) = audit {
        info!(path = %audit.path().display(), "audit log written");
        audit.finish()?;
    }

    info!(
        copied = result.copied_count,
        unprocessed = result.unprocessed.len(),
        elapsed = %format_elapsed(result.elapsed),
        "run finished"
    );
    Ok(result)
}

fn detect_exiftool() -> Option<ExifTool> {
    let tool = ExifTool::default();
    match tool.check_available() {
        Ok(()) => Some(tool),
        Err(e) => {
            warn!(error = %e, "exiftool unavailable, date buckets disabled for this run");
            None
        }
    }
}

/// Checks that the source exists and is a directory, returning its canonical
/// path.
fn validate_source(src: &Path) -> Result<PathBuf> {
    let source_error = |source: io::Error| match source.kind() {
        io::ErrorKind::NotFound => SortError::SourceMissing(src.to_path_buf()),
        _ => SortError::SourceUnreadable {
            path: src.to_path_buf(),
            source,
        },
    };
    let meta = fs::metadata(src).map_err(source_error)?;
    if !meta.is_dir() {
        return Err(SortError::NotADirectory(src.to_path_buf()));
    }
    fs::canonicalize(src).map_err(source_error)
}

/// `/data/photos` becomes `/data/photos_cp`.
pub fn default_destination(src: &Path) -> PathBuf {
    match src.file_name() {
        Some(name) => {
            let mut name = name.to_os_string();
            name.push("_cp");
            src.with_file_name(name)
        }
        None => src.join("_cp"),
    }
}

/// Rejects a destination equal to or below the source; copying into it would
/// feed the run its own output.
fn ensure_not_nested(src: &Path, dst: &Path) -> Result<()> {
    let resolved = resolve_existing_prefix(dst);
    if resolved.starts_with(src) {
        return Err(SortError::DestinationInsideSource {
            destination: dst.to_path_buf(),
            source_dir: src.to_path_buf(),
        });
    }
    Ok(())
}

// Canonicalizes the longest existing ancestor and re-appends the rest, so a
// destination that does not exist yet still resolves symlinks and `..`.
fn resolve_existing_prefix(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut missing = Vec::new();
    let mut current = absolute.as_path();
    loop {
        if let Ok(canonical) = fs::canonicalize(current) {
            return missing
                .iter()
                .rev()
                .fold(canonical, |acc: PathBuf, part| acc.join(part));
        }
        match (current.parent(), current.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                current = parent;
            }
            _ => return absolute,
        }
    }
}

/// Total size of regular files below `dir`. Unreadable entries count as zero.
fn dir_size(dir: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| match entry.file_type() {
            Ok(t) if t.is_dir() => dir_size(&entry.path()),
            Ok(t) if t.is_file() => entry.metadata().map(|m| m.len()).unwrap_or(0),
            _ => 0,
        })
        .sum()
}
