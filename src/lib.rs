//! sortcopy - copy a directory tree into category folders
//!
//! Files are routed to a category by extension, optionally split into
//! per-extension subdirectories and date buckets, and copied under
//! collision-safe names. Each successful copy can be recorded in a CSV audit
//! trail, and the run reports the unique extensions seen, the subdirectories
//! walked and every file that could not be copied.

pub mod allocator;
pub mod audit;
pub mod cli;
pub mod config;
pub mod date_resolver;
pub mod error;
pub mod file_organizer;
pub mod logging;
pub mod output;
pub mod rule_index;
pub mod run_state;
pub mod traverser;
pub mod worker_pool;

pub use allocator::{DestinationPlan, PathAllocator, Target};
pub use audit::{AuditLog, AuditRecord, AuditStatus};
pub use config::{CompiledFilters, ConfigError, DateBucketMode, Rule, RuleConfig};
pub use date_resolver::{DateError, DateResolver, ExifTool, NoDates};
pub use error::SortError;
pub use file_organizer::{CopyError, FileOrganizer};
pub use rule_index::{Classification, RuleIndex};
pub use run_state::{CancelToken, RunContext, RunPhase, RunResult};
pub use traverser::Traverser;
pub use worker_pool::CopyWorkerPool;

pub use cli::{RunOptions, run, run_with_resolver};
