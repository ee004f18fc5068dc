//! Errors that abort a run.

use crate::audit::AuditError;
use crate::config::ConfigError;
use crate::worker_pool::PoolError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SortError {
    #[error("Source directory does not exist: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("Cannot access source directory {}: {source}", path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Source is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Destination '{}' is inside source '{}'", destination.display(), source_dir.display())]
    DestinationInsideSource {
        destination: PathBuf,
        source_dir: PathBuf,
    },

    #[error("Rule error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to set up destination {}: {source}", path.display())]
    DestinationSetup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to list directory {}: {source}", path.display())]
    ListDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Audit log error: {0}")]
    Audit(#[from] AuditError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Run cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, SortError>;
