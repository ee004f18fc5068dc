//! Append-only CSV audit trail of copies.
//!
//! The file starts with a header row naming the four columns
//! (`sourceFilePath,destinationFilePath,fileName,status`) and receives one row
//! per successful copy. Rows are flushed as they are written so the trail is
//! complete up to the last finished copy even if the process dies.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

pub const HEADER: [&str; 4] = ["sourceFilePath", "destinationFilePath", "fileName", "status"];

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to open audit log {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to write audit record: {0}")]
    Write(#[from] csv::Error),

    #[error("Failed to flush audit log: {0}")]
    Flush(#[from] std::io::Error),
}

/// Outcome of a copy attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    Success,
    Failure,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "SUCCESS",
            AuditStatus::Failure => "FAILURE",
        }
    }
}

/// One row of the audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub status: AuditStatus,
    pub source_path: PathBuf,
    pub file_name: String,
    pub destination_path: PathBuf,
}

impl AuditRecord {
    pub fn success(source_path: &Path, file_name: &str, destination_path: &Path) -> Self {
        Self {
            status: AuditStatus::Success,
            source_path: source_path.to_path_buf(),
            file_name: file_name.to_string(),
            destination_path: destination_path.to_path_buf(),
        }
    }
}

/// Serialized writer over the audit file. Rows appear in the order copies
/// finish.
pub struct AuditLog {
    writer: Mutex<csv::Writer<File>>,
    path: PathBuf,
}

impl AuditLog {
    /// Creates (or truncates) the audit file and writes the header row.
    pub fn create(path: &Path) -> Result<Self, AuditError> {
        let mut writer = csv::Writer::from_path(path).map_err(|source| AuditError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        writer.write_record(HEADER)?;
        writer.flush()?;
        Ok(Self {
            writer: Mutex::new(writer),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one row and flushes it.
    pub fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let source = record.source_path.to_string_lossy();
        let destination = record.destination_path.to_string_lossy();
        writer.write_record([
            &*source,
            &*destination,
            record.file_name.as_str(),
            record.status.as_str(),
        ])?;
        writer.flush()?;
        Ok(())
    }

    /// Flushes and closes the file.
    pub fn finish(self) -> Result<(), AuditError> {
        let mut writer = self
            .writer
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        writer.flush()?;
        Ok(())
    }
}
