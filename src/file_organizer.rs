//! Single-file copy into a category directory.
//!
//! This module performs the per-file work of a run: open the source, claim a
//! destination name, copy the bytes and sync the result to disk. Every
//! failure is returned as a [`CopyError`]; none of them abort the run.

use crate::allocator::{DestinationPlan, PathAllocator, Target};
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Errors that can occur while copying one file.
#[derive(Debug, Error)]
pub enum CopyError {
    /// The source could not be opened (missing, unreadable, raced away).
    #[error("Failed to open {}: {source}", path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// No destination could be claimed under the target directory.
    #[error("Failed to create destination in {}: {source}", dir.display())]
    CreateFailed {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Reading the source or writing the destination failed midway.
    #[error("Failed to copy {} to {}: {source}", source_path.display(), destination.display())]
    CopyFailed {
        source_path: PathBuf,
        destination: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The copied data could not be flushed to disk.
    #[error("Failed to sync {}: {source}", path.display())]
    SyncFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type for single-file copies.
pub type CopyResult<T> = Result<T, CopyError>;

/// A completed (or, in dry run, planned) copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// The source file.
    pub original_path: PathBuf,
    /// Where the file was (or would be) copied to.
    pub new_path: PathBuf,
    /// The category directory the file was routed to.
    pub category: String,
}

/// Copies files into category directories.
pub struct FileOrganizer;

impl FileOrganizer {
    /// Copies a file into its target directory and records the operation.
    ///
    /// The destination name is the source's file name, suffixed when that name
    /// is already taken (see [`PathAllocator::reserve`]). The data is synced to
    /// disk before the function returns. If the copy or the sync fails, the
    /// partly written destination is removed again.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use sortcopy::allocator::{PathAllocator, Target};
    /// use sortcopy::file_organizer::FileOrganizer;
    /// use std::path::Path;
    ///
    /// let allocator = PathAllocator::new("/backup_cp");
    /// let target = Target { category: "images", special_subdir: None, date_bucket: None };
    /// match FileOrganizer::copy_to_category_with_record(
    ///     &allocator,
    ///     Path::new("/backup/photo.jpg"),
    ///     &target,
    /// ) {
    ///     Ok(op) => println!("Copied to {}", op.new_path.display()),
    ///     Err(e) => eprintln!("Copy failed: {}", e),
    /// }
    /// ```
    pub fn copy_to_category_with_record(
        allocator: &PathAllocator,
        file_path: &Path,
        target: &Target<'_>,
    ) -> CopyResult<Operation> {
        let mut source = File::open(file_path).map_err(|e| CopyError::SourceUnavailable {
            path: file_path.to_path_buf(),
            source: e,
        })?;

        let (plan, mut destination) =
            allocator
                .reserve(target, file_name_of(file_path))
                .map_err(|e| CopyError::CreateFailed {
                    dir: allocator.base_dir(target),
                    source: e,
                })?;
        let new_path = plan.path();

        let written = io::copy(&mut source, &mut destination)
            .map_err(|e| CopyError::CopyFailed {
                source_path: file_path.to_path_buf(),
                destination: new_path.clone(),
                source: e,
            })
            .and_then(|_| {
                destination.sync_all().map_err(|e| CopyError::SyncFailed {
                    path: new_path.clone(),
                    source: e,
                })
            });
        if let Err(e) = written {
            drop(destination);
            discard_partial(&new_path);
            return Err(e);
        }

        Ok(Operation {
            original_path: file_path.to_path_buf(),
            new_path,
            category: target.category.to_string(),
        })
    }

    /// Computes where a file would be copied without touching the filesystem.
    pub fn plan_copy(
        allocator: &PathAllocator,
        file_path: &Path,
        target: &Target<'_>,
    ) -> CopyResult<Operation> {
        let plan: DestinationPlan =
            allocator
                .plan(target, file_name_of(file_path))
                .map_err(|e| CopyError::CreateFailed {
                    dir: allocator.base_dir(target),
                    source: e,
                })?;
        Ok(Operation {
            original_path: file_path.to_path_buf(),
            new_path: plan.path(),
            category: target.category.to_string(),
        })
    }
}

fn file_name_of(path: &Path) -> &OsStr {
    path.file_name().unwrap_or_default()
}

// A failed copy must not leave a file that looks like a copy and holds the
// name a later successful copy would get.
fn discard_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "could not remove partial copy");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn images() -> Target<'static> {
        Target {
            category: "images",
            special_subdir: None,
            date_bucket: None,
        }
    }

    struct Setup {
        _temp: TempDir,
        src: PathBuf,
        allocator: PathAllocator,
    }

    fn setup() -> Setup {
        let temp = TempDir::new().expect("Failed to create temp directory");
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(dst.join("images")).unwrap();
        Setup {
            src,
            allocator: PathAllocator::new(dst),
            _temp: temp,
        }
    }

    #[test]
    fn test_copy_preserves_content_and_source() {
        let s = setup();
        let file_path = s.src.join("photo.jpg");
        let content: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();
        fs::write(&file_path, &content).unwrap();

        let op = FileOrganizer::copy_to_category_with_record(&s.allocator, &file_path, &images())
            .expect("copy should succeed");

        assert_eq!(op.new_path, s.allocator.root().join("images/photo.jpg"));
        assert_eq!(op.category, "images");
        assert_eq!(fs::read(&op.new_path).unwrap(), content);
        assert_eq!(
            fs::metadata(&op.new_path).unwrap().len(),
            fs::metadata(&file_path).unwrap().len()
        );
        assert!(file_path.exists(), "source must not be touched");
    }

    #[test]
    fn test_copy_never_overwrites() {
        let s = setup();
        let existing = s.allocator.root().join("images/photo.jpg");
        fs::write(&existing, b"existing").unwrap();
        let file_path = s.src.join("photo.jpg");
        fs::write(&file_path, b"new").unwrap();

        let op = FileOrganizer::copy_to_category_with_record(&s.allocator, &file_path, &images())
            .unwrap();

        assert_eq!(op.new_path, s.allocator.root().join("images/photo_1.jpg"));
        assert_eq!(fs::read(&existing).unwrap(), b"existing");
        assert_eq!(fs::read(&op.new_path).unwrap(), b"new");
    }

    #[test]
    fn test_missing_source_is_source_unavailable() {
        let s = setup();
        let result = FileOrganizer::copy_to_category_with_record(
            &s.allocator,
            &s.src.join("gone.jpg"),
            &images(),
        );
        assert!(matches!(result, Err(CopyError::SourceUnavailable { .. })));
        assert!(!s.allocator.root().join("images/gone.jpg").exists());
    }

    #[test]
    fn test_missing_target_dir_is_create_failed() {
        let s = setup();
        let file_path = s.src.join("notes.txt");
        fs::write(&file_path, b"notes").unwrap();
        let target = Target {
            category: "not-prepared",
            special_subdir: None,
            date_bucket: None,
        };
        let result = FileOrganizer::copy_to_category_with_record(&s.allocator, &file_path, &target);
        assert!(matches!(result, Err(CopyError::CreateFailed { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_read_leaves_no_partial_copy() {
        let s = setup();
        // Opening a directory succeeds on unix; reading from it fails.
        let unreadable = s.src.join("photo.jpg");
        fs::create_dir(&unreadable).unwrap();

        let result =
            FileOrganizer::copy_to_category_with_record(&s.allocator, &unreadable, &images());

        assert!(matches!(result, Err(CopyError::CopyFailed { .. })));
        let left: Vec<_> = fs::read_dir(s.allocator.root().join("images"))
            .unwrap()
            .collect();
        assert!(left.is_empty(), "partial copy left behind: {:?}", left);

        // The name is free for the next copy.
        let target = images();
        let (plan, _file) = s
            .allocator
            .reserve(&target, OsStr::new("photo.jpg"))
            .unwrap();
        assert_eq!(plan.final_name, "photo.jpg");
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_keeps_non_utf8_name() {
        use std::os::unix::ffi::OsStrExt;

        let s = setup();
        let file_path = s.src.join(OsStr::from_bytes(b"caf\xe9.jpg"));
        fs::write(&file_path, b"bytes").unwrap();

        let op = FileOrganizer::copy_to_category_with_record(&s.allocator, &file_path, &images())
            .unwrap();

        assert_eq!(
            op.new_path.file_name().unwrap().as_bytes(),
            b"caf\xe9.jpg".as_slice()
        );
        assert_eq!(fs::read(&op.new_path).unwrap(), b"bytes");
    }

    #[test]
    fn test_plan_copy_creates_nothing() {
        let s = setup();
        let file_path = s.src.join("photo.jpg");
        fs::write(&file_path, b"data").unwrap();
        let target = Target {
            category: "images",
            special_subdir: None,
            date_bucket: Some("2021"),
        };

        let op = FileOrganizer::plan_copy(&s.allocator, &file_path, &target).unwrap();
        assert_eq!(op.new_path, s.allocator.root().join("images/2021/photo.jpg"));
        assert!(!s.allocator.root().join("images/2021").exists());
    }
}
