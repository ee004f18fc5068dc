//! Destination naming.
//!
//! Destinations are laid out as
//! `root/<category>[/<special subdir>][/<date bucket>]/<name>[_<n>][.ext]`.
//! A name is claimed by opening it with `create_new`, so the existence check
//! and the creation are one atomic step and concurrent workers can never be
//! handed the same path.

use crate::rule_index::{RuleIndex, UNKNOWN_CATEGORY};
use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Where a single file goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationPlan {
    pub base_dir: PathBuf,
    /// The source's file name, suffixed when taken. Bytes are kept as-is.
    pub final_name: OsString,
}

impl DestinationPlan {
    pub fn path(&self) -> PathBuf {
        self.base_dir.join(&self.final_name)
    }
}

/// The parts of a destination directory below the root.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub category: &'a str,
    pub special_subdir: Option<&'a str>,
    pub date_bucket: Option<&'a str>,
}

/// Computes collision-free destination paths under one root.
#[derive(Debug)]
pub struct PathAllocator {
    root: PathBuf,
    // Names handed out by `plan`, which never touches the filesystem.
    planned: Mutex<HashSet<PathBuf>>,
}

impl PathAllocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            planned: Mutex::new(HashSet::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the destination root, every category directory, every special
    /// subdirectory and the unknown directory. Existing directories are kept.
    pub fn prepare(&self, rules: &RuleIndex) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        for (category, subdirs) in rules.categories() {
            let category_dir = self.root.join(category);
            fs::create_dir_all(&category_dir)?;
            for sub in subdirs {
                fs::create_dir_all(category_dir.join(sub))?;
            }
        }
        fs::create_dir_all(self.root.join(UNKNOWN_CATEGORY))?;
        Ok(())
    }

    /// Directory a file of the given target lands in.
    pub fn base_dir(&self, target: &Target<'_>) -> PathBuf {
        let mut dir = self.root.join(target.category);
        if let Some(sub) = target.special_subdir {
            dir.push(sub);
        }
        if let Some(bucket) = target.date_bucket {
            dir.push(bucket);
        }
        dir
    }

    /// Claims a free destination and returns it together with the newly
    /// created, empty destination file.
    ///
    /// The date bucket directory is created on demand. Category and special
    /// subdirectories are expected to exist already (see [`Self::prepare`]).
    pub fn reserve(
        &self,
        target: &Target<'_>,
        file_name: &OsStr,
    ) -> io::Result<(DestinationPlan, File)> {
        let base_dir = self.base_dir(target);
        if target.date_bucket.is_some() {
            fs::create_dir_all(&base_dir)?;
        }

        for attempt in 0..=u32::MAX {
            let final_name = suffixed_name(file_name, attempt);
            let candidate = base_dir.join(&final_name);
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
            {
                Ok(file) => {
                    if attempt > 0 {
                        debug!(
                            original = %file_name.to_string_lossy(),
                            renamed = %final_name.to_string_lossy(),
                            "destination name taken, using suffix"
                        );
                    }
                    return Ok((
                        DestinationPlan {
                            base_dir,
                            final_name,
                        },
                        file,
                    ));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(exhausted(file_name))
    }

    /// Computes the destination a copy would get without creating anything.
    ///
    /// Names returned by earlier calls count as taken, so a dry run reports
    /// the same suffixes a real run into the same destination would produce.
    pub fn plan(&self, target: &Target<'_>, file_name: &OsStr) -> io::Result<DestinationPlan> {
        let base_dir = self.base_dir(target);
        let mut planned = self.planned.lock().unwrap_or_else(PoisonError::into_inner);

        for attempt in 0..=u32::MAX {
            let final_name = suffixed_name(file_name, attempt);
            let candidate = base_dir.join(&final_name);
            if planned.contains(&candidate) || fs::symlink_metadata(&candidate).is_ok() {
                continue;
            }
            planned.insert(candidate);
            return Ok(DestinationPlan {
                base_dir,
                final_name,
            });
        }
        Err(exhausted(file_name))
    }
}

fn exhausted(file_name: &OsStr) -> io::Error {
    io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!(
            "no free destination name left for {}",
            file_name.to_string_lossy()
        ),
    )
}

/// `photo.jpg` with `n = 2` becomes `photo_2.jpg`; `n = 0` keeps the name.
///
/// The suffix goes before the last extension. Names without one, including
/// dot files such as `.bashrc`, get it at the end.
pub fn suffixed_name(file_name: &OsStr, n: u32) -> OsString {
    if n == 0 {
        return file_name.to_os_string();
    }
    let path = Path::new(file_name);
    let suffix = format!("_{}", n);
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => {
            let mut name = stem.to_os_string();
            name.push(&suffix);
            name.push(".");
            name.push(ext);
            name
        }
        _ => {
            let mut name = file_name.to_os_string();
            name.push(&suffix);
            name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Rule;
    use std::thread;
    use tempfile::TempDir;

    fn photo() -> &'static OsStr {
        OsStr::new("photo.jpg")
    }

    fn target(category: &str) -> Target<'_> {
        Target {
            category,
            special_subdir: None,
            date_bucket: None,
        }
    }

    #[test]
    fn test_suffixed_name() {
        assert_eq!(suffixed_name(OsStr::new("photo.jpg"), 0), "photo.jpg");
        assert_eq!(suffixed_name(OsStr::new("photo.jpg"), 1), "photo_1.jpg");
        assert_eq!(suffixed_name(OsStr::new("backup.tar.gz"), 3), "backup.tar_3.gz");
        assert_eq!(suffixed_name(OsStr::new("README"), 2), "README_2");
        assert_eq!(suffixed_name(OsStr::new(".bashrc"), 1), ".bashrc_1");
    }

    #[cfg(unix)]
    #[test]
    fn test_suffixed_name_keeps_non_utf8_bytes() {
        use std::os::unix::ffi::OsStrExt;

        let name = OsStr::from_bytes(b"caf\xe9.jpg");
        assert_eq!(suffixed_name(name, 0), name);
        assert_eq!(
            suffixed_name(name, 2).as_bytes(),
            b"caf\xe9_2.jpg".as_slice()
        );
    }

    #[test]
    fn test_base_dir_layout() {
        let allocator = PathAllocator::new("/dst");
        let full = Target {
            category: "images",
            special_subdir: Some("raw"),
            date_bucket: Some("2022/12"),
        };
        assert_eq!(
            allocator.base_dir(&full),
            Path::new("/dst/images/raw/2022/12")
        );
        assert_eq!(allocator.base_dir(&target("docs")), Path::new("/dst/docs"));
    }

    #[test]
    fn test_prepare_creates_category_tree() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("out");
        let rules = RuleIndex::from_rules(&[
            Rule::new("images", &["jpg", "raw"]).with_separate(&["raw"]),
            Rule::new("docs", &["pdf"]),
        ]);
        let allocator = PathAllocator::new(&root);

        allocator.prepare(&rules).unwrap();
        assert!(root.join("images/raw").is_dir());
        assert!(root.join("docs").is_dir());
        assert!(root.join(UNKNOWN_CATEGORY).is_dir());

        // Running again into the same destination is fine.
        allocator.prepare(&rules).unwrap();
    }

    #[test]
    fn test_reserve_uses_original_name_when_free() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("images")).unwrap();
        let allocator = PathAllocator::new(dir.path());

        let (plan, _file) = allocator.reserve(&target("images"), photo()).unwrap();
        assert_eq!(plan.final_name, "photo.jpg");
        assert!(plan.path().exists());
    }

    #[test]
    fn test_reserve_skips_taken_suffixes() {
        let dir = TempDir::new().unwrap();
        let images = dir.path().join("images");
        fs::create_dir(&images).unwrap();
        fs::write(images.join("photo.jpg"), b"a").unwrap();
        fs::write(images.join("photo_1.jpg"), b"b").unwrap();
        fs::write(images.join("photo_3.jpg"), b"c").unwrap();
        let allocator = PathAllocator::new(dir.path());

        let (first, _f1) = allocator.reserve(&target("images"), photo()).unwrap();
        let (second, _f2) = allocator.reserve(&target("images"), photo()).unwrap();
        assert_eq!(first.final_name, "photo_2.jpg");
        assert_eq!(second.final_name, "photo_4.jpg");

        // Existing files are untouched.
        assert_eq!(fs::read(images.join("photo_1.jpg")).unwrap(), b"b");
    }

    #[test]
    fn test_reserve_creates_date_bucket() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("images")).unwrap();
        let allocator = PathAllocator::new(dir.path());
        let bucketed = Target {
            category: "images",
            special_subdir: None,
            date_bucket: Some("2022/12"),
        };

        let (plan, _file) = allocator.reserve(&bucketed, photo()).unwrap();
        assert_eq!(plan.base_dir, dir.path().join("images/2022/12"));
        assert!(plan.path().is_file());

        let (again, _file) = allocator.reserve(&bucketed, photo()).unwrap();
        assert_eq!(again.final_name, "photo_1.jpg");
    }

    #[test]
    fn test_reserve_fails_without_category_dir() {
        let dir = TempDir::new().unwrap();
        let allocator = PathAllocator::new(dir.path());
        assert!(allocator.reserve(&target("missing"), photo()).is_err());
    }

    #[test]
    fn test_concurrent_reservations_never_collide() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("images")).unwrap();
        let allocator = PathAllocator::new(dir.path());

        let names: Vec<OsString> = thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    s.spawn(|| {
                        (0..8)
                            .map(|_| {
                                allocator
                                    .reserve(&target("images"), photo())
                                    .unwrap()
                                    .0
                                    .final_name
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        let unique: HashSet<_> = names.iter().collect();
        assert_eq!(names.len(), 128);
        assert_eq!(unique.len(), 128);
        assert!(unique.contains(&OsString::from("photo.jpg")));
        assert!(unique.contains(&OsString::from("photo_127.jpg")));
    }

    #[test]
    fn test_plan_touches_nothing_and_remembers_names() {
        let dir = TempDir::new().unwrap();
        let allocator = PathAllocator::new(dir.path().join("out"));
        let bucketed = Target {
            category: "images",
            special_subdir: None,
            date_bucket: Some("2022"),
        };

        let first = allocator.plan(&bucketed, photo()).unwrap();
        let second = allocator.plan(&bucketed, photo()).unwrap();
        assert_eq!(first.final_name, "photo.jpg");
        assert_eq!(second.final_name, "photo_1.jpg");
        assert!(!dir.path().join("out").exists());
    }
}
