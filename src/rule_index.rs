//! Compiled categorization rules.
//!
//! A [`RuleIndex`] is built once from the rule document and is read-only
//! afterwards, so it can be shared across copy workers without locking.
//!
//! # Examples
//!
//! ```
//! use sortcopy::config::Rule;
//! use sortcopy::rule_index::{RuleIndex, UNKNOWN_CATEGORY};
//!
//! let index = RuleIndex::from_rules(&[Rule::new("images", &["jpg", "png"])]);
//! assert_eq!(index.classify("jpg").category, "images");
//! assert!(!index.classify("txt").matched);
//! assert_eq!(index.classify("txt").category, UNKNOWN_CATEGORY);
//! ```

use crate::config::{DateBucketMode, Rule};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Category assigned to files whose extension matches no rule.
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Result of looking up an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification<'a> {
    /// The matched category, or [`UNKNOWN_CATEGORY`].
    pub category: &'a str,
    /// Whether a rule matched.
    pub matched: bool,
}

/// A file that has been routed to a category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedFile {
    pub source_path: PathBuf,
    /// Extension without the leading dot, empty when the name has none.
    pub extension: String,
    /// Never empty.
    pub category: String,
}

impl ClassifiedFile {
    /// The final path component as text.
    pub fn file_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Extension-to-category lookup tables.
#[derive(Debug, Clone, Default)]
pub struct RuleIndex {
    extension_to_category: HashMap<String, String>,
    category_to_special_subdirs: HashMap<String, Vec<String>>,
    category_to_date_mode: HashMap<String, DateBucketMode>,
    // Rule order, for destination setup.
    categories: Vec<String>,
}

impl RuleIndex {
    /// Builds the index. When an extension appears in several rules the last
    /// rule wins.
    pub fn from_rules(rules: &[Rule]) -> Self {
        let mut index = Self::default();
        for rule in rules {
            index.categories.push(rule.category.clone());
            for ext in &rule.extensions {
                index
                    .extension_to_category
                    .insert(ext.clone(), rule.category.clone());
            }
            if !rule.separate.is_empty() {
                let subdirs = index
                    .category_to_special_subdirs
                    .entry(rule.category.clone())
                    .or_default();
                for sub in &rule.separate {
                    if !subdirs.contains(sub) {
                        subdirs.push(sub.clone());
                    }
                }
            }
            if let Some(mode) = rule.sort {
                index
                    .category_to_date_mode
                    .insert(rule.category.clone(), mode);
            }
        }
        index
    }

    /// Resolves an extension to its category.
    pub fn classify(&self, extension: &str) -> Classification<'_> {
        match self.extension_to_category.get(extension) {
            Some(category) => Classification {
                category,
                matched: true,
            },
            None => Classification {
                category: UNKNOWN_CATEGORY,
                matched: false,
            },
        }
    }

    /// Classifies a file by its name, warning when no rule matches.
    pub fn classify_file(&self, path: &Path) -> ClassifiedFile {
        let extension = extension_of(path);
        let classification = self.classify(&extension);
        if !classification.matched {
            warn!(
                extension = %extension,
                path = %path.display(),
                "extension matches no rule, copying to '{}'",
                UNKNOWN_CATEGORY
            );
        }
        ClassifiedFile {
            source_path: path.to_path_buf(),
            extension,
            category: classification.category.to_string(),
        }
    }

    /// Returns the special subdirectory for `extension` within `category`,
    /// only when the extension is explicitly listed for that category.
    pub fn special_subdir(&self, category: &str, extension: &str) -> Option<&str> {
        self.category_to_special_subdirs
            .get(category)?
            .iter()
            .find(|sub| *sub == extension)
            .map(String::as_str)
    }

    /// Returns the date bucketing mode of a category.
    pub fn date_mode(&self, category: &str) -> Option<DateBucketMode> {
        self.category_to_date_mode.get(category).copied()
    }

    /// Iterates over categories in rule order with their special subdirectories.
    pub fn categories(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.categories.iter().map(|category| {
            let subdirs = self
                .category_to_special_subdirs
                .get(category)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            (category.as_str(), subdirs)
        })
    }
}

/// Extension of a path without the leading dot, case preserved.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> RuleIndex {
        RuleIndex::from_rules(&[
            Rule::new("images", &["jpg", "png", "raw"])
                .with_separate(&["raw"])
                .with_sort(DateBucketMode::Year),
            Rule::new("documents", &["pdf", "txt"]),
        ])
    }

    #[test]
    fn test_classify_matches_rule() {
        let index = sample_index();
        assert_eq!(
            index.classify("png"),
            Classification {
                category: "images",
                matched: true
            }
        );
        assert_eq!(index.classify("pdf").category, "documents");
    }

    #[test]
    fn test_classify_unknown() {
        let index = sample_index();
        let result = index.classify("xyz");
        assert_eq!(result.category, UNKNOWN_CATEGORY);
        assert!(!result.matched);
        assert!(!index.classify("").matched);
    }

    #[test]
    fn test_classify_is_case_sensitive() {
        let index = sample_index();
        assert!(!index.classify("JPG").matched);
    }

    #[test]
    fn test_classify_is_stable() {
        let index = sample_index();
        assert_eq!(index.classify("jpg"), index.classify("jpg"));
    }

    #[test]
    fn test_last_rule_wins_for_duplicate_extension() {
        let index = RuleIndex::from_rules(&[
            Rule::new("first", &["dat"]),
            Rule::new("second", &["dat"]),
        ]);
        assert_eq!(index.classify("dat").category, "second");
    }

    #[test]
    fn test_special_subdir_requires_explicit_listing() {
        let index = sample_index();
        assert_eq!(index.special_subdir("images", "raw"), Some("raw"));
        assert_eq!(index.special_subdir("images", "jpg"), None);
        assert_eq!(index.special_subdir("documents", "raw"), None);
        assert_eq!(index.special_subdir(UNKNOWN_CATEGORY, "raw"), None);
    }

    #[test]
    fn test_date_mode() {
        let index = sample_index();
        assert_eq!(index.date_mode("images"), Some(DateBucketMode::Year));
        assert_eq!(index.date_mode("documents"), None);
    }

    #[test]
    fn test_classify_file_derives_extension() {
        let index = sample_index();
        let file = index.classify_file(Path::new("/src/trip/beach.png"));
        assert_eq!(file.extension, "png");
        assert_eq!(file.category, "images");
        assert_eq!(file.file_name(), "beach.png");

        let no_ext = index.classify_file(Path::new("/src/README"));
        assert_eq!(no_ext.extension, "");
        assert_eq!(no_ext.category, UNKNOWN_CATEGORY);

        let multi = index.classify_file(Path::new("backup.tar.txt"));
        assert_eq!(multi.extension, "txt");
        assert_eq!(multi.category, "documents");
    }

    #[test]
    fn test_categories_in_rule_order() {
        let index = sample_index();
        let categories: Vec<_> = index.categories().collect();
        assert_eq!(categories.len(), 2);
        assert_eq!(categories[0].0, "images");
        assert_eq!(categories[0].1, ["raw".to_string()]);
        assert_eq!(categories[1].0, "documents");
        assert!(categories[1].1.is_empty());
    }
}
