//! Rule document and file filtering configuration.
//!
//! The rule document routes file extensions to categories. It is stored in
//! TOML and may carry an optional `[filters]` table that excludes files from
//! the copy entirely:
//!
//! ```toml
//! [[rules]]
//! category = "images"
//! extensions = ["jpg", "png", "raw"]
//! separate = ["raw"]
//! sort = "month"
//!
//! [[rules]]
//! category = "documents"
//! extensions = ["pdf", "txt"]
//!
//! [filters]
//! include_hidden = false
//!
//! [filters.exclude]
//! filenames = [".DS_Store", "Thumbs.db"]
//! patterns = ["**/node_modules/**"]
//! extensions = ["tmp"]
//! regex = []
//!
//! [filters.include]
//! patterns = []
//! ```

use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// File name looked up in the working directory when no rule path is given.
pub const LOCAL_RULES_FILE: &str = "sortcopy.toml";

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Rule file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("Failed to read rule file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid rule file: {0}")]
    ConfigInvalid(String),

    #[error("Rule #{index} has an empty category name")]
    EmptyCategory { index: usize },

    #[error("Category '{0}' is defined more than once")]
    DuplicateCategory(String),

    #[error("Invalid glob pattern '{0}'")]
    InvalidGlobPattern(String),

    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidRegexPattern { pattern: String, reason: String },
}

/// How files of a category are bucketed by their content date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateBucketMode {
    /// `YYYY/MM` nested directories.
    Month,
    /// `YYYY` directory.
    Year,
}

impl std::fmt::Display for DateBucketMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateBucketMode::Month => write!(f, "month"),
            DateBucketMode::Year => write!(f, "year"),
        }
    }
}

/// A single categorization rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Destination directory name, unique across the document.
    pub category: String,

    /// Extensions routed to this category, matched case-sensitively.
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Extensions that get their own subdirectory under the category.
    #[serde(default)]
    pub separate: Vec<String>,

    /// Optional date bucketing for this category.
    #[serde(default)]
    pub sort: Option<DateBucketMode>,
}

impl Rule {
    /// Creates a rule without special subdirectories or date bucketing.
    pub fn new(category: &str, extensions: &[&str]) -> Self {
        Self {
            category: category.to_string(),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            separate: Vec::new(),
            sort: None,
        }
    }

    /// Routes the given extensions into their own subdirectories.
    pub fn with_separate(mut self, separate: &[&str]) -> Self {
        self.separate = separate.iter().map(|e| e.to_string()).collect();
        self
    }

    /// Enables date bucketing.
    pub fn with_sort(mut self, mode: DateBucketMode) -> Self {
        self.sort = Some(mode);
        self
    }
}

/// The full rule document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub rules: Vec<Rule>,

    #[serde(default)]
    pub filters: FilterRules,
}

/// Filter rules deciding which files take part in the copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRules {
    /// Whether files starting with "." are copied. Defaults to true.
    #[serde(default = "default_include_hidden")]
    pub include_hidden: bool,

    #[serde(default)]
    pub exclude: ExcludeRules,

    /// Whitelist overriding every exclude rule.
    #[serde(default)]
    pub include: IncludeRules,
}

fn default_include_hidden() -> bool {
    true
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            include_hidden: default_include_hidden(),
            exclude: ExcludeRules::default(),
            include: IncludeRules::default(),
        }
    }
}

/// Rules for excluding files from the copy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExcludeRules {
    /// Exact file names (e.g. ".DS_Store").
    #[serde(default)]
    pub filenames: Vec<String>,

    /// Glob patterns matched against the path relative to the source root.
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Extensions, compared case-insensitively.
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Regex patterns matched against the file name.
    #[serde(default)]
    pub regex: Vec<String>,
}

/// Glob patterns that override exclude rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncludeRules {
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl RuleConfig {
    /// Loads the rule document.
    ///
    /// Lookup order:
    /// 1. `rules_path`, when given
    /// 2. `sortcopy.toml` in the current directory
    /// 3. `~/.config/sortcopy/rules.toml`
    /// 4. the built-in default rule set
    ///
    /// # Errors
    ///
    /// Returns an error if a file is found (or explicitly named) but cannot be
    /// read or parsed, or if the document fails validation.
    pub fn load(rules_path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match Self::locate(rules_path) {
            Some(path) => {
                debug!(path = %path.display(), "loading rule file");
                Self::load_from_file(&path)?
            }
            None => {
                debug!("no rule file found, using built-in rules");
                Self::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    fn locate(rules_path: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = rules_path {
            return Some(path.to_path_buf());
        }

        let local = PathBuf::from(LOCAL_RULES_FILE);
        if local.exists() {
            return Some(local);
        }

        if let Ok(home) = std::env::var("HOME") {
            let home_rules = PathBuf::from(home)
                .join(".config")
                .join("sortcopy")
                .join("rules.toml");
            if home_rules.exists() {
                return Some(home_rules);
            }
        }

        None
    }

    /// Loads and parses a rule document from a specific file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml(&content)
    }

    /// Parses a rule document from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
    }

    /// Checks the invariants the copy engine relies on.
    ///
    /// Empty or duplicated category names are errors. Extensions claimed by
    /// more than one rule are reported and resolved later by letting the last
    /// rule win.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut categories = HashSet::new();
        let mut seen_extensions: HashSet<&str> = HashSet::new();

        for (index, rule) in self.rules.iter().enumerate() {
            if rule.category.trim().is_empty() {
                return Err(ConfigError::EmptyCategory { index });
            }
            if !categories.insert(rule.category.as_str()) {
                return Err(ConfigError::DuplicateCategory(rule.category.clone()));
            }
            for ext in &rule.extensions {
                if !seen_extensions.insert(ext.as_str()) {
                    warn!(
                        extension = %ext,
                        category = %rule.category,
                        "extension listed by more than one rule, last rule wins"
                    );
                }
            }
            for sub in &rule.separate {
                if !rule.extensions.contains(sub) {
                    warn!(
                        extension = %sub,
                        category = %rule.category,
                        "separate entry is not one of the rule's extensions"
                    );
                }
            }
        }
        Ok(())
    }

    /// Returns true when any rule asks for date bucketing.
    pub fn uses_date_buckets(&self) -> bool {
        self.rules.iter().any(|rule| rule.sort.is_some())
    }

    /// Compiles the filter section into matchers.
    pub fn compile_filters(&self) -> Result<CompiledFilters, ConfigError> {
        CompiledFilters::new(&self.filters)
    }
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            rules: vec![
                Rule::new(
                    "images",
                    &[
                        "png", "jpg", "jpeg", "gif", "webp", "svg", "bmp", "tiff", "ico", "heic",
                    ],
                ),
                Rule::new("audio", &["mp3", "wav", "ogg", "flac", "aac", "m4a", "wma"]),
                Rule::new(
                    "videos",
                    &["mp4", "mkv", "avi", "mov", "flv", "wmv", "webm", "3gp"],
                ),
                Rule::new(
                    "documents",
                    &["pdf", "txt", "md", "doc", "docx", "rtf", "odt", "html"],
                ),
                Rule::new("archives", &["zip", "rar", "7z", "tar", "gz", "bz2", "xz"]),
                Rule::new(
                    "code",
                    &[
                        "rs", "py", "js", "ts", "java", "c", "cpp", "h", "go", "sh", "json", "xml",
                        "yaml", "yml", "toml",
                    ],
                ),
                Rule::new("spreadsheets", &["csv", "xls", "xlsx", "ods"]),
                Rule::new("presentations", &["ppt", "pptx", "odp"]),
                Rule::new("fonts", &["ttf", "otf", "woff", "woff2"]),
            ],
            filters: FilterRules::default(),
        }
    }
}

/// Compiled filter matchers.
pub struct CompiledFilters {
    include_hidden: bool,
    exclude_filenames: HashSet<String>,
    exclude_extensions: HashSet<String>,
    exclude_patterns: Vec<Pattern>,
    exclude_regexes: Vec<Regex>,
    include_patterns: Vec<Pattern>,
}

impl Default for CompiledFilters {
    fn default() -> Self {
        Self {
            include_hidden: true,
            exclude_filenames: HashSet::new(),
            exclude_extensions: HashSet::new(),
            exclude_patterns: Vec::new(),
            exclude_regexes: Vec::new(),
            include_patterns: Vec::new(),
        }
    }
}

impl CompiledFilters {
    fn new(rules: &FilterRules) -> Result<Self, ConfigError> {
        let compile_globs = |patterns: &[String]| {
            patterns
                .iter()
                .map(|pattern| {
                    Pattern::new(pattern)
                        .map_err(|_| ConfigError::InvalidGlobPattern(pattern.clone()))
                })
                .collect::<Result<Vec<_>, _>>()
        };

        let exclude_regexes = rules
            .exclude
            .regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidRegexPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            include_hidden: rules.include_hidden,
            exclude_filenames: rules.exclude.filenames.iter().cloned().collect(),
            exclude_extensions: rules
                .exclude
                .extensions
                .iter()
                .map(|ext| ext.to_lowercase())
                .collect(),
            exclude_patterns: compile_globs(&rules.exclude.patterns)?,
            exclude_regexes,
            include_patterns: compile_globs(&rules.include.patterns)?,
        })
    }

    /// Checks whether a file takes part in the copy.
    ///
    /// `relative_path` is the file's path relative to the source root. Checks
    /// run in this order, stopping at the first decision:
    /// 1. include patterns (always include)
    /// 2. hidden files, when disabled
    /// 3. exact file name
    /// 4. extension
    /// 5. exclude glob patterns
    /// 6. exclude regexes on the file name
    pub fn should_include(&self, relative_path: &Path) -> bool {
        let file_name = relative_path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        if self
            .include_patterns
            .iter()
            .any(|pattern| pattern.matches_path(relative_path))
        {
            return true;
        }

        if !self.include_hidden && file_name.starts_with('.') {
            return false;
        }

        if self.exclude_filenames.contains(file_name.as_ref()) {
            return false;
        }

        if let Some(ext) = relative_path.extension() {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            if self.exclude_extensions.contains(&ext_lower) {
                return false;
            }
        }

        if self
            .exclude_patterns
            .iter()
            .any(|pattern| pattern.matches_path(relative_path))
        {
            return false;
        }

        !self
            .exclude_regexes
            .iter()
            .any(|regex| regex.is_match(&file_name))
    }
}
