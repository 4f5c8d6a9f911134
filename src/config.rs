//! Run configuration and file filtering rules.
//!
//! Settings come from three layers, later ones winning: built-in defaults,
//! an optional TOML file, and command-line flags. The merged
//! [`RunOptions`] are checked once by [`RunOptions::validate`]; every
//! problem found there is fatal and reported before any file is touched.
//!
//! # Configuration File Format
//!
//! ```toml
//! [defaults]
//! extensions = [".wav"]
//! workers = 4
//! date_source = "filename"   # or "mtime"
//! readonly = false
//! skip_errors = false
//! follow_links = false
//! failure_report_limit = 20
//! nonzero_exit_on_failure = true
//!
//! [filters]
//! enable_hidden_files = false
//!
//! [filters.exclude]
//! filenames = ["Thumbs.db"]
//! patterns = ["**/trash/**"]
//! extensions = ["part"]
//! regex = []
//!
//! [filters.include]
//! patterns = []
//! ```

use crate::date_extractor::DateSource;
use crate::transfer::TransferMode;
use crate::walker::normalize_extension;
use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Name of the per-directory configuration file.
pub const LOCAL_CONFIG_NAME: &str = ".scansortrc.toml";
/// Default number of failures listed in the run summary.
pub const DEFAULT_FAILURE_REPORT_LIMIT: usize = 20;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Configuration file not found at the specified path.
    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),
    /// Invalid TOML syntax or structure.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
    /// Invalid glob pattern provided.
    #[error("Invalid glob pattern '{0}': expected *.ext or dir/**")]
    InvalidGlobPattern(String),
    /// Invalid regex pattern provided with the actual error reason.
    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidRegexPattern { pattern: String, reason: String },
    /// IO error while reading configuration.
    #[error("IO error reading configuration: {0}")]
    IoError(String),
    /// Worker count must be at least one.
    #[error("Invalid worker count {0}: must be a positive integer")]
    InvalidWorkerCount(usize),
    #[error("Source directory not found: {}", .0.display())]
    SourceNotFound(PathBuf),
    #[error("Source is not a directory: {}", .0.display())]
    SourceNotDirectory(PathBuf),
    #[error("Source directory unreadable {}: {reason}", .path.display())]
    SourceUnreadable { path: PathBuf, reason: String },
    #[error("Destination exists but is not a directory: {}", .0.display())]
    DestinationNotDirectory(PathBuf),
    /// The destination would be re-walked as part of the source.
    #[error(
        "Destination {} is inside source {}",
        .destination_root.display(),
        .source_root.display()
    )]
    DestinationInsideSource {
        source_root: PathBuf,
        destination_root: PathBuf,
    },
    #[error("Cannot create destination {}: {reason}", .path.display())]
    DestinationUnusable { path: PathBuf, reason: String },
}

/// Contents of a configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SortConfig {
    #[serde(default)]
    pub defaults: RunDefaults,
    #[serde(default)]
    pub filters: FilterRules,
}

/// Default values for run settings that flags may override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunDefaults {
    /// Accepted extensions; empty accepts every file.
    pub extensions: Vec<String>,
    pub workers: usize,
    pub date_source: DateSource,
    pub readonly: bool,
    pub skip_errors: bool,
    pub follow_links: bool,
    pub failure_report_limit: usize,
    /// Whether per-file failures make the process exit non-zero.
    pub nonzero_exit_on_failure: bool,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            extensions: vec![".wav".to_string()],
            workers: 1,
            date_source: DateSource::Filename,
            readonly: false,
            skip_errors: false,
            follow_links: false,
            failure_report_limit: DEFAULT_FAILURE_REPORT_LIMIT,
            nonzero_exit_on_failure: true,
        }
    }
}

/// The `[filters]` table: which walked files are handed to the sorter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterRules {
    /// Let dot-files and anything under a dot-directory through.
    ///
    /// Off by default, which keeps out AppleDouble `._*` sidecars and
    /// volume folders such as `.Trashes` or `.Spotlight-V100`.
    #[serde(default)]
    pub enable_hidden_files: bool,

    #[serde(default)]
    pub exclude: ExcludeRules,

    /// Checked first; a match here beats every other rule.
    #[serde(default)]
    pub include: IncludeRules,
}

/// The `[filters.exclude]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExcludeRules {
    /// File names dropped wherever they appear, e.g. `Thumbs.db`.
    #[serde(default)]
    pub filenames: Vec<String>,

    /// Globs over the path below the source root, e.g. `card*/trash/**`.
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Extensions dropped even when the run accepts them; dot optional.
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Regexes over the bare file name.
    #[serde(default)]
    pub regex: Vec<String>,
}

/// The `[filters.include]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncludeRules {
    /// Globs over the path below the source root.
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl FilterRules {
    /// Parses every glob and regex once, ahead of the walk.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidGlobPattern`] or [`ConfigError::InvalidRegexPattern`]
    /// for the first pattern that does not parse.
    pub fn compile(self) -> Result<CompiledFilters, ConfigError> {
        CompiledFilters::new(self)
    }
}

/// [`FilterRules`] ready for matching.
#[derive(Debug, Clone)]
pub struct CompiledFilters {
    enable_hidden_files: bool,
    exclude_filenames: HashSet<String>,
    exclude_extensions: HashSet<String>,
    exclude_patterns: Vec<Pattern>,
    exclude_regexes: Vec<Regex>,
    include_patterns: Vec<Pattern>,
}

fn compile_globs(patterns: &[String]) -> Result<Vec<Pattern>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            Pattern::new(pattern).map_err(|_| ConfigError::InvalidGlobPattern(pattern.clone()))
        })
        .collect()
}

fn is_hidden(path: &Path) -> bool {
    path.components().any(|component| match component {
        Component::Normal(part) => part.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

impl CompiledFilters {
    fn new(rules: FilterRules) -> Result<Self, ConfigError> {
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
            enable_hidden_files: rules.enable_hidden_files,
            exclude_patterns: compile_globs(&rules.exclude.patterns)?,
            include_patterns: compile_globs(&rules.include.patterns)?,
            exclude_filenames: rules.exclude.filenames.into_iter().collect(),
            exclude_extensions: rules
                .exclude
                .extensions
                .iter()
                .map(|ext| normalize_extension(ext))
                .collect(),
            exclude_regexes,
        })
    }

    /// Whether a file at `relative` (below the source root) stays in the run.
    ///
    /// An include glob match keeps the file outright. Otherwise the file is
    /// dropped if it or any folder above it is hidden, or if it matches an
    /// excluded name, extension, glob or regex.
    pub fn should_include(&self, relative: &Path) -> bool {
        if self
            .include_patterns
            .iter()
            .any(|pattern| pattern.matches_path(relative))
        {
            return true;
        }
        if !self.enable_hidden_files && is_hidden(relative) {
            return false;
        }

        let name = relative
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        let extension = relative
            .extension()
            .map(|ext| normalize_extension(&ext.to_string_lossy()));

        !(self.exclude_filenames.contains(name.as_ref())
            || extension.is_some_and(|ext| self.exclude_extensions.contains(&ext))
            || self
                .exclude_patterns
                .iter()
                .any(|pattern| pattern.matches_path(relative))
            || self.exclude_regexes.iter().any(|regex| regex.is_match(&name)))
    }
}

/// Unvalidated settings for one run, after merging every layer.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub source_root: PathBuf,
    pub destination_root: PathBuf,
    pub mode: TransferMode,
    pub dry_run: bool,
    pub readonly: bool,
    pub skip_errors: bool,
    pub date_source: DateSource,
    pub extensions: Vec<String>,
    pub workers: usize,
    pub follow_links: bool,
    pub failure_report_limit: usize,
    pub nonzero_exit_on_failure: bool,
    pub filters: FilterRules,
}

impl RunOptions {
    /// Options for copying `source_root` into `destination_root` with built-in defaults.
    pub fn new(source_root: impl Into<PathBuf>, destination_root: impl Into<PathBuf>) -> Self {
        Self::from_config(source_root, destination_root, SortConfig::default())
    }

    /// Options seeded from a loaded configuration file.
    pub fn from_config(
        source_root: impl Into<PathBuf>,
        destination_root: impl Into<PathBuf>,
        config: SortConfig,
    ) -> Self {
        let defaults = config.defaults;
        Self {
            source_root: source_root.into(),
            destination_root: destination_root.into(),
            mode: TransferMode::Copy,
            dry_run: false,
            readonly: defaults.readonly,
            skip_errors: defaults.skip_errors,
            date_source: defaults.date_source,
            extensions: defaults.extensions,
            workers: defaults.workers,
            follow_links: defaults.follow_links,
            failure_report_limit: defaults.failure_report_limit,
            nonzero_exit_on_failure: defaults.nonzero_exit_on_failure,
            filters: config.filters,
        }
    }

    /// Checks every setting and prepares the destination root.
    ///
    /// Real runs create the destination root if needed; dry runs never
    /// write anything.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`]; all of them are fatal for the run.
    pub fn validate(self) -> Result<RunConfig, ConfigError> {
        let workers =
            NonZeroUsize::new(self.workers).ok_or(ConfigError::InvalidWorkerCount(self.workers))?;

        let source_root = absolute(&self.source_root);
        let meta = fs::metadata(&source_root).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ConfigError::SourceNotFound(source_root.clone()),
            _ => ConfigError::SourceUnreadable {
                path: source_root.clone(),
                reason: e.to_string(),
            },
        })?;
        if !meta.is_dir() {
            return Err(ConfigError::SourceNotDirectory(source_root));
        }
        fs::read_dir(&source_root).map_err(|e| ConfigError::SourceUnreadable {
            path: source_root.clone(),
            reason: e.to_string(),
        })?;

        let destination_root = absolute(&self.destination_root);
        if destination_root.exists() && !destination_root.is_dir() {
            return Err(ConfigError::DestinationNotDirectory(destination_root));
        }
        if resolve(&destination_root).starts_with(resolve(&source_root)) {
            return Err(ConfigError::DestinationInsideSource {
                source_root,
                destination_root,
            });
        }

        let filters = self.filters.compile()?;

        if !self.dry_run {
            fs::create_dir_all(&destination_root).map_err(|e| ConfigError::DestinationUnusable {
                path: destination_root.clone(),
                reason: e.to_string(),
            })?;
        }

        Ok(RunConfig {
            source_root,
            destination_root,
            mode: self.mode,
            dry_run: self.dry_run,
            readonly: self.readonly,
            skip_errors: self.skip_errors,
            date_source: self.date_source,
            extensions: self
                .extensions
                .iter()
                .map(|e| normalize_extension(e))
                .collect(),
            workers,
            follow_links: self.follow_links,
            failure_report_limit: self.failure_report_limit,
            nonzero_exit_on_failure: self.nonzero_exit_on_failure,
            filters,
        })
    }
}

/// Validated, immutable settings for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub source_root: PathBuf,
    pub destination_root: PathBuf,
    pub mode: TransferMode,
    pub dry_run: bool,
    pub readonly: bool,
    pub skip_errors: bool,
    pub date_source: DateSource,
    /// Normalised extensions; empty accepts every file.
    pub extensions: HashSet<String>,
    pub workers: NonZeroUsize,
    pub follow_links: bool,
    pub failure_report_limit: usize,
    pub nonzero_exit_on_failure: bool,
    pub filters: CompiledFilters,
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Canonicalizes the longest existing prefix of `path` and appends the rest.
fn resolve(path: &Path) -> PathBuf {
    let mut missing = Vec::new();
    let mut current = path;
    loop {
        if let Ok(canonical) = fs::canonicalize(current) {
            return missing.iter().rev().fold(canonical, |acc, part| acc.join(part));
        }
        match (current.parent(), current.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                current = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}
