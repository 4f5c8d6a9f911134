//! Streaming traversal of the source tree.
//!
//! The walk is depth-first with entries sorted by name inside each
//! directory, so two runs over the same tree visit files in the same order.
//! Only one directory listing is held in memory at a time; the full file
//! list is never materialised.

use crate::config::CompiledFilters;
use std::borrow::Cow;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use walkdir::WalkDir;

/// One regular file discovered under the source root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// Size in bytes at discovery time.
    pub size: u64,
    /// Modification timestamp at discovery time.
    pub modified: SystemTime,
    /// Lower-cased extension including the dot, or empty.
    pub extension: String,
}

impl FileRecord {
    /// Base file name, lossily converted for matching and display.
    pub fn file_name(&self) -> Cow<'_, str> {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default()
    }
}

/// A directory or entry that could not be read during the walk.
#[derive(Debug, Error)]
pub enum WalkError {
    /// A followed symbolic link points back at one of its ancestors.
    #[error("Filesystem loop at {path} (points to {ancestor})")]
    Loop { path: PathBuf, ancestor: PathBuf },
    /// The entry could not be read.
    #[error("Cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    /// Metadata for a discovered file could not be read.
    #[error("Cannot stat {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WalkError {
    /// Path of the entry that failed.
    pub fn path(&self) -> &Path {
        match self {
            Self::Loop { path, .. } | Self::Unreadable { path, .. } | Self::Metadata { path, .. } => {
                path
            }
        }
    }

    fn from_walkdir(err: walkdir::Error, root: &Path) -> Self {
        let path = err.path().unwrap_or(root).to_path_buf();
        match err.loop_ancestor() {
            Some(ancestor) => Self::Loop {
                ancestor: ancestor.to_path_buf(),
                path,
            },
            None => Self::Unreadable { path, source: err },
        }
    }
}

/// Lower-cases an extension and makes sure it starts with a dot.
///
/// # Examples
///
/// ```
/// use scansort::walker::normalize_extension;
///
/// assert_eq!(normalize_extension("WAV"), ".wav");
/// assert_eq!(normalize_extension(".Mp3"), ".mp3");
/// ```
pub fn normalize_extension(ext: &str) -> String {
    let trimmed = ext.trim().trim_start_matches('.');
    format!(".{}", trimmed.to_lowercase())
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Enumerates accepted files under a root directory.
pub struct Walker {
    root: PathBuf,
    extensions: HashSet<String>,
    filters: CompiledFilters,
    follow_links: bool,
}

impl Walker {
    /// Creates a walker over `root`.
    ///
    /// `extensions` must already be normalised; an empty set accepts every file.
    pub fn new(
        root: PathBuf,
        extensions: HashSet<String>,
        filters: CompiledFilters,
        follow_links: bool,
    ) -> Self {
        Self {
            root,
            extensions,
            filters,
            follow_links,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn accepts(&self, path: &Path, extension: &str) -> bool {
        if !self.extensions.is_empty() && !self.extensions.contains(extension) {
            return false;
        }
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        self.filters.should_include(relative)
    }

    /// Lazily yields one item per accepted file or per unreadable entry.
    ///
    /// Errors never end the iteration; the caller decides whether they are fatal.
    pub fn walk(&self) -> impl Iterator<Item = Result<FileRecord, WalkError>> + '_ {
        WalkDir::new(&self.root)
            .follow_links(self.follow_links)
            .sort_by_file_name()
            .into_iter()
            .filter_map(move |entry| {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => return Some(Err(WalkError::from_walkdir(err, &self.root))),
                };
                if !entry.file_type().is_file() {
                    return None;
                }

                let extension = extension_of(entry.path());
                if !self.accepts(entry.path(), &extension) {
                    tracing::trace!(path = %entry.path().display(), "filtered out");
                    return None;
                }

                let record = entry
                    .metadata()
                    .map_err(|err| WalkError::Unreadable {
                        path: entry.path().to_path_buf(),
                        source: err,
                    })
                    .and_then(|meta| {
                        let modified = meta.modified().map_err(|source| WalkError::Metadata {
                            path: entry.path().to_path_buf(),
                            source,
                        })?;
                        Ok(FileRecord {
                            path: entry.path().to_path_buf(),
                            size: meta.len(),
                            modified,
                            extension,
                        })
                    });
                Some(record)
            })
    }
}
