/// Execution of single file transfers.
///
/// A copy is streamed into a hidden temporary file inside the destination
/// directory and renamed into place only once it is complete and flushed,
/// so readers of the destination tree never see a partial file. A move on
/// the same device links the file at its new name and then unlinks the
/// source, which fails instead of replacing a file that appeared since
/// planning. Across devices it is a copy-then-delete; the source is removed
/// only after the destination copy is durable.
use crate::events::{EventSink, RunEvent};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;

/// Prefix of in-progress temporary files in destination directories.
pub const TEMP_PREFIX: &str = ".scansort-";
const TEMP_SUFFIX: &str = ".part";
const COPY_BUFFER: usize = 1024 * 1024;

/// How files leave the source tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// Leave the source untouched.
    #[default]
    Copy,
    /// Remove the source once the destination is in place.
    Move,
}

/// The operation a plan asks the executor to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperationKind {
    Copy,
    Move,
    /// No I/O; reports what the given mode would have done.
    DryRun(TransferMode),
}

impl OperationKind {
    pub fn new(mode: TransferMode, dry_run: bool) -> Self {
        match (mode, dry_run) {
            (mode, true) => Self::DryRun(mode),
            (TransferMode::Copy, false) => Self::Copy,
            (TransferMode::Move, false) => Self::Move,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self, Self::DryRun(_))
    }

    /// Short log label, e.g. `COPY` or `[DRY] MOVE`.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Copy => "COPY",
            Self::Move => "MOVE",
            Self::DryRun(TransferMode::Copy) => "[DRY] COPY",
            Self::DryRun(TransferMode::Move) => "[DRY] MOVE",
        }
    }
}

/// A planned transfer of one file to its dated destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    pub source: PathBuf,
    /// Unique within a run.
    pub destination: PathBuf,
    pub kind: OperationKind,
    /// Write-protect the destination after a real transfer.
    pub readonly: bool,
    /// Source size at discovery time.
    pub size: u64,
}

/// Final status of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Succeeded,
    Skipped,
    Failed,
}

/// Outcome of one file, whether or not it reached the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub source: PathBuf,
    pub destination: Option<PathBuf>,
    pub status: TransferStatus,
    /// Reason for a skip or failure.
    pub error: Option<String>,
    pub bytes: u64,
    pub elapsed: Duration,
}

impl TransferResult {
    pub fn succeeded(plan: &TransferPlan, bytes: u64, elapsed: Duration) -> Self {
        Self {
            source: plan.source.clone(),
            destination: Some(plan.destination.clone()),
            status: TransferStatus::Succeeded,
            error: None,
            bytes,
            elapsed,
        }
    }

    pub fn failed(source: PathBuf, destination: Option<PathBuf>, reason: String) -> Self {
        Self {
            source,
            destination,
            status: TransferStatus::Failed,
            error: Some(reason),
            bytes: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn skipped(source: PathBuf, reason: String) -> Self {
        Self {
            source,
            destination: None,
            status: TransferStatus::Skipped,
            error: Some(reason),
            bytes: 0,
            elapsed: Duration::ZERO,
        }
    }

    fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }
}

/// Errors that can occur while transferring a single file.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The source no longer exists; it was moved or deleted after the walk.
    #[error("Source file no longer exists: {path}")]
    SourceMissing { path: PathBuf },
    /// Failed to create the dated destination directory.
    #[error("Failed to create directory {path}: {source}")]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Failed to open or stat the source file.
    #[error("Failed to read {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Failed while streaming or flushing the destination copy.
    #[error("Failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Something appeared at the destination path after planning.
    #[error("Destination already exists: {path}")]
    DestinationExists { path: PathBuf },
    /// Failed to rename the file into place.
    #[error("Failed to move {from} to {to}: {source}")]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The destination copy is complete but the source could not be deleted.
    #[error("Copied to destination but failed to remove source {path}: {source}")]
    SourceRemovalFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The destination path has no parent directory.
    #[error("Destination has no parent directory: {path}")]
    NoParent { path: PathBuf },
}

/// Result type for transfer operations.
pub type TransferOutcome<T> = Result<T, TransferError>;

/// Executes [`TransferPlan`]s and reports each one to an event sink.
///
/// The executor keeps no state between calls and may be shared by any
/// number of worker threads.
pub struct TransferExecutor<'a> {
    events: &'a dyn EventSink,
}

impl<'a> TransferExecutor<'a> {
    pub fn new(events: &'a dyn EventSink) -> Self {
        Self { events }
    }

    /// Performs `plan` and returns its result. Never panics on I/O errors.
    pub fn execute(&self, plan: &TransferPlan) -> TransferResult {
        let started = Instant::now();
        self.events.emit(&RunEvent::TransferStarted {
            source: plan.source.clone(),
            destination: plan.destination.clone(),
            kind: plan.kind,
        });

        let outcome = match plan.kind {
            OperationKind::DryRun(_) => Ok(plan.size),
            OperationKind::Copy => copy_file(&plan.source, &plan.destination),
            OperationKind::Move => move_file(plan),
        };
        let elapsed = started.elapsed();

        match outcome {
            Ok(bytes) => {
                if plan.readonly
                    && !plan.kind.is_dry_run()
                    && let Err(e) = mark_readonly(&plan.destination)
                {
                    tracing::warn!(
                        "Failed to set read-only on {}: {}",
                        plan.destination.display(),
                        e
                    );
                }
                self.events.emit(&RunEvent::TransferSucceeded {
                    source: plan.source.clone(),
                    destination: plan.destination.clone(),
                    kind: plan.kind,
                    bytes,
                    elapsed,
                });
                TransferResult::succeeded(plan, bytes, elapsed)
            }
            Err(err @ TransferError::SourceMissing { .. }) => {
                let reason = err.to_string();
                self.events.emit(&RunEvent::TransferSkipped {
                    source: plan.source.clone(),
                    reason: reason.clone(),
                });
                TransferResult::skipped(plan.source.clone(), reason).with_elapsed(elapsed)
            }
            Err(err) => {
                let reason = err.to_string();
                self.events.emit(&RunEvent::TransferFailed {
                    source: plan.source.clone(),
                    reason: reason.clone(),
                });
                TransferResult::failed(plan.source.clone(), Some(plan.destination.clone()), reason)
                    .with_elapsed(elapsed)
            }
        }
    }
}

/// Creates the destination's parent directory and its ancestors.
///
/// `create_dir_all` tolerates another worker creating the same directory
/// at the same time.
fn ensure_parent(destination: &Path) -> TransferOutcome<&Path> {
    let parent = destination
        .parent()
        .ok_or_else(|| TransferError::NoParent {
            path: destination.to_path_buf(),
        })?;
    fs::create_dir_all(parent).map_err(|source| TransferError::DirectoryCreationFailed {
        path: parent.to_path_buf(),
        source,
    })?;
    Ok(parent)
}

fn open_source(path: &Path) -> TransferOutcome<(File, Option<SystemTime>)> {
    let file = File::open(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => TransferError::SourceMissing {
            path: path.to_path_buf(),
        },
        _ => TransferError::ReadFailed {
            path: path.to_path_buf(),
            source,
        },
    })?;
    let modified = file.metadata().and_then(|m| m.modified()).ok();
    Ok((file, modified))
}

fn copy_file(source: &Path, destination: &Path) -> TransferOutcome<u64> {
    ensure_parent(destination)?;
    let (file, modified) = open_source(source)?;
    write_atomically(file, destination, modified)
}

fn move_file(plan: &TransferPlan) -> TransferOutcome<u64> {
    let (source, destination) = (&plan.source, &plan.destination);
    ensure_parent(destination)?;

    // hard_link() refuses an existing destination, unlike rename().
    match fs::hard_link(source, destination) {
        Ok(()) => {
            fs::remove_file(source).map_err(|e| TransferError::SourceRemovalFailed {
                path: source.clone(),
                source: e,
            })?;
            Ok(plan.size)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(TransferError::DestinationExists {
                path: destination.clone(),
            })
        }
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            tracing::debug!(
                src = %source.display(),
                "link crosses devices, falling back to copy and delete"
            );
            let (file, modified) = open_source(source)?;
            finish_cross_device_move(file, source, destination, modified)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound && fs::symlink_metadata(source).is_err() => {
            Err(TransferError::SourceMissing {
                path: source.clone(),
            })
        }
        Err(e) => {
            tracing::debug!(
                src = %source.display(),
                error = %e,
                "hard links unavailable, renaming"
            );
            rename_into_place(plan)
        }
    }
}

/// Moves by rename on filesystems without hard links.
fn rename_into_place(plan: &TransferPlan) -> TransferOutcome<u64> {
    let (source, destination) = (&plan.source, &plan.destination);
    if fs::symlink_metadata(destination).is_ok() {
        return Err(TransferError::DestinationExists {
            path: destination.clone(),
        });
    }

    match fs::rename(source, destination) {
        Ok(()) => Ok(plan.size),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            let (file, modified) = open_source(source)?;
            finish_cross_device_move(file, source, destination, modified)
        }
        Err(e) => Err(TransferError::RenameFailed {
            from: source.clone(),
            to: destination.clone(),
            source: e,
        }),
    }
}

/// Copies `reader` into place at `destination`, then deletes `source`.
///
/// The source is only touched after the destination has been written,
/// synced and renamed into place.
fn finish_cross_device_move<R: Read>(
    reader: R,
    source: &Path,
    destination: &Path,
    modified: Option<SystemTime>,
) -> TransferOutcome<u64> {
    let bytes = write_atomically(reader, destination, modified)?;
    fs::remove_file(source).map_err(|e| TransferError::SourceRemovalFailed {
        path: source.to_path_buf(),
        source: e,
    })?;
    Ok(bytes)
}

/// Streams `reader` into a temporary sibling of `destination` and renames it
/// into place without replacing an existing file.
///
/// On any error the temporary file is removed and nothing is left at
/// `destination`.
fn write_atomically<R: Read>(
    mut reader: R,
    destination: &Path,
    modified: Option<SystemTime>,
) -> TransferOutcome<u64> {
    let dir = destination
        .parent()
        .ok_or_else(|| TransferError::NoParent {
            path: destination.to_path_buf(),
        })?;
    let write_err = |source: io::Error| TransferError::WriteFailed {
        path: destination.to_path_buf(),
        source,
    };

    let mut temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)
        .map_err(write_err)?;

    let bytes = {
        let mut writer = BufWriter::with_capacity(COPY_BUFFER, temp.as_file_mut());
        let bytes = io::copy(&mut reader, &mut writer).map_err(write_err)?;
        writer.flush().map_err(write_err)?;
        bytes
    };

    if let Some(modified) = modified
        && let Err(e) = temp.as_file().set_modified(modified)
    {
        tracing::debug!(dest = %destination.display(), "could not preserve mtime: {}", e);
    }
    temp.as_file().sync_all().map_err(write_err)?;

    temp.persist_noclobber(destination).map_err(|e| {
        if e.error.kind() == io::ErrorKind::AlreadyExists {
            TransferError::DestinationExists {
                path: destination.to_path_buf(),
            }
        } else {
            TransferError::RenameFailed {
                from: e.file.path().to_path_buf(),
                to: destination.to_path_buf(),
                source: e.error,
            }
        }
    })?;

    Ok(bytes)
}

fn mark_readonly(path: &Path) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(true);
    fs::set_permissions(path, permissions)
}
