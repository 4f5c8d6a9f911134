//! Discrete run events for progress displays and loggers.
//!
//! Events are emitted as they happen, from the planning thread and from
//! worker threads, so sinks must be `Send + Sync`.

use crate::coordinator::RunSummary;
use crate::transfer::OperationKind;
use std::path::PathBuf;
use std::time::Duration;

/// Something that happened during a run.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// The walker produced an accepted file.
    FileDiscovered { path: PathBuf, size: u64 },
    /// A worker began executing a plan.
    TransferStarted {
        source: PathBuf,
        destination: PathBuf,
        kind: OperationKind,
    },
    /// A plan completed. Dry runs report this too.
    TransferSucceeded {
        source: PathBuf,
        destination: PathBuf,
        kind: OperationKind,
        bytes: u64,
        elapsed: Duration,
    },
    /// A file could not be dated or transferred.
    TransferFailed { source: PathBuf, reason: String },
    /// An entry was passed over without counting as a failure.
    TransferSkipped { source: PathBuf, reason: String },
    /// The run reached its final state.
    RunFinished(RunSummary),
}

/// Receiver of [`RunEvent`]s.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &RunEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &RunEvent) {}
}

/// Forwards each event to several sinks in order.
#[derive(Default)]
pub struct Fanout<'a> {
    sinks: Vec<&'a dyn EventSink>,
}

impl<'a> Fanout<'a> {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Adds a sink; events reach sinks in insertion order.
    pub fn with(mut self, sink: &'a dyn EventSink) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for Fanout<'_> {
    fn emit(&self, event: &RunEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

/// Writes events to the `tracing` log at a level matching their weight.
///
/// Under skip-errors failures are warnings; under fail-fast they are errors.
#[derive(Debug, Clone, Copy)]
pub struct TracingSink {
    skip_errors: bool,
}

impl TracingSink {
    pub fn new(skip_errors: bool) -> Self {
        Self { skip_errors }
    }
}

impl EventSink for TracingSink {
    fn emit(&self, event: &RunEvent) {
        match event {
            RunEvent::FileDiscovered { path, size } => {
                tracing::debug!(path = %path.display(), size, "discovered");
            }
            RunEvent::TransferStarted {
                source,
                destination,
                kind,
            } => {
                tracing::debug!(
                    "{} {} -> {}",
                    kind.label(),
                    source.display(),
                    destination.display()
                );
            }
            RunEvent::TransferSucceeded {
                source,
                destination,
                kind,
                bytes,
                elapsed,
            } => {
                tracing::info!(
                    bytes,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "{} {} -> {}",
                    kind.label(),
                    source.display(),
                    destination.display()
                );
            }
            RunEvent::TransferFailed { source, reason } => {
                if self.skip_errors {
                    tracing::warn!("SKIP {} :: {}", source.display(), reason);
                } else {
                    tracing::error!("ERROR on {}: {}", source.display(), reason);
                }
            }
            RunEvent::TransferSkipped { source, reason } => {
                tracing::warn!("SKIP {} :: {}", source.display(), reason);
            }
            RunEvent::RunFinished(summary) => {
                if summary.failed > 0 {
                    tracing::warn!("Completed with {} file error(s)", summary.failed);
                } else {
                    tracing::info!("Done");
                }
            }
        }
    }
}
