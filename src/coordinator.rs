//! End-to-end orchestration of one sorting run.
//!
//! ```text
//! Idle ──▶ Active (walk + date + plan + transfer, concurrently) ──▶ Draining ──▶ Finalized
//! ```
//!
//! Planning happens on the calling thread; only transfers run on the
//! worker pool. The [`RunSummary`] is owned here and updated solely from
//! the result stream, never by workers directly.

use crate::config::RunConfig;
use crate::date_extractor::DateExtractor;
use crate::events::{EventSink, RunEvent};
use crate::planner::DestinationPlanner;
use crate::pool::{CancelToken, Work, WorkerPool};
use crate::transfer::{OperationKind, TransferExecutor, TransferResult, TransferStatus};
use crate::walker::Walker;
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Exit status for a clean run.
pub const EXIT_OK: u8 = 0;
/// Exit status when files failed or fail-fast cancelled the run.
pub const EXIT_FAILURES: u8 = 1;
/// Exit status for configuration errors.
pub const EXIT_CONFIG: u8 = 2;

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    /// Walking, planning and transferring at the same time.
    Active,
    /// No more dispatch; collecting what is left.
    Draining,
    Finalized,
}

/// A file that failed, kept for the end-of-run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub path: PathBuf,
    pub reason: String,
}

/// Aggregate outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Results recorded, one per discovered file or unreadable entry.
    pub total_seen: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Bytes written, or that would have been written in a dry run.
    pub total_bytes: u64,
    pub elapsed: Duration,
    /// The first failures, up to the configured limit.
    pub failures: Vec<FailureRecord>,
    pub dry_run: bool,
    /// Fail-fast stopped dispatch before the walk was complete.
    pub cancelled: bool,
    #[serde(skip)]
    failure_limit: usize,
}

impl RunSummary {
    pub fn new(dry_run: bool, failure_limit: usize) -> Self {
        Self {
            total_seen: 0,
            succeeded: 0,
            skipped: 0,
            failed: 0,
            total_bytes: 0,
            elapsed: Duration::ZERO,
            failures: Vec::new(),
            dry_run,
            cancelled: false,
            failure_limit,
        }
    }

    /// Folds one result into the totals.
    pub fn record(&mut self, result: TransferResult) {
        self.total_seen += 1;
        match result.status {
            TransferStatus::Succeeded => {
                self.succeeded += 1;
                self.total_bytes += result.bytes;
            }
            TransferStatus::Skipped => self.skipped += 1,
            TransferStatus::Failed => {
                self.failed += 1;
                if self.failures.len() < self.failure_limit {
                    self.failures.push(FailureRecord {
                        path: result.source,
                        reason: result.error.unwrap_or_default(),
                    });
                }
            }
        }
    }

    /// Failures counted but not listed because of the limit.
    pub fn unlisted_failures(&self) -> usize {
        self.failed - self.failures.len()
    }

    /// Process exit status for this run.
    ///
    /// Cancellation always yields [`EXIT_FAILURES`]; plain per-file failures
    /// do so only when `nonzero_on_failure` is set.
    pub fn exit_code(&self, nonzero_on_failure: bool) -> u8 {
        if self.cancelled || (nonzero_on_failure && self.failed > 0) {
            EXIT_FAILURES
        } else {
            EXIT_OK
        }
    }
}

/// Drives walker, extractor, planner and pool through one run.
pub struct RunCoordinator<'a> {
    config: RunConfig,
    events: &'a dyn EventSink,
    cancel: CancelToken,
    phase: RunPhase,
}

impl<'a> RunCoordinator<'a> {
    pub fn new(config: RunConfig, events: &'a dyn EventSink) -> Self {
        Self {
            config,
            events,
            cancel: CancelToken::new(),
            phase: RunPhase::Idle,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Token that stops dispatch of new transfers when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn set_phase(&mut self, phase: RunPhase) {
        tracing::debug!(from = ?self.phase, to = ?phase, "run phase");
        self.phase = phase;
    }

    /// Executes the run and returns its summary.
    ///
    /// Per-file problems never abort sibling work. Without skip-errors the
    /// first failure or unreadable entry cancels further dispatch; transfers
    /// already running finish normally.
    pub fn run(&mut self) -> RunSummary {
        let started = Instant::now();
        self.set_phase(RunPhase::Active);

        let config = &self.config;
        let events = self.events;
        let cancel = &self.cancel;
        let skip_errors = config.skip_errors;
        let kind = OperationKind::new(config.mode, config.dry_run);

        tracing::info!(
            "{} {} -> {} ({} worker(s), date from {:?})",
            kind.label(),
            config.source_root.display(),
            config.destination_root.display(),
            config.workers,
            config.date_source
        );

        let walker = Walker::new(
            config.source_root.clone(),
            config.extensions.clone(),
            config.filters.clone(),
            config.follow_links,
        );
        let extractor = DateExtractor::new(config.date_source);
        let mut planner =
            DestinationPlanner::new(config.destination_root.clone(), kind, config.readonly);
        let executor = TransferExecutor::new(events);
        let pool = WorkerPool::new(config.workers);
        let mut summary = RunSummary::new(config.dry_run, config.failure_report_limit);

        let items = walker.walk().map(|entry| match entry {
            Err(err) => {
                let source = err.path().to_path_buf();
                let reason = err.to_string();
                events.emit(&RunEvent::TransferSkipped {
                    source: source.clone(),
                    reason: reason.clone(),
                });
                if !skip_errors {
                    tracing::error!("Walk error without --skip-errors, stopping: {}", reason);
                    cancel.cancel();
                }
                Work::Settled(TransferResult::skipped(source, reason))
            }
            Ok(record) => {
                events.emit(&RunEvent::FileDiscovered {
                    path: record.path.clone(),
                    size: record.size,
                });
                match extractor.extract(&record) {
                    Ok(date) => Work::Dispatch(planner.plan(&record, date)),
                    Err(err) => {
                        let reason = err.to_string();
                        events.emit(&RunEvent::TransferFailed {
                            source: record.path.clone(),
                            reason: reason.clone(),
                        });
                        Work::Settled(TransferResult::failed(record.path, None, reason))
                    }
                }
            }
        });

        let stats = pool.run(
            items,
            cancel,
            |plan| executor.execute(plan),
            |result| {
                if result.status == TransferStatus::Failed
                    && !skip_errors
                    && !cancel.is_cancelled()
                {
                    tracing::error!(
                        "Stopping after failure of {} (use --skip-errors to continue past failures)",
                        result.source.display()
                    );
                    cancel.cancel();
                }
                summary.record(result);
            },
        );
        let planned = planner.claimed();

        self.set_phase(RunPhase::Draining);
        summary.cancelled = self.cancel.is_cancelled();
        summary.elapsed = started.elapsed();
        tracing::debug!(
            planned,
            dispatched = stats.dispatched,
            cancelled = summary.cancelled,
            "pool drained"
        );
        self.events.emit(&RunEvent::RunFinished(summary.clone()));

        self.set_phase(RunPhase::Finalized);
        summary
    }
}
