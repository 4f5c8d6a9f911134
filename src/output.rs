//! Output formatting and styling module.
//!
//! Provides the terminal side of a run: a progress spinner fed from the
//! event stream and the end-of-run summary, either as a coloured table or
//! as JSON.

use crate::coordinator::RunSummary;
use crate::events::{EventSink, RunEvent};
use colored::*;
use indicatif::{HumanBytes, HumanDuration, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Manages all CLI output with consistent styling and formatting.
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints an error message in red with an X mark.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use scansort::output::OutputFormatter;
    /// OutputFormatter::error("Source directory not found: /mnt/ingest");
    /// ```
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Prints a section header.
    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Prints a dry-run notice message.
    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }

    /// Prints the run summary as a table followed by the listed failures.
    pub fn summary_table(summary: &RunSummary) {
        Self::header(if summary.dry_run {
            "DRY RUN SUMMARY"
        } else {
            "SUMMARY"
        });

        let rows = [
            ("Succeeded", summary.succeeded.to_string().green()),
            ("Skipped", summary.skipped.to_string().yellow()),
            ("Failed", summary.failed.to_string().red()),
        ];
        let width = 9;
        println!("{}", "-".repeat(width + 12));
        for (label, value) in rows {
            println!("{:<width$} | {}", label, value, width = width);
        }
        println!("{}", "-".repeat(width + 12));
        println!(
            "{:<width$} | {} {}",
            "Total".bold(),
            summary.total_seen.to_string().bold(),
            if summary.total_seen == 1 { "file" } else { "files" },
            width = width
        );
        println!(
            "{:<width$} | {}",
            "Bytes",
            HumanBytes(summary.total_bytes),
            width = width
        );
        println!(
            "{:<width$} | {}",
            "Elapsed",
            HumanDuration(summary.elapsed),
            width = width
        );

        if !summary.failures.is_empty() {
            Self::header("FAILURES");
            for failure in &summary.failures {
                println!(
                    "  {} {}: {}",
                    "✗".red(),
                    failure.path.display(),
                    failure.reason
                );
            }
            if summary.unlisted_failures() > 0 {
                println!("  ... and {} more", summary.unlisted_failures());
            }
        }

        if summary.cancelled {
            println!(
                "\n{} Run stopped early after a failure; rerun with --skip-errors to continue past failures.",
                "⚠".yellow()
            );
        }
        if summary.dry_run {
            Self::dry_run_notice("No files were modified.");
        }
    }

    /// Prints the run summary as pretty JSON on stdout.
    pub fn summary_json(summary: &RunSummary) -> serde_json::Result<()> {
        println!("{}", serde_json::to_string_pretty(summary)?);
        Ok(())
    }
}

/// Spinner that counts handled files; the total is unknown while the walk streams.
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {pos} files [{elapsed_precise}] {per_sec} {wide_msg}")
                .expect("Invalid progress bar template"),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    /// A reporter that never draws, for quiet mode.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Handled-file count so far.
    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for ProgressReporter {
    fn emit(&self, event: &RunEvent) {
        match event {
            RunEvent::TransferSucceeded { source, .. } => {
                self.bar.inc(1);
                if let Some(name) = source.file_name() {
                    self.bar.set_message(name.to_string_lossy().into_owned());
                }
            }
            RunEvent::TransferFailed { .. } | RunEvent::TransferSkipped { .. } => self.bar.inc(1),
            RunEvent::RunFinished(_) => self.bar.finish_and_clear(),
            RunEvent::FileDiscovered { .. } | RunEvent::TransferStarted { .. } => {}
        }
    }
}
