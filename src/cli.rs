//! Command-line interface module for scansort.
//!
//! This module handles all CLI-related functionality including:
//! - Argument parsing
//! - Merging flags over the configuration file
//! - Wiring the progress display and log sink into a run
//! - Rendering the summary and choosing the exit status

use crate::config::{RunOptions, SortConfig};
use crate::coordinator::{EXIT_CONFIG, RunCoordinator};
use crate::date_extractor::DateSource;
use crate::events::{Fanout, TracingSink};
use crate::output::{OutputFormatter, ProgressReporter};
use crate::transfer::TransferMode;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// Sort scanner recordings into YYYY/MM/DD folders.
#[derive(Debug, Clone, Parser)]
#[command(name = "scansort", version, about)]
pub struct Cli {
    /// Directory tree to scan.
    pub src: PathBuf,

    /// Root of the dated destination tree.
    pub dst: PathBuf,

    /// Move files instead of copying them.
    #[arg(long = "move")]
    pub move_files: bool,

    /// Plan and report without touching the filesystem.
    #[arg(long)]
    pub dry_run: bool,

    /// Write-protect every destination file.
    #[arg(long)]
    pub readonly: bool,

    /// Keep going after per-file failures.
    #[arg(long)]
    pub skip_errors: bool,

    /// Where the date comes from.
    #[arg(long, value_enum)]
    pub date_source: Option<DateSource>,

    /// Extension to accept; repeat for several. Replaces the configured set.
    #[arg(long = "ext", value_name = "EXT")]
    pub extensions: Vec<String>,

    /// Number of concurrent transfers.
    #[arg(short = 'j', long)]
    pub workers: Option<usize>,

    /// Follow symbolic links while walking.
    #[arg(long)]
    pub follow_links: bool,

    /// More log output (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Errors only, no progress display.
    #[arg(short, long)]
    pub quiet: bool,

    /// Also write log lines to this file.
    #[arg(long, value_name = "PATH")]
    pub logfile: Option<PathBuf>,

    /// Configuration file to use instead of the default lookup.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print the run summary as JSON.
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    /// Whether the spinner is drawn.
    ///
    /// It shares stderr with the console log, so it is off whenever log
    /// lines above the default level may be written, and under `-q` or `--json`.
    pub fn shows_progress(&self) -> bool {
        !(self.quiet || self.json || self.verbose > 0)
    }

    /// Layers the flags over `config`.
    ///
    /// Boolean flags only switch features on; a value given in the
    /// configuration file cannot be turned off from the command line.
    pub fn into_options(self, config: SortConfig) -> RunOptions {
        let mut options = RunOptions::from_config(self.src, self.dst, config);
        if self.move_files {
            options.mode = TransferMode::Move;
        }
        options.dry_run = self.dry_run;
        options.readonly |= self.readonly;
        options.skip_errors |= self.skip_errors;
        options.follow_links |= self.follow_links;
        if let Some(source) = self.date_source {
            options.date_source = source;
        }
        if !self.extensions.is_empty() {
            options.extensions = self.extensions;
        }
        if let Some(workers) = self.workers {
            options.workers = workers;
        }
        options
    }
}

/// Runs one sort described by `cli` and returns the process exit status.
///
/// # Examples
///
/// ```no_run
/// use clap::Parser;
/// use scansort::cli::{Cli, run_cli};
///
/// let cli = Cli::parse_from(["scansort", "/mnt/ingest", "/srv/archive", "--dry-run"]);
/// std::process::exit(run_cli(cli).into());
/// ```
pub fn run_cli(cli: Cli) -> u8 {
    let quiet = cli.quiet;
    let json = cli.json;
    let show_progress = cli.shows_progress();

    let config = match SortConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            OutputFormatter::error(&format!("Error loading configuration: {}", e));
            return EXIT_CONFIG;
        }
    };
    let config = match cli.into_options(config).validate() {
        Ok(config) => config,
        Err(e) => {
            OutputFormatter::error(&e.to_string());
            return EXIT_CONFIG;
        }
    };

    if config.dry_run && !quiet && !json {
        OutputFormatter::dry_run_notice(&format!(
            "Planning {} -> {}",
            config.source_root.display(),
            config.destination_root.display()
        ));
    }

    let nonzero_exit_on_failure = config.nonzero_exit_on_failure;
    let logger = TracingSink::new(config.skip_errors);
    let progress = if show_progress {
        ProgressReporter::new()
    } else {
        ProgressReporter::hidden()
    };
    let events = Fanout::new().with(&logger).with(&progress);

    let summary = RunCoordinator::new(config, &events).run();

    if json {
        if let Err(e) = OutputFormatter::summary_json(&summary) {
            OutputFormatter::error(&format!("Cannot encode summary: {}", e));
        }
    } else if !quiet {
        OutputFormatter::summary_table(&summary);
    }

    summary.exit_code(nonzero_exit_on_failure)
}
