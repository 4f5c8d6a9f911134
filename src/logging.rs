//! Log subscriber setup for the command-line tool.
//!
//! Console output goes to stderr. With a log file the same lines are
//! written there too, without colour codes.

use anyhow::Context;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Maps the quiet flag and `-v` count to a level filter.
///
/// # Examples
///
/// ```
/// use scansort::logging::level_for;
///
/// assert_eq!(level_for(0, true), "error");
/// assert_eq!(level_for(0, false), "warn");
/// assert_eq!(level_for(1, false), "info");
/// assert_eq!(level_for(5, false), "debug");
/// ```
pub fn level_for(verbose: u8, quiet: bool) -> &'static str {
    match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, _) => "debug",
    }
}

/// Installs the global subscriber.
///
/// `RUST_LOG`, when set, takes precedence over the verbosity flags.
///
/// # Errors
///
/// Fails if the log file cannot be created or a subscriber is already set.
pub fn init(verbose: u8, quiet: bool, logfile: Option<&Path>) -> anyhow::Result<()> {
    let filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level_for(verbose, quiet)))
    };
    let console = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_filter(filter());

    let file_layer = match logfile {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Cannot create log directory {}", parent.display()))?;
            }
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Cannot open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(false)
                    .with_filter(filter()),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()?;
    Ok(())
}
