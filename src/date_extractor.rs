//! Calendar date extraction for sorted files.
//!
//! A date comes either from the scanner-native file name
//! (`YYYY-MM-DD_hh-mm-ss.<ext>`) or from the file's modification time,
//! converted to a UTC calendar date so results do not depend on the host
//! time zone.
//!
//! # Examples
//!
//! ```
//! use scansort::date_extractor::date_from_filename;
//!
//! let date = date_from_filename("2024-06-01_14-30-00.wav").unwrap();
//! assert_eq!(date.to_string(), "2024-06-01");
//! assert!(date_from_filename("voice001.wav").is_none());
//! ```

use crate::walker::FileRecord;
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Earliest year a sorted date may carry.
pub const MIN_YEAR: i32 = 1970;
/// Latest year a sorted date may carry.
pub const MAX_YEAR: i32 = 9999;

static SCANNER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9]{4})-([0-9]{2})-([0-9]{2})_([0-9]{2})-([0-9]{2})-([0-9]{2})")
        .expect("scanner filename pattern is valid")
});

/// Where a file's date is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DateSource {
    /// Parse `YYYY-MM-DD_hh-mm-ss` out of the file name.
    #[default]
    Filename,
    /// Use the modification timestamp, in UTC.
    Mtime,
}

/// Errors raised when no usable date can be derived for a file.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DateParseError {
    /// The file name carries no well-formed scanner timestamp.
    #[error("No valid date in filename: {name}")]
    NoDateInName { name: String },
    /// The timestamp converts to a year outside the supported range.
    #[error("Date year {year} outside supported range {}..={}", MIN_YEAR, MAX_YEAR)]
    OutOfRange { year: i32 },
}

/// A calendar date with no time component.
///
/// Ordering is chronological. The year is always within
/// [`MIN_YEAR`]..=[`MAX_YEAR`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SortedDate(NaiveDate);

impl SortedDate {
    /// Builds a date, rejecting invalid days and years outside the supported range.
    pub fn new(year: i32, month: u32, day: u32) -> Option<Self> {
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return None;
        }
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    fn from_naive(date: NaiveDate) -> Result<Self, DateParseError> {
        Self::new(date.year(), date.month(), date.day())
            .ok_or(DateParseError::OutOfRange { year: date.year() })
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    pub fn day(&self) -> u32 {
        self.0.day()
    }

    /// Relative bucket directory, e.g. `2024/06/01`.
    pub fn bucket(&self) -> std::path::PathBuf {
        [
            format!("{:04}", self.year()),
            format!("{:02}", self.month()),
            format!("{:02}", self.day()),
        ]
        .iter()
        .collect()
    }
}

impl fmt::Display for SortedDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

/// Finds the first well-formed scanner timestamp in `name` and returns its date.
///
/// Matches with an impossible date or time (month 13, hour 25, ...) are
/// passed over in favour of later ones.
pub fn date_from_filename(name: &str) -> Option<SortedDate> {
    SCANNER_NAME.captures_iter(name).find_map(|caps| {
        let field = |i: usize| caps[i].parse::<u32>().ok();
        let year = i32::try_from(field(1)?).ok()?;
        NaiveTime::from_hms_opt(field(4)?, field(5)?, field(6)?)?;
        SortedDate::new(year, field(2)?, field(3)?)
    })
}

/// Converts a modification timestamp to its UTC calendar date.
pub fn date_from_mtime(modified: SystemTime) -> Result<SortedDate, DateParseError> {
    let utc: Option<DateTime<Utc>> = match modified.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_secs())
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, after.subsec_nanos())),
        Err(err) => {
            let before = err.duration();
            let secs = i64::try_from(before.as_secs()).ok();
            match before.subsec_nanos() {
                0 => secs.and_then(|s| DateTime::from_timestamp(-s, 0)),
                n => secs.and_then(|s| DateTime::from_timestamp(-s - 1, 1_000_000_000 - n)),
            }
        }
    };
    match utc {
        Some(utc) => SortedDate::from_naive(utc.date_naive()),
        None if modified < UNIX_EPOCH => Err(DateParseError::OutOfRange { year: MIN_YEAR - 1 }),
        None => Err(DateParseError::OutOfRange { year: MAX_YEAR + 1 }),
    }
}

/// Derives a [`SortedDate`] for each file according to the configured source.
#[derive(Debug, Clone, Copy)]
pub struct DateExtractor {
    source: DateSource,
}

impl DateExtractor {
    pub fn new(source: DateSource) -> Self {
        Self { source }
    }

    pub fn source(&self) -> DateSource {
        self.source
    }

    /// Extracts the date for `record`.
    ///
    /// # Errors
    ///
    /// `DateParseError::NoDateInName` in filename mode when the name holds no
    /// scanner timestamp; `DateParseError::OutOfRange` in mtime mode for
    /// timestamps before 1970 or after 9999.
    pub fn extract(&self, record: &FileRecord) -> Result<SortedDate, DateParseError> {
        match self.source {
            DateSource::Filename => {
                let name = record.file_name();
                date_from_filename(&name)
                    .ok_or_else(|| DateParseError::NoDateInName { name: name.into_owned() })
            }
            DateSource::Mtime => date_from_mtime(record.modified),
        }
    }
}
