//! scansort - Sort scanner recordings into a dated folder tree
//!
//! This library walks a directory tree of audio recordings, derives a
//! calendar date for each file from its name or modification time, and
//! copies or moves it to `<destination>/YYYY/MM/DD/<name>` using a bounded
//! pool of worker threads. Name collisions are resolved with numeric
//! suffixes, copies are atomic, and dry runs plan without touching disk.

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod date_extractor;
pub mod events;
pub mod logging;
pub mod output;
pub mod planner;
pub mod pool;
pub mod transfer;
pub mod walker;

pub use config::{CompiledFilters, ConfigError, RunConfig, RunOptions, SortConfig};
pub use coordinator::{RunCoordinator, RunPhase, RunSummary};
pub use date_extractor::{DateExtractor, DateParseError, DateSource, SortedDate};
pub use events::{EventSink, RunEvent};
pub use planner::DestinationPlanner;
pub use pool::{CancelToken, WorkerPool};
pub use transfer::{
    OperationKind, TransferError, TransferExecutor, TransferMode, TransferPlan, TransferResult,
    TransferStatus,
};
pub use walker::{FileRecord, WalkError, Walker};

pub use cli::{Cli, run_cli};
