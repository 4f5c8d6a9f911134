/// Integration tests for scansort
///
/// These tests build small source trees on disk and run the complete
/// pipeline (walk, date, plan, transfer) through the public library API.
///
/// Test categories:
/// 1. Basic sorting workflows
/// 2. Name collisions and repeated runs
/// 3. Dry-run mode verification
/// 4. Move, read-only and mtime modes
/// 5. Configuration and filtering
/// 6. Edge cases and error scenarios
use scansort::config::{ConfigError, RunOptions, SortConfig};
use scansort::coordinator::{EXIT_FAILURES, EXIT_OK, RunCoordinator, RunSummary};
use scansort::date_extractor::DateSource;
use scansort::events::{EventSink, NullSink, RunEvent};
use scansort::transfer::TransferMode;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::TempDir;

// ============================================================================
// Test Utilities
// ============================================================================

/// A test fixture with a `src` tree and a `dst` root inside one temporary directory.
struct TestFixture {
    temp_dir: TempDir,
}

impl TestFixture {
    /// Create a new test fixture with an empty source directory.
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        fs::create_dir(temp_dir.path().join("src")).expect("Failed to create source");
        TestFixture { temp_dir }
    }

    fn src(&self) -> PathBuf {
        self.temp_dir.path().join("src")
    }

    fn dst(&self) -> PathBuf {
        self.temp_dir.path().join("dst")
    }

    /// Create a file under the source tree, creating parent folders as needed.
    fn create_file(&self, rel_path: &str, content: &[u8]) -> PathBuf {
        let file_path = self.src().join(rel_path);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).expect("Failed to create subdirectory");
        }
        let mut file = File::create(&file_path).expect("Failed to create file");
        file.write_all(content).expect("Failed to write file content");
        file_path
    }

    /// Create a file and set its modification time.
    fn create_file_modified(&self, rel_path: &str, content: &[u8], modified: SystemTime) {
        let file_path = self.create_file(rel_path, content);
        File::options()
            .write(true)
            .open(&file_path)
            .and_then(|file| file.set_modified(modified))
            .expect("Failed to set modification time");
    }

    fn options(&self) -> RunOptions {
        RunOptions::new(self.src(), self.dst())
    }

    /// Assert that a file exists under the destination root.
    fn assert_dst_file(&self, rel_path: &str, content: &[u8]) {
        let path = self.dst().join(rel_path);
        assert!(path.is_file(), "File should exist: {}", path.display());
        assert_eq!(
            fs::read(&path).expect("Failed to read file"),
            content,
            "Unexpected content in {}",
            path.display()
        );
    }

    /// List all files under the destination root recursively, relative to it.
    fn list_dst_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        Self::walk_dir(&self.dst(), &mut files);
        let mut files: Vec<PathBuf> = files
            .into_iter()
            .filter_map(|p| p.strip_prefix(self.dst()).ok().map(Path::to_path_buf))
            .collect();
        files.sort();
        files
    }

    fn walk_dir(dir: &Path, files: &mut Vec<PathBuf>) {
        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_file() {
                    files.push(path);
                } else if path.is_dir() {
                    Self::walk_dir(&path, files);
                }
            }
        }
    }
}

/// Keeps every event emitted during a run.
#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<RunEvent>>,
}

impl RecordingSink {
    /// Destinations of every successful transfer, sorted.
    fn destinations(&self) -> Vec<PathBuf> {
        let mut destinations: Vec<PathBuf> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                RunEvent::TransferSucceeded { destination, .. } => Some(destination.clone()),
                _ => None,
            })
            .collect();
        destinations.sort();
        destinations
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &RunEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

fn run(options: RunOptions) -> RunSummary {
    let config = options.validate().expect("configuration should be valid");
    RunCoordinator::new(config, &NullSink).run()
}

fn run_recorded(options: RunOptions) -> (RunSummary, RecordingSink) {
    let events = RecordingSink::default();
    let config = options.validate().expect("configuration should be valid");
    let summary = RunCoordinator::new(config, &events).run();
    (summary, events)
}

/// 2021-03-04 12:00:00 UTC.
fn march_4_2021() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1_614_859_200)
}

// ============================================================================
// Test Suite 1: Basic Sorting
// ============================================================================

#[test]
fn test_sort_empty_source() {
    let fixture = TestFixture::new();

    let summary = run(fixture.options());

    assert_eq!(summary.total_seen, 0);
    assert_eq!(summary.exit_code(true), EXIT_OK);
    assert!(fixture.dst().is_dir(), "Destination root should be created");
    assert!(fixture.list_dst_files().is_empty());
}

#[test]
fn test_dated_file_lands_in_day_folder() {
    let fixture = TestFixture::new();
    fixture.create_file("2024-06-01_14-30-00.wav", b"RIFF");

    let summary = run(fixture.options());

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.total_bytes, 4);
    fixture.assert_dst_file("2024/06/01/2024-06-01_14-30-00.wav", b"RIFF");
    assert!(
        fixture.src().join("2024-06-01_14-30-00.wav").exists(),
        "Copy mode must keep the source"
    );
}

#[test]
fn test_undated_file_fails_while_sibling_succeeds() {
    let fixture = TestFixture::new();
    fixture.create_file("2024-06-01_14-30-00.wav", b"a");
    fixture.create_file("voice001.wav", b"b");
    let mut options = fixture.options();
    options.skip_errors = true;

    let summary = run(options);

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures.len(), 1);
    assert!(summary.failures[0].path.ends_with("voice001.wav"));
    assert_eq!(summary.exit_code(true), EXIT_FAILURES);
    fixture.assert_dst_file("2024/06/01/2024-06-01_14-30-00.wav", b"a");
    assert_eq!(fixture.list_dst_files().len(), 1);
}

#[test]
fn test_nested_source_folders_are_walked() {
    let fixture = TestFixture::new();
    fixture.create_file("card1/day1/2023-12-31_23-59-59.wav", b"late");
    fixture.create_file("card2/2024-01-01_00-00-00.wav", b"early");

    let summary = run(fixture.options());

    assert_eq!(summary.succeeded, 2);
    fixture.assert_dst_file("2023/12/31/2023-12-31_23-59-59.wav", b"late");
    fixture.assert_dst_file("2024/01/01/2024-01-01_00-00-00.wav", b"early");
}

#[test]
fn test_many_files_with_several_workers() {
    let fixture = TestFixture::new();
    for i in 0..40 {
        let day = i % 28 + 1;
        fixture.create_file(
            &format!("batch{}/2024-02-{:02}_10-00-{:02}.wav", i % 3, day, i % 60),
            format!("clip {i}").as_bytes(),
        );
    }
    let mut options = fixture.options();
    options.workers = 4;

    let summary = run(options);

    assert_eq!(summary.succeeded, 40);
    assert_eq!(summary.failed, 0);
    assert_eq!(fixture.list_dst_files().len(), 40);
}

// ============================================================================
// Test Suite 2: Collisions and Repeated Runs
// ============================================================================

#[test]
fn test_same_name_in_two_folders_gets_suffix() {
    let fixture = TestFixture::new();
    fixture.create_file_modified("a/clip.wav", b"first", march_4_2021());
    fixture.create_file_modified("b/clip.wav", b"second", march_4_2021());
    let mut options = fixture.options();
    options.date_source = DateSource::Mtime;

    let summary = run(options);

    assert_eq!(summary.succeeded, 2);
    fixture.assert_dst_file("2021/03/04/clip.wav", b"first");
    fixture.assert_dst_file("2021/03/04/clip_1.wav", b"second");
}

#[test]
fn test_second_copy_run_never_overwrites() {
    let fixture = TestFixture::new();
    fixture.create_file("2024-06-01_14-30-00.wav", b"take one");

    run(fixture.options());
    fs::write(fixture.src().join("2024-06-01_14-30-00.wav"), b"take two").unwrap();
    let summary = run(fixture.options());

    assert_eq!(summary.succeeded, 1);
    fixture.assert_dst_file("2024/06/01/2024-06-01_14-30-00.wav", b"take one");
    fixture.assert_dst_file("2024/06/01/2024-06-01_14-30-00_1.wav", b"take two");
}

#[test]
fn test_destinations_are_unique_under_concurrency() {
    let fixture = TestFixture::new();
    for folder in 0..12 {
        fixture.create_file_modified(
            &format!("folder{folder:02}/clip.wav"),
            format!("{folder}").as_bytes(),
            march_4_2021(),
        );
    }
    let mut options = fixture.options();
    options.date_source = DateSource::Mtime;
    options.workers = 4;

    let (summary, events) = run_recorded(options);

    let destinations = events.destinations();
    let unique: HashSet<_> = destinations.iter().collect();
    assert_eq!(summary.succeeded, 12);
    assert_eq!(unique.len(), 12);
    assert_eq!(fixture.list_dst_files().len(), 12);
    fixture.assert_dst_file("2021/03/04/clip.wav", b"0");
    fixture.assert_dst_file("2021/03/04/clip_11.wav", b"11");
}

// ============================================================================
// Test Suite 3: Dry-Run Mode
// ============================================================================

#[test]
fn test_dry_run_touches_nothing() {
    let fixture = TestFixture::new();
    fixture.create_file("2024-06-01_14-30-00.wav", b"a");
    let mut options = fixture.options();
    options.dry_run = true;
    options.mode = TransferMode::Move;

    let summary = run(options);

    assert!(summary.dry_run);
    assert_eq!(summary.succeeded, 1);
    assert!(!fixture.dst().exists(), "Dry run must not create the destination");
    assert!(fixture.src().join("2024-06-01_14-30-00.wav").exists());
}

#[test]
fn test_dry_run_plans_match_real_run() {
    let fixture = TestFixture::new();
    fixture.create_file("x/2024-06-01_14-30-00.wav", b"1");
    fixture.create_file("y/2024-06-01_14-30-00.wav", b"2");
    fixture.create_file("z/2024-06-02_08-00-00.wav", b"3");
    fixture.create_file("voice001.wav", b"4");

    let mut dry = fixture.options();
    dry.dry_run = true;
    dry.skip_errors = true;
    let (dry_summary, dry_events) = run_recorded(dry);

    let mut real = fixture.options();
    real.skip_errors = true;
    let (real_summary, real_events) = run_recorded(real);

    assert_eq!(dry_summary.succeeded, real_summary.succeeded);
    assert_eq!(dry_summary.failed, real_summary.failed);
    assert_eq!(dry_summary.total_bytes, real_summary.total_bytes);
    assert_eq!(dry_events.destinations(), real_events.destinations());
    assert_eq!(fixture.list_dst_files().len(), 3);
}

// ============================================================================
// Test Suite 4: Move, Read-Only and Mtime Modes
// ============================================================================

#[test]
fn test_move_removes_sources() {
    let fixture = TestFixture::new();
    fixture.create_file("2024-06-01_14-30-00.wav", b"a");
    fixture.create_file("sub/2024-06-02_14-30-00.wav", b"b");
    let mut options = fixture.options();
    options.mode = TransferMode::Move;

    let summary = run(options);

    assert_eq!(summary.succeeded, 2);
    assert!(!fixture.src().join("2024-06-01_14-30-00.wav").exists());
    assert!(!fixture.src().join("sub/2024-06-02_14-30-00.wav").exists());
    fixture.assert_dst_file("2024/06/01/2024-06-01_14-30-00.wav", b"a");
    fixture.assert_dst_file("2024/06/02/2024-06-02_14-30-00.wav", b"b");
}

#[test]
fn test_move_keeps_undated_source() {
    let fixture = TestFixture::new();
    fixture.create_file("voice001.wav", b"a");
    let mut options = fixture.options();
    options.mode = TransferMode::Move;
    options.skip_errors = true;

    let summary = run(options);

    assert_eq!(summary.failed, 1);
    assert!(fixture.src().join("voice001.wav").exists());
}

#[test]
fn test_readonly_marks_destination() {
    let fixture = TestFixture::new();
    fixture.create_file("2024-06-01_14-30-00.wav", b"a");
    let mut options = fixture.options();
    options.readonly = true;

    run(options);

    let dest = fixture.dst().join("2024/06/01/2024-06-01_14-30-00.wav");
    let permissions = fs::metadata(&dest).unwrap().permissions();
    assert!(permissions.readonly(), "Destination should be read-only");
    let source_permissions = fs::metadata(fixture.src().join("2024-06-01_14-30-00.wav"))
        .unwrap()
        .permissions();
    assert!(!source_permissions.readonly());
}

#[test]
fn test_mtime_mode_sorts_any_name() {
    let fixture = TestFixture::new();
    fixture.create_file_modified("voice001.wav", b"a", march_4_2021());

    let mut options = fixture.options();
    options.date_source = DateSource::Mtime;
    let summary = run(options);

    assert_eq!(summary.succeeded, 1);
    fixture.assert_dst_file("2021/03/04/voice001.wav", b"a");
    let copied = fs::metadata(fixture.dst().join("2021/03/04/voice001.wav"))
        .unwrap()
        .modified()
        .unwrap();
    assert_eq!(copied, march_4_2021(), "Copy should keep the source mtime");
}

#[test]
fn test_mtime_mode_ignores_name_date() {
    let fixture = TestFixture::new();
    fixture.create_file_modified("2024-06-01_14-30-00.wav", b"a", march_4_2021());

    let mut options = fixture.options();
    options.date_source = DateSource::Mtime;
    run(options);

    fixture.assert_dst_file("2021/03/04/2024-06-01_14-30-00.wav", b"a");
}

// ============================================================================
// Test Suite 5: Configuration and Filtering
// ============================================================================

#[test]
fn test_only_configured_extensions_are_sorted() {
    let fixture = TestFixture::new();
    fixture.create_file("2024-06-01_14-30-00.wav", b"a");
    fixture.create_file("2024-06-01_14-31-00.WAV", b"b");
    fixture.create_file("2024-06-01_14-32-00.mp3", b"c");

    let summary = run(fixture.options());

    assert_eq!(summary.total_seen, 2);
    assert_eq!(fixture.list_dst_files().len(), 2);
    fixture.assert_dst_file("2024/06/01/2024-06-01_14-31-00.WAV", b"b");
}

#[test]
fn test_extension_list_can_be_widened() {
    let fixture = TestFixture::new();
    fixture.create_file("2024-06-01_14-30-00.wav", b"a");
    fixture.create_file("2024-06-01_14-32-00.mp3", b"c");
    let mut options = fixture.options();
    options.extensions = vec!["wav".to_string(), "MP3".to_string()];

    let summary = run(options);

    assert_eq!(summary.succeeded, 2);
}

#[test]
fn test_hidden_sidecars_are_ignored() {
    let fixture = TestFixture::new();
    fixture.create_file("2024-06-01_14-30-00.wav", b"a");
    fixture.create_file("._2024-06-01_14-30-00.wav", b"apple double");

    let summary = run(fixture.options());

    assert_eq!(summary.total_seen, 1);
    assert_eq!(summary.failed, 0);
}

#[test]
fn test_hidden_volume_folders_are_ignored() {
    let fixture = TestFixture::new();
    fixture.create_file("2024-06-01_14-30-00.wav", b"a");
    fixture.create_file(".Trashes/501/2024-06-01_14-31-00.wav", b"deleted");

    let summary = run(fixture.options());

    assert_eq!(summary.total_seen, 1);
    assert_eq!(
        fixture.list_dst_files(),
        vec![PathBuf::from("2024/06/01/2024-06-01_14-30-00.wav")]
    );
}

#[test]
fn test_config_file_filters_apply() {
    let fixture = TestFixture::new();
    fixture.create_file("keep/2024-06-01_14-30-00.wav", b"a");
    fixture.create_file("trash/2024-06-01_14-31-00.wav", b"b");
    let config = SortConfig::parse(
        r#"
        [defaults]
        workers = 2

        [filters.exclude]
        patterns = ["trash/**"]
        "#,
    )
    .unwrap();

    let summary = run(RunOptions::from_config(fixture.src(), fixture.dst(), config));

    assert_eq!(summary.succeeded, 1);
    assert_eq!(
        fixture.list_dst_files(),
        vec![PathBuf::from("2024/06/01/2024-06-01_14-30-00.wav")]
    );
}

#[test]
fn test_config_file_on_disk_is_loaded() {
    let fixture = TestFixture::new();
    let config_path = fixture.temp_dir.path().join("scansort.toml");
    fs::write(&config_path, "[defaults]\ndate_source = \"mtime\"\nworkers = 3\n").unwrap();

    let config = SortConfig::load(Some(&config_path)).unwrap();

    assert_eq!(config.defaults.date_source, DateSource::Mtime);
    assert_eq!(config.defaults.workers, 3);
}

// ============================================================================
// Test Suite 6: Edge Cases and Errors
// ============================================================================

#[test]
fn test_nonexistent_source_is_config_error() {
    let fixture = TestFixture::new();
    let options = RunOptions::new(fixture.temp_dir.path().join("nope"), fixture.dst());

    assert!(matches!(
        options.validate(),
        Err(ConfigError::SourceNotFound(_))
    ));
    assert!(!fixture.dst().exists());
}

#[test]
fn test_fail_fast_reports_cancellation() {
    let fixture = TestFixture::new();
    fixture.create_file("000-voice.wav", b"x");
    for i in 0..20 {
        fixture.create_file(&format!("2024-06-01_14-30-{i:02}.wav"), b"x");
    }

    let summary = run(fixture.options());

    assert!(summary.cancelled);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.exit_code(false), EXIT_FAILURES);
}

/// Builds `a/`, `m/back -> src` and `z/` so a link-following walk hits a loop between two dated files.
#[cfg(unix)]
fn create_tree_with_loop(fixture: &TestFixture) {
    fixture.create_file("a/2024-06-01_14-30-00.wav", b"a");
    fs::create_dir(fixture.src().join("m")).unwrap();
    std::os::unix::fs::symlink(fixture.src(), fixture.src().join("m/back")).unwrap();
    fixture.create_file("z/2024-06-02_09-00-00.wav", b"z");
}

#[cfg(unix)]
#[test]
fn test_walk_loop_is_skipped_and_siblings_sorted() {
    let fixture = TestFixture::new();
    create_tree_with_loop(&fixture);
    let mut options = fixture.options();
    options.follow_links = true;
    options.skip_errors = true;

    let summary = run(options);

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 0);
    assert!(!summary.cancelled);
    fixture.assert_dst_file("2024/06/01/2024-06-01_14-30-00.wav", b"a");
    fixture.assert_dst_file("2024/06/02/2024-06-02_09-00-00.wav", b"z");
}

#[cfg(unix)]
#[test]
fn test_walk_loop_cancels_run_without_skip_errors() {
    let fixture = TestFixture::new();
    create_tree_with_loop(&fixture);
    let mut options = fixture.options();
    options.follow_links = true;

    let summary = run(options);

    assert!(summary.cancelled);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.exit_code(false), EXIT_FAILURES);
    assert!(
        !fixture.dst().join("2024/06/02").exists(),
        "Nothing after the loop should be sorted"
    );
}

#[test]
fn test_failures_can_leave_exit_status_clean() {
    let fixture = TestFixture::new();
    fixture.create_file("voice001.wav", b"x");
    let config = SortConfig::parse(
        "[defaults]\nskip_errors = true\nnonzero_exit_on_failure = false\n",
    )
    .unwrap();
    let options = RunOptions::from_config(fixture.src(), fixture.dst(), config);
    let nonzero = options.nonzero_exit_on_failure;

    let summary = run(options);

    assert_eq!(summary.failed, 1);
    assert!(!summary.cancelled);
    assert_eq!(summary.exit_code(nonzero), EXIT_OK);
}

#[test]
fn test_file_content_is_preserved() {
    let fixture = TestFixture::new();
    let content: Vec<u8> = (0..3_000_000u32).map(|i| (i % 251) as u8).collect();
    fixture.create_file("2024-06-01_14-30-00.wav", &content);

    run(fixture.options());

    fixture.assert_dst_file("2024/06/01/2024-06-01_14-30-00.wav", &content);
}

#[test]
fn test_no_temporary_files_left_behind() {
    let fixture = TestFixture::new();
    for i in 0..5 {
        fixture.create_file(&format!("2024-06-01_14-30-0{i}.wav"), b"x");
    }

    run(fixture.options());

    let leftovers: Vec<_> = fixture
        .list_dst_files()
        .into_iter()
        .filter(|p| p.to_string_lossy().ends_with(".part"))
        .collect();
    assert!(leftovers.is_empty(), "Leftover temp files: {leftovers:?}");
}
