//! End-to-end tests for the flag write protocol
//!
//! Each test drives a real [`FlagFileWriter`] over a temp directory tree
//! and asserts on the resulting filesystem state: where the tracked files
//! ended up, what the flag file says, and what a failed batch leaves
//! behind.

use flagmill_core::config::{FlagDataTypeConfig, FlagMakerConfig, FlagOrder, Layout};
use flagmill_core::entry::{TrackedDir, TrackedEntry};
use flagmill_core::error::FlagError;
use flagmill_core::writer::FlagFileWriter;
use std::fs;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;
use tempfile::TempDir;

struct TestEnv {
    _temp: TempDir,
    config: FlagMakerConfig,
    layout: Layout,
}

impl TestEnv {
    fn new() -> Self {
        let temp = TempDir::new().expect("failed to create temp dir");
        let config = FlagMakerConfig {
            data_dir: temp.path().to_path_buf(),
            flag_dir: temp.path().join("flags"),
            pool: "alpha".into(),
            home: "/opt/ingest".into(),
            separator: "/".into(),
            poll_interval_secs: 1,
            worker_threads: 2,
            control_addr: "127.0.0.1:0".into(),
            dir_cache_capacity: 16,
            dir_cache_ttl_secs: 60,
            stamp_mtime: true,
            block_size: 4,
            data_types: vec![data_type()],
        };
        let layout = config.layout();
        Self {
            _temp: temp,
            config,
            layout,
        }
    }

    fn writer(&self) -> FlagFileWriter {
        FlagFileWriter::new(self.config.clone())
    }

    fn write_file(&self, role: TrackedDir, name: &str, body: &[u8]) -> PathBuf {
        let path = self.layout.path_for(role, "events", name);
        fs::create_dir_all(path.parent().unwrap()).expect("failed to create parent");
        fs::write(&path, body).expect("failed to write file");
        path
    }

    /// Entry for an already-written origin file.
    fn entry(&self, name: &str, discovered_at_ms: i64) -> TrackedEntry {
        let path = self.layout.path_for(TrackedDir::Origin, "events", name);
        let size = fs::metadata(&path).expect("origin file missing").len();
        TrackedEntry::new(
            "events",
            name.to_string(),
            size,
            self.config.block_size,
            discovered_at_ms,
        )
    }

    fn flag_files(&self) -> Vec<String> {
        let Ok(read) = fs::read_dir(&self.config.flag_dir) else {
            return Vec::new();
        };
        read.flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".flag"))
            .collect()
    }

    fn generating_files(&self) -> Vec<String> {
        let Ok(read) = fs::read_dir(&self.config.flag_dir) else {
            return Vec::new();
        };
        read.flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".generating"))
            .collect()
    }
}

fn data_type() -> FlagDataTypeConfig {
    FlagDataTypeConfig {
        name: "events".into(),
        folders: vec!["events".into()],
        script: "load_events.sh".into(),
        reducers: "-r 4".into(),
        input_format: "SequenceFile".into(),
        file_list_marker: None,
        extra_args: None,
        max_flag_size_bytes: 64 * 1024,
        max_counters: None,
        timeout_secs: 600,
        max_backlog: None,
        batch_max_files: 10,
        order: FlagOrder::Fifo,
    }
}

// ============================================================================
// Happy path
// ============================================================================

#[test]
fn test_fifo_batch_is_flagged_in_discovery_order() {
    let env = TestEnv::new();
    env.write_file(TrackedDir::Origin, "newer", b"newer data");
    env.write_file(TrackedDir::Origin, "older", b"old");
    // Batch arrives unsorted; discovery time decides content order
    let batch = vec![env.entry("newer", 200_000), env.entry("older", 100_000)];

    let writer = env.writer();
    let written = writer
        .write_flag(&data_type(), batch)
        .expect("write should succeed");
    writer.shutdown();

    let flag_path = written.flag_path.expect("a flag should be emitted");
    let flag_name = flag_path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(flag_name.ends_with("_alpha_events_events+2.flag"), "{flag_name}");
    assert_eq!(env.generating_files().len(), 0);

    // Content lists the older file first
    let body = fs::read_to_string(&flag_path).unwrap();
    let older_uri = env
        .layout
        .path_for(TrackedDir::Completed, "events", "older")
        .display()
        .to_string();
    let newer_uri = env
        .layout
        .path_for(TrackedDir::Completed, "events", "newer")
        .display()
        .to_string();
    assert_eq!(
        body,
        format!("/opt/ingest/load_events.sh {older_uri}, {newer_uri} -r 4 -inputFormat SequenceFile\n")
    );

    // Files advanced origin -> completed, staging left empty
    assert!(!env.layout.path_for(TrackedDir::Origin, "events", "older").exists());
    assert!(!env.layout.path_for(TrackedDir::Origin, "events", "newer").exists());
    assert_eq!(fs::read(env.layout.path_for(TrackedDir::Completed, "events", "newer")).unwrap(), b"newer data");
    assert_eq!(fs::read(env.layout.path_for(TrackedDir::Completed, "events", "older")).unwrap(), b"old");
    assert!(written.entries.iter().all(|e| e.current() == TrackedDir::Completed));

    // Stamped with the newest discovery time
    let mtime = fs::metadata(&flag_path)
        .unwrap()
        .modified()
        .unwrap()
        .duration_since(UNIX_EPOCH)
        .unwrap();
    assert_eq!(mtime.as_secs(), 200);
}

// ============================================================================
// Rollback
// ============================================================================

#[test]
fn test_promote_conflict_rolls_batch_back_to_origin() {
    let env = TestEnv::new();
    env.write_file(TrackedDir::Origin, "file1", b"fresh data");
    env.write_file(TrackedDir::Origin, "file2", b"second file");
    // A stale completed copy with different content forces disambiguation
    // at staging time, and a squatter on the disambiguated name makes the
    // promote phase fail
    env.write_file(TrackedDir::Completed, "file1", b"stale");
    env.write_file(TrackedDir::Completed, "file1.100000", b"squatter");

    let batch = vec![env.entry("file1", 100_000), env.entry("file2", 100_000)];
    let writer = env.writer();
    let err = writer
        .write_flag(&data_type(), batch)
        .expect_err("promote should fail");
    writer.shutdown();
    assert!(matches!(err, FlagError::BatchAborted { .. }), "{err}");

    // file1 was staged under its disambiguated name and comes home under it
    let restored = env
        .layout
        .path_for(TrackedDir::Origin, "events", "file1.100000");
    assert_eq!(fs::read(&restored).unwrap(), b"fresh data");

    // file2 made it to completed before the abort and was pulled back
    assert_eq!(
        fs::read(env.layout.path_for(TrackedDir::Origin, "events", "file2")).unwrap(),
        b"second file"
    );
    assert!(!env.layout.path_for(TrackedDir::Completed, "events", "file2").exists());

    // Staging is drained and no partial artifact survives
    assert!(!env.layout.path_for(TrackedDir::Staging, "events", "file1.100000").exists());
    assert_eq!(env.generating_files().len(), 0);
    assert_eq!(env.flag_files().len(), 0);

    // The squatter and the stale copy are untouched
    assert_eq!(
        fs::read(env.layout.path_for(TrackedDir::Completed, "events", "file1.100000")).unwrap(),
        b"squatter"
    );
    assert_eq!(
        fs::read(env.layout.path_for(TrackedDir::Completed, "events", "file1")).unwrap(),
        b"stale"
    );
}

#[test]
fn test_failed_stage_with_duplicates_rolls_back_cleanly() {
    let env = TestEnv::new();
    env.write_file(TrackedDir::Origin, "f1", b"hello");
    // A foreign staging file of a different size forces disambiguation,
    // and a squatter on the disambiguated name makes the stage fail
    env.write_file(TrackedDir::Staging, "f1", b"xxxx");
    env.write_file(TrackedDir::Staging, "f1.100000", b"squat");
    // A true duplicate in the same batch is discarded during the phase
    env.write_file(TrackedDir::Origin, "dup", b"same bytes");
    env.write_file(TrackedDir::Completed, "dup", b"same bytes");

    let batch = vec![env.entry("f1", 100_000), env.entry("dup", 100_000)];
    let writer = env.writer();
    let err = writer
        .write_flag(&data_type(), batch)
        .expect_err("stage should fail");
    writer.shutdown();
    assert!(matches!(err, FlagError::BatchAborted { .. }), "{err}");

    // f1 was renamed in place during disambiguation and stays home
    assert_eq!(
        fs::read(env.layout.path_for(TrackedDir::Origin, "events", "f1.100000")).unwrap(),
        b"hello"
    );
    assert!(!env.layout.path_for(TrackedDir::Origin, "events", "f1").exists());

    // Rollback leaves the foreign staging files alone
    assert_eq!(
        fs::read(env.layout.path_for(TrackedDir::Staging, "events", "f1")).unwrap(),
        b"xxxx"
    );
    assert_eq!(
        fs::read(env.layout.path_for(TrackedDir::Staging, "events", "f1.100000")).unwrap(),
        b"squat"
    );

    // The discarded duplicate is not resurrected anywhere
    assert!(!env.layout.path_for(TrackedDir::Origin, "events", "dup").exists());
    assert!(!env.layout.path_for(TrackedDir::Staging, "events", "dup").exists());
    assert_eq!(
        fs::read(env.layout.path_for(TrackedDir::Completed, "events", "dup")).unwrap(),
        b"same bytes"
    );

    assert_eq!(env.generating_files().len(), 0);
    assert_eq!(env.flag_files().len(), 0);
}

// ============================================================================
// Duplicates
// ============================================================================

#[test]
fn test_all_duplicate_batch_emits_no_flag() {
    let env = TestEnv::new();
    env.write_file(TrackedDir::Origin, "dup", b"same bytes");
    env.write_file(TrackedDir::Completed, "dup", b"same bytes");

    let batch = vec![env.entry("dup", 100_000)];
    let writer = env.writer();
    let written = writer
        .write_flag(&data_type(), batch)
        .expect("duplicates are not an error");
    writer.shutdown();

    assert!(written.flag_path.is_none());
    assert_eq!(written.discarded.len(), 1);
    assert!(written.entries.is_empty());
    assert_eq!(env.flag_files().len(), 0);

    // The origin copy is gone, the completed copy is authoritative
    assert!(!env.layout.path_for(TrackedDir::Origin, "events", "dup").exists());
    assert_eq!(
        fs::read(env.layout.path_for(TrackedDir::Completed, "events", "dup")).unwrap(),
        b"same bytes"
    );
}

#[test]
fn test_renamed_duplicate_survives_alongside_original() {
    let env = TestEnv::new();
    env.write_file(TrackedDir::Origin, "report", b"version two!");
    env.write_file(TrackedDir::Completed, "report", b"version one");

    let batch = vec![env.entry("report", 100_000)];
    let writer = env.writer();
    let written = writer
        .write_flag(&data_type(), batch)
        .expect("write should succeed");
    writer.shutdown();

    assert!(written.flag_path.is_some());
    assert_eq!(written.entries.len(), 1);
    assert_eq!(written.entries[0].file_name(), "report.100000");
    assert_eq!(
        fs::read(env.layout.path_for(TrackedDir::Completed, "events", "report.100000")).unwrap(),
        b"version two!"
    );
    assert_eq!(
        fs::read(env.layout.path_for(TrackedDir::Completed, "events", "report")).unwrap(),
        b"version one"
    );
}
