//! End-to-end behaviour of the engine against real temp directories.

use backup_engine::fs::walker::count_files;
use backup_engine::store::metadata::EntryKind;
use backup_engine::store::paths::{format_timestamp, metadata_path_for};
use backup_engine::{BackupEngine, Config, Operation};
use chrono::{TimeZone, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Workspace {
    _dir: TempDir,
    work: PathBuf,
    engine: BackupEngine,
}

fn workspace(max_versions: usize) -> Workspace {
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    fs::create_dir_all(&work).unwrap();
    let mut config = Config::with_roots(dir.path().join("main"), dir.path().join("emergency"));
    config.retention.max_versions = max_versions;
    let engine = BackupEngine::new(config).unwrap();
    Workspace {
        _dir: dir,
        work,
        engine,
    }
}

fn op(kind: &str) -> Operation {
    Operation::detached(kind)
}

fn files_under(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().strip_prefix(root).unwrap().to_path_buf())
        .collect();
    files.sort();
    files
}

#[test]
fn file_round_trip_restores_exact_bytes() {
    let ws = workspace(10);
    let cases: Vec<(&str, Vec<u8>)> = vec![
        ("empty.bin", Vec::new()),
        ("text.txt", b"line one\nline two\n".to_vec()),
        ("large.bin", (0..300_000u32).map(|i| (i * 7 % 256) as u8).collect()),
    ];

    for (name, content) in cases {
        let path = ws.work.join(name);
        fs::write(&path, &content).unwrap();
        let created = ws
            .engine
            .create_file_backup(&op("create-file-backup"), &path, None)
            .unwrap();

        fs::write(&path, b"changed afterwards").unwrap();
        ws.engine
            .restore_file_backup(&op("restore-file-backup"), &path, &created.backup.timestamp, false)
            .unwrap();

        assert_eq!(fs::read(&path).unwrap(), content, "round trip of {name}");
    }
}

#[test]
fn timestamps_sort_in_creation_order() {
    let instants = [
        Utc.with_ymd_and_hms(2024, 1, 9, 9, 59, 59).unwrap(),
        Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 9, 30, 23, 59, 59).unwrap(),
        Utc.with_ymd_and_hms(2024, 10, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
    ];
    let formatted: Vec<String> = instants.iter().map(format_timestamp).collect();
    let mut sorted = formatted.clone();
    sorted.sort();
    assert_eq!(formatted, sorted);
    assert!(formatted.iter().all(|t| t.len() == 19));
}

#[test]
fn retention_keeps_most_recent_versions() {
    let ws = workspace(3);
    let path = ws.work.join("report.txt");
    let mut timestamps = Vec::new();

    for version in 0..5 {
        fs::write(&path, format!("version {version}")).unwrap();
        let created = ws.engine.create_file_backup(&op("c"), &path, None).unwrap();
        assert_eq!(created.versions_kept, (version + 1).min(3));
        timestamps.push(created.backup.timestamp);
    }

    let listed = ws.engine.list_file_backups(&op("l"), &path).unwrap();
    assert_eq!(listed.count, 3);
    let kept: Vec<&str> = listed.backups.iter().map(|b| b.timestamp.as_str()).collect();
    let newest: Vec<&str> = timestamps.iter().rev().take(3).map(String::as_str).collect();
    assert_eq!(kept, newest);

    // Deleted versions leave no descriptors behind either
    let descriptors = files_under(ws.engine.main_root())
        .into_iter()
        .filter(|p| p.to_string_lossy().ends_with(".meta.json"))
        .count();
    assert_eq!(descriptors, 3);
}

#[test]
fn folder_retention_is_scoped_to_exact_path() {
    let ws = workspace(1);
    let outer = ws.work.join("proj");
    let inner = outer.join("sub");
    fs::create_dir_all(&inner).unwrap();
    fs::write(inner.join("a.txt"), b"a").unwrap();

    ws.engine.create_folder_backup(&op("c"), &inner, None, None, None).unwrap();
    ws.engine.create_folder_backup(&op("c"), &outer, None, None, None).unwrap();
    let again = ws.engine.create_folder_backup(&op("c"), &outer, None, None, None).unwrap();
    assert_eq!(again.versions_kept, 1);

    // The nested folder's backup survives the outer folder's retention
    let listing = ws.engine.list_folder_backups(&op("l"), &inner).unwrap();
    let originals: Vec<&str> = listing.backups.iter().map(|b| b.original_path.as_str()).collect();
    assert!(originals.contains(&inner.to_string_lossy().as_ref()));
}

#[test]
fn listing_is_idempotent() {
    let ws = workspace(10);
    let path = ws.work.join("a.txt");
    fs::write(&path, b"x").unwrap();
    for _ in 0..3 {
        ws.engine.create_file_backup(&op("c"), &path, None).unwrap();
    }

    let first = ws.engine.list_file_backups(&op("l"), &path).unwrap();
    let second = ws.engine.list_file_backups(&op("l"), &path).unwrap();
    assert_eq!(first.backups, second.backups);

    let all_first = ws.engine.list_all_backups(&op("l"), None, None, true).unwrap();
    let all_second = ws.engine.list_all_backups(&op("l"), None, None, true).unwrap();
    let paths = |listing: &backup_engine::engine::CatalogListing| {
        listing.main.iter().map(|e| e.path.clone()).collect::<Vec<_>>()
    };
    assert_eq!(paths(&all_first), paths(&all_second));
    assert_eq!(all_first.main.len(), 6);
}

#[test]
fn cancelled_folder_backup_leaves_no_residue() {
    let ws = workspace(10);
    let tree = ws.work.join("tree");
    fs::create_dir_all(tree.join("nested")).unwrap();
    fs::write(tree.join("one.txt"), b"1").unwrap();
    fs::write(tree.join("nested/two.txt"), b"2").unwrap();

    let operation = op("create-folder-backup");
    operation.cancellation_token().cancel();
    let err = ws
        .engine
        .create_folder_backup(&operation, &tree, None, None, None)
        .unwrap_err();

    assert_eq!(err.kind(), "CancelledError");
    assert_eq!(count_files(ws.engine.main_root()), 0);
    let listed = ws.engine.list_folder_backups(&op("l"), &tree).unwrap();
    assert_eq!(listed.count, 0);
}

#[test]
fn restore_takes_exactly_one_emergency_snapshot() {
    let ws = workspace(10);
    let path = ws.work.join("settings.json");
    fs::write(&path, b"{\"v\":1}").unwrap();
    let backup = ws.engine.create_file_backup(&op("c"), &path, None).unwrap();

    fs::write(&path, b"{\"v\":2}").unwrap();
    let outcome = ws
        .engine
        .restore_file_backup(&op("r"), &path, &backup.backup.timestamp, true)
        .unwrap();

    assert_eq!(fs::read(&path).unwrap(), b"{\"v\":1}");

    let snapshots: Vec<PathBuf> = files_under(ws.engine.emergency_root())
        .into_iter()
        .filter(|p| !p.to_string_lossy().ends_with(".meta.json"))
        .collect();
    assert_eq!(snapshots.len(), 1);

    let snapshot = PathBuf::from(outcome.emergency_backup_path.unwrap());
    assert!(snapshot.starts_with(ws.engine.emergency_root()));
    assert_eq!(fs::read(&snapshot).unwrap(), b"{\"v\":2}");
    assert!(metadata_path_for(&snapshot).is_file());

    // Emergency snapshots stay out of the main listing
    let listed = ws.engine.list_file_backups(&op("l"), &path).unwrap();
    assert_eq!(listed.count, 1);
}

#[test]
fn emergency_snapshot_can_itself_be_restored() {
    let ws = workspace(10);
    let path = ws.work.join("notes.md");
    fs::write(&path, b"old").unwrap();
    let backup = ws.engine.create_file_backup(&op("c"), &path, None).unwrap();
    fs::write(&path, b"unsaved work").unwrap();

    let outcome = ws
        .engine
        .restore_file_backup(&op("r"), &path, &backup.backup.timestamp, true)
        .unwrap();
    let snapshot = PathBuf::from(outcome.emergency_backup_path.unwrap());
    let name = snapshot.file_name().unwrap().to_string_lossy().into_owned();
    let snapshot_ts = &name[name.len() - 19..];

    ws.engine
        .restore_file_backup(&op("r"), &path, snapshot_ts, false)
        .unwrap();
    assert_eq!(fs::read(&path).unwrap(), b"unsaved work");
}

#[test]
fn restore_without_current_file_skips_snapshot() {
    let ws = workspace(10);
    let path = ws.work.join("deleted.txt");
    fs::write(&path, b"keep me").unwrap();
    let backup = ws.engine.create_file_backup(&op("c"), &path, None).unwrap();
    fs::remove_file(&path).unwrap();

    let outcome = ws
        .engine
        .restore_file_backup(&op("r"), &path, &backup.backup.timestamp, true)
        .unwrap();
    assert!(outcome.emergency_backup_path.is_none());
    assert_eq!(fs::read(&path).unwrap(), b"keep me");
}

#[test]
fn restore_survives_failed_emergency_snapshot() {
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    fs::create_dir_all(work.join("proj")).unwrap();
    // a regular file where the emergency store should be
    let emergency_root = dir.path().join("emergency");
    fs::write(&emergency_root, b"not a directory").unwrap();
    let config = Config::with_roots(dir.path().join("main"), emergency_root.clone());
    let engine = BackupEngine::new(config).unwrap();

    let path = work.join("a.txt");
    fs::write(&path, b"backed up").unwrap();
    let backup = engine.create_file_backup(&op("c"), &path, None).unwrap();
    fs::write(&path, b"edited").unwrap();

    let outcome = engine
        .restore_file_backup(&op("r"), &path, &backup.backup.timestamp, true)
        .unwrap();
    assert!(outcome.emergency_backup_path.is_none());
    assert_eq!(fs::read(&path).unwrap(), b"backed up");

    let tree = work.join("proj");
    fs::write(tree.join("lib.rs"), b"v1").unwrap();
    let backup = engine
        .create_folder_backup(&op("c"), &tree, None, None, None)
        .unwrap();
    fs::write(tree.join("lib.rs"), b"v2").unwrap();

    let outcome = engine
        .restore_folder_backup(&op("r"), &tree, &backup.backup.timestamp, true)
        .unwrap();
    assert!(outcome.emergency_backup_path.is_none());
    assert_eq!(fs::read(tree.join("lib.rs")).unwrap(), b"v1");
    assert_eq!(fs::read(&emergency_root).unwrap(), b"not a directory");
}

#[test]
fn missing_backup_restore_leaves_original_untouched() {
    let ws = workspace(10);
    let path = ws.work.join("a.txt");
    fs::write(&path, b"v1").unwrap();
    ws.engine.create_file_backup(&op("c"), &path, None).unwrap();
    fs::write(&path, b"current").unwrap();

    let err = ws
        .engine
        .restore_file_backup(&op("r"), &path, "19990101-000000-000", true)
        .unwrap_err();
    assert_eq!(err.kind(), "NotFoundError");
    assert_eq!(fs::read(&path).unwrap(), b"current");
    assert_eq!(count_files(ws.engine.emergency_root()), 0);
}

#[test]
fn folder_exclude_applies_at_every_depth() {
    let ws = workspace(10);
    let tree = ws.work.join("site");
    fs::create_dir_all(tree.join("assets/img")).unwrap();
    fs::create_dir_all(tree.join("empty")).unwrap();
    fs::write(tree.join("index.html"), b"<html>").unwrap();
    fs::write(tree.join("scratch.tmp"), b"x").unwrap();
    fs::write(tree.join("assets/site.css"), b"body{}").unwrap();
    fs::write(tree.join("assets/img/logo.png"), b"png").unwrap();
    fs::write(tree.join("assets/img/upload.tmp"), b"x").unwrap();

    let created = ws
        .engine
        .create_folder_backup(&op("c"), &tree, None, Some("*.tmp"), Some("before deploy"))
        .unwrap();
    assert_eq!(created.files_copied, Some(3));
    assert_eq!(created.backup.kind, EntryKind::Folder);
    assert_eq!(created.backup.exclude_pattern.as_deref(), Some("*.tmp"));

    let payload = PathBuf::from(&created.backup.backup_path);
    assert_eq!(
        files_under(&payload),
        vec![
            PathBuf::from("assets/img/logo.png"),
            PathBuf::from("assets/site.css"),
            PathBuf::from("index.html"),
        ]
    );
    assert!(payload.join("empty").is_dir());
}

#[test]
fn folder_round_trip_with_emergency_snapshot() {
    let ws = workspace(10);
    let tree = ws.work.join("proj");
    fs::create_dir_all(tree.join("src")).unwrap();
    fs::write(tree.join("src/lib.rs"), b"pub fn v1() {}").unwrap();
    let backup = ws.engine.create_folder_backup(&op("c"), &tree, None, None, None).unwrap();

    fs::write(tree.join("src/lib.rs"), b"pub fn v2() {}").unwrap();
    let outcome = ws
        .engine
        .restore_folder_backup(&op("r"), &tree, &backup.backup.timestamp, true)
        .unwrap();

    assert_eq!(fs::read(tree.join("src/lib.rs")).unwrap(), b"pub fn v1() {}");
    assert_eq!(outcome.files_restored, 1);
    let snapshot = PathBuf::from(outcome.emergency_backup_path.unwrap());
    assert_eq!(fs::read(snapshot.join("src/lib.rs")).unwrap(), b"pub fn v2() {}");
}

#[test]
fn list_all_reports_both_stores() {
    let ws = workspace(10);
    let path = ws.work.join("a.txt");
    fs::write(&path, b"1").unwrap();
    let backup = ws.engine.create_file_backup(&op("c"), &path, None).unwrap();
    fs::write(&path, b"2").unwrap();
    ws.engine
        .restore_file_backup(&op("r"), &path, &backup.backup.timestamp, true)
        .unwrap();

    let listing = ws.engine.list_all_backups(&op("l"), None, None, true).unwrap();
    assert_eq!(listing.main.len(), 2);
    assert_eq!(listing.emergency.len(), 2);
    let original = path.to_string_lossy().into_owned();
    assert!(listing
        .main
        .iter()
        .all(|e| e.original_path.as_deref() == Some(original.as_str())));

    let main_only = ws.engine.list_all_backups(&op("l"), None, None, false).unwrap();
    assert!(main_only.emergency.is_empty());

    let descriptors_only = ws
        .engine
        .list_all_backups(&op("l"), Some("*.meta.json"), None, true)
        .unwrap();
    assert_eq!(descriptors_only.total(), 2);
}
