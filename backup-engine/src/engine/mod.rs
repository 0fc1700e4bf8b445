//! Backup engine: create, list and restore versioned backups.
//!
//! Calls are synchronous and blocking; the dispatch layer runs each one on
//! the blocking pool with its own [`Operation`]. Progress milestones:
//! 10 after validation, 30 before the primary copy, 70-80 after it,
//! 90 after the descriptor, 100 on completion.

pub mod catalog;
pub mod emergency;
pub mod retention;

use crate::config::Config;
use crate::fs::copy::{copy_file, copy_tree, replace_file};
use crate::fs::filter::GlobFilter;
use crate::fs::walker::count_files;
use crate::ops::tracker::Operation;
use crate::store::metadata::{
    find_file_backups, find_folder_backups, load_descriptors, sort_newest_first,
    write_descriptor, BackupDescriptor, EntryKind,
};
use crate::store::paths::{
    current_timestamp, is_valid_timestamp, metadata_path_for, next_timestamp, normalize_path,
    original_name, relative_to_cwd, PathMapper,
};
use crate::{EngineError, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use catalog::{CatalogEntry, CatalogListing};

/// Attempts at finding a free timestamp before giving up
const MAX_TIMESTAMP_BUMPS: usize = 1000;

/// Result of a create call
#[derive(Debug, Clone, Serialize)]
pub struct BackupCreated {
    pub backup: BackupDescriptor,
    pub versions_kept: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_copied: Option<usize>,
}

/// Result of a list call, newest first
#[derive(Debug, Clone, Serialize)]
pub struct BackupList {
    pub original_path: String,
    pub count: usize,
    pub backups: Vec<BackupDescriptor>,
}

/// Result of a restore call
#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    pub restored_path: String,
    pub timestamp: String,
    pub emergency_backup_path: Option<String>,
    pub files_restored: usize,
}

/// Issues strictly increasing timestamps within one process
#[derive(Debug, Default)]
pub(crate) struct TimestampClock {
    last: Mutex<Option<String>>,
}

impl TimestampClock {
    pub(crate) fn issue(&self) -> String {
        let now = current_timestamp();
        let Ok(mut last) = self.last.lock() else {
            return now;
        };
        let next = match last.as_deref() {
            Some(prev) if now.as_str() <= prev => next_timestamp(prev).unwrap_or(now),
            _ => now,
        };
        *last = Some(next.clone());
        next
    }
}

pub struct BackupEngine {
    config: Arc<Config>,
    main: PathMapper,
    emergency: PathMapper,
    clock: TimestampClock,
}

impl BackupEngine {
    /// Build an engine; store roots are resolved to absolute paths once
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let main = PathMapper::new(normalize_path(&config.store.main_root)?);
        let emergency = PathMapper::new(normalize_path(&config.store.emergency_root)?);
        Ok(Self {
            config: Arc::new(config),
            main,
            emergency,
            clock: TimestampClock::default(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn main_root(&self) -> &Path {
        self.main.root()
    }

    pub fn emergency_root(&self) -> &Path {
        self.emergency.root()
    }

    pub fn max_versions(&self) -> usize {
        self.config.retention.max_versions
    }

    pub fn create_file_backup(
        &self,
        op: &Operation,
        path: &Path,
        context: Option<&str>,
    ) -> Result<BackupCreated> {
        let original = normalize_path(path)?;
        let metadata = stat_source(&original)?;
        if metadata.is_dir() {
            return Err(EngineError::validation(format!(
                "{} is a directory; use create-folder-backup",
                original.display()
            )));
        }
        op.set_progress(10);
        op.checkpoint()?;

        let (entry_path, timestamp) = allocate_entry(&self.main, &self.clock, &original, false)?;
        op.set_progress(30);

        if let Err(e) = copy_file(&original, &entry_path, op.cancellation_token()) {
            prune_empty_dirs(entry_path.parent(), self.main.root());
            return Err(e);
        }
        op.set_progress(70);

        let descriptor = build_descriptor(&original, &entry_path, &timestamp, EntryKind::File, context)?;
        self.commit_entry(&entry_path, &descriptor)?;
        op.set_progress(90);

        let versions_kept = retention::enforce_retention(
            self.main.root(),
            &descriptor.original_path,
            EntryKind::File,
            self.max_versions(),
        )?;

        info!(
            operation_id = %op.id(),
            original = %descriptor.original_path,
            timestamp = %timestamp,
            "Created file backup"
        );

        Ok(BackupCreated {
            backup: descriptor,
            versions_kept,
            files_copied: None,
        })
    }

    pub fn create_folder_backup(
        &self,
        op: &Operation,
        path: &Path,
        include_pattern: Option<&str>,
        exclude_pattern: Option<&str>,
        context: Option<&str>,
    ) -> Result<BackupCreated> {
        let original = normalize_path(path)?;
        let metadata = stat_source(&original)?;
        if !metadata.is_dir() {
            return Err(EngineError::validation(format!(
                "{} is not a directory; use create-file-backup",
                original.display()
            )));
        }
        if self.main.root().starts_with(&original) || self.emergency.root().starts_with(&original) {
            return Err(EngineError::validation(format!(
                "{} contains a backup store",
                original.display()
            )));
        }
        let filter = GlobFilter::new(include_pattern, exclude_pattern)?;
        op.set_progress(10);
        op.checkpoint()?;

        let total_files = count_files(&original).max(1);
        let (entry_path, timestamp) = allocate_entry(&self.main, &self.clock, &original, false)?;
        op.set_progress(30);

        let copied = copy_tree(
            &original,
            &entry_path,
            &filter,
            op.cancellation_token(),
            |stats| {
                let done = stats.files_copied + stats.files_skipped;
                op.set_progress(30 + ((done.min(total_files) * 50) / total_files) as u8);
            },
        );
        let stats = match copied {
            Ok(stats) => stats,
            Err(e) => {
                discard_entry(&entry_path, self.main.root());
                return Err(e);
            }
        };
        op.set_progress(80);

        let mut descriptor =
            build_descriptor(&original, &entry_path, &timestamp, EntryKind::Folder, context)?;
        descriptor.include_pattern = include_pattern.map(str::to_string);
        descriptor.exclude_pattern = exclude_pattern.map(str::to_string);
        self.commit_entry(&entry_path, &descriptor)?;
        op.set_progress(90);

        let versions_kept = retention::enforce_retention(
            self.main.root(),
            &descriptor.original_path,
            EntryKind::Folder,
            self.max_versions(),
        )?;

        info!(
            operation_id = %op.id(),
            original = %descriptor.original_path,
            timestamp = %timestamp,
            files = stats.files_copied,
            skipped = stats.files_skipped,
            bytes = stats.bytes_copied,
            "Created folder backup"
        );

        Ok(BackupCreated {
            backup: descriptor,
            versions_kept,
            files_copied: Some(stats.files_copied),
        })
    }

    pub fn list_file_backups(&self, op: &Operation, path: &Path) -> Result<BackupList> {
        let original = normalize_path(path)?.to_string_lossy().into_owned();
        op.set_progress(10);
        let mut backups = find_file_backups(self.main.root(), &original, op.cancellation_token())?;
        sort_newest_first(&mut backups);
        Ok(BackupList {
            original_path: original,
            count: backups.len(),
            backups,
        })
    }

    pub fn list_folder_backups(&self, op: &Operation, path: &Path) -> Result<BackupList> {
        let original = normalize_path(path)?.to_string_lossy().into_owned();
        op.set_progress(10);
        let mut backups =
            find_folder_backups(self.main.root(), &original, op.cancellation_token())?;
        sort_newest_first(&mut backups);
        Ok(BackupList {
            original_path: original,
            count: backups.len(),
            backups,
        })
    }

    pub fn restore_file_backup(
        &self,
        op: &Operation,
        path: &Path,
        timestamp: &str,
        make_emergency: bool,
    ) -> Result<RestoreOutcome> {
        let (original, entry) = self.prepare_restore(op, path, timestamp, EntryKind::File)?;
        if !entry.backup_path().is_file() {
            return Err(EngineError::not_found(format!(
                "Backup payload missing: {}",
                entry.backup_path
            )));
        }
        ensure_parent_exists(&original)?;
        op.checkpoint()?;
        op.set_progress(20);

        let emergency_backup_path = self.guard_restore(op, &original, EntryKind::File, make_emergency);
        op.set_progress(50);
        op.checkpoint()?;

        replace_file(entry.backup_path(), &original, op.cancellation_token())?;

        info!(
            operation_id = %op.id(),
            original = %entry.original_path,
            timestamp = %entry.timestamp,
            "Restored file backup"
        );

        Ok(RestoreOutcome {
            restored_path: original.to_string_lossy().into_owned(),
            timestamp: entry.timestamp,
            emergency_backup_path,
            files_restored: 1,
        })
    }

    pub fn restore_folder_backup(
        &self,
        op: &Operation,
        path: &Path,
        timestamp: &str,
        make_emergency: bool,
    ) -> Result<RestoreOutcome> {
        let (original, entry) = self.prepare_restore(op, path, timestamp, EntryKind::Folder)?;
        if !entry.backup_path().is_dir() {
            return Err(EngineError::not_found(format!(
                "Backup payload missing: {}",
                entry.backup_path
            )));
        }
        ensure_parent_exists(&original)?;
        op.checkpoint()?;
        op.set_progress(20);

        let emergency_backup_path =
            self.guard_restore(op, &original, EntryKind::Folder, make_emergency);
        op.set_progress(50);
        op.checkpoint()?;

        let stats = copy_tree(
            entry.backup_path(),
            &original,
            &GlobFilter::allow_all(),
            op.cancellation_token(),
            |_| {},
        )?;

        info!(
            operation_id = %op.id(),
            original = %entry.original_path,
            timestamp = %entry.timestamp,
            files = stats.files_copied,
            bytes = stats.bytes_copied,
            "Restored folder backup"
        );

        Ok(RestoreOutcome {
            restored_path: original.to_string_lossy().into_owned(),
            timestamp: entry.timestamp,
            emergency_backup_path,
            files_restored: stats.files_copied,
        })
    }

    pub fn list_all_backups(
        &self,
        op: &Operation,
        include_pattern: Option<&str>,
        exclude_pattern: Option<&str>,
        include_emergency: bool,
    ) -> Result<CatalogListing> {
        let filter = GlobFilter::new(include_pattern, exclude_pattern)?;
        op.set_progress(10);

        let main = catalog::scan_store(self.main.root(), &filter, op.cancellation_token())?;
        op.set_progress(50);

        let emergency = if include_emergency {
            catalog::scan_store(self.emergency.root(), &filter, op.cancellation_token())?
        } else {
            Vec::new()
        };
        op.set_progress(90);

        Ok(CatalogListing { main, emergency })
    }

    /// Validate restore arguments and locate the requested entry
    fn prepare_restore(
        &self,
        op: &Operation,
        path: &Path,
        timestamp: &str,
        kind: EntryKind,
    ) -> Result<(PathBuf, BackupDescriptor)> {
        if !is_valid_timestamp(timestamp) {
            return Err(EngineError::validation(format!(
                "Invalid timestamp {timestamp:?}; expected YYYYMMDD-HHMMSS-mmm"
            )));
        }
        let original = normalize_path(path)?;
        op.set_progress(10);

        let entry = self
            .locate_entry(&original, timestamp, kind, op.cancellation_token())?
            .ok_or_else(|| {
                EngineError::not_found(format!(
                    "No backup of {} at {}",
                    original.display(),
                    timestamp
                ))
            })?;
        Ok((original, entry))
    }

    /// Exact `(original_path, timestamp)` match: main store first, then emergency
    fn locate_entry(
        &self,
        original: &Path,
        timestamp: &str,
        kind: EntryKind,
        cancel: &CancellationToken,
    ) -> Result<Option<BackupDescriptor>> {
        let original = original.to_string_lossy();
        for root in [self.main.root(), self.emergency.root()] {
            let mut found = load_descriptors(root, cancel, |d| {
                d.kind == kind && d.timestamp == timestamp && d.original_path == original
            })?;
            if let Some(entry) = found.pop() {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Take the emergency snapshot if requested; never fails the restore
    fn guard_restore(
        &self,
        op: &Operation,
        original: &Path,
        kind: EntryKind,
        make_emergency: bool,
    ) -> Option<String> {
        if !make_emergency {
            return None;
        }
        match emergency::snapshot(
            &self.emergency,
            &self.clock,
            original,
            kind,
            op.cancellation_token(),
        ) {
            Ok(Some(path)) => {
                info!(operation_id = %op.id(), emergency = %path.display(), "Created emergency backup");
                Some(path.to_string_lossy().into_owned())
            }
            Ok(None) => {
                info!(
                    operation_id = %op.id(),
                    original = %original.display(),
                    "Nothing on disk to snapshot; no emergency backup created"
                );
                None
            }
            Err(e) => {
                warn!(
                    operation_id = %op.id(),
                    original = %original.display(),
                    "Emergency backup failed, continuing restore: {}", e
                );
                None
            }
        }
    }

    /// Write the descriptor; on failure the payload is removed too
    fn commit_entry(&self, entry_path: &Path, descriptor: &BackupDescriptor) -> Result<()> {
        if let Err(e) = write_descriptor(&metadata_path_for(entry_path), descriptor) {
            discard_entry(entry_path, self.main.root());
            return Err(e);
        }
        Ok(())
    }
}

fn stat_source(original: &Path) -> Result<fs::Metadata> {
    fs::metadata(original).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            EngineError::not_found(format!("Source not found: {}", original.display()))
        }
        _ => EngineError::io(format!("reading {}", original.display()), e),
    })
}

fn ensure_parent_exists(original: &Path) -> Result<()> {
    match original.parent() {
        Some(parent) if parent.is_dir() => Ok(()),
        _ => Err(EngineError::not_found(format!(
            "Restore target directory does not exist: {}",
            original.display()
        ))),
    }
}

/// Create the mirror directory and pick a timestamp whose entry path is free.
/// A taken timestamp is skipped; the clock advances one millisecond per try.
pub(crate) fn allocate_entry(
    mapper: &PathMapper,
    clock: &TimestampClock,
    original: &Path,
    emergency: bool,
) -> Result<(PathBuf, String)> {
    let dir = mapper.backup_dir_for(original);
    fs::create_dir_all(&dir)
        .map_err(|e| EngineError::io(format!("creating backup directory {}", dir.display()), e))?;

    for _ in 0..MAX_TIMESTAMP_BUMPS {
        let timestamp = clock.issue();
        let entry = mapper.entry_path_for(original, &timestamp, emergency)?;
        if !entry.exists() && !metadata_path_for(&entry).exists() {
            return Ok((entry, timestamp));
        }
    }
    Err(EngineError::validation(format!(
        "Could not allocate a backup timestamp for {}",
        original.display()
    )))
}

pub(crate) fn build_descriptor(
    original: &Path,
    entry_path: &Path,
    timestamp: &str,
    kind: EntryKind,
    context: Option<&str>,
) -> Result<BackupDescriptor> {
    let name = original_name(original)?;
    let (original_filename, original_foldername) = match kind {
        EntryKind::File => (Some(name), None),
        EntryKind::Folder => (None, Some(name)),
    };
    Ok(BackupDescriptor {
        kind,
        original_path: original.to_string_lossy().into_owned(),
        original_filename,
        original_foldername,
        timestamp: timestamp.to_string(),
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        backup_path: entry_path.to_string_lossy().into_owned(),
        relative_path: relative_to_cwd(original).to_string_lossy().into_owned(),
        agent_context: context.map(str::to_string),
        include_pattern: None,
        exclude_pattern: None,
        emergency: false,
    })
}

/// Remove a partially written entry and any mirror directories it leaves empty
pub(crate) fn discard_entry(entry_path: &Path, store_root: &Path) {
    let removed = if entry_path.is_dir() {
        fs::remove_dir_all(entry_path)
    } else {
        fs::remove_file(entry_path)
    };
    if let Err(e) = removed {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove incomplete backup {}: {}", entry_path.display(), e);
        }
    }
    let _ = fs::remove_file(metadata_path_for(entry_path));
    prune_empty_dirs(entry_path.parent(), store_root);
}

/// Remove empty directories from `start` upwards, stopping at `store_root`
pub(crate) fn prune_empty_dirs(start: Option<&Path>, store_root: &Path) {
    let mut current = start;
    while let Some(dir) = current {
        if dir == store_root || !dir.starts_with(store_root) {
            break;
        }
        if fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}
