//! Version retention for the main store.

use crate::store::metadata::{load_descriptors, BackupDescriptor, EntryKind};
use crate::store::paths::metadata_path_for;
use crate::Result;
use std::fs;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Keep at most `max_versions` entries of `kind` for `original_path`,
/// deleting the oldest payloads together with their descriptors.
///
/// Runs after a successful create and is not cancellable: the create has
/// already committed. Deletion failures are logged and skipped. Returns the
/// number of versions left.
pub fn enforce_retention(
    store_root: &Path,
    original_path: &str,
    kind: EntryKind,
    max_versions: usize,
) -> Result<usize> {
    let mut versions = load_descriptors(store_root, &CancellationToken::new(), |d| {
        d.kind == kind && !d.emergency && d.original_path == original_path
    })?;

    if versions.len() <= max_versions {
        return Ok(versions.len());
    }

    versions.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    let excess = versions.len() - max_versions;
    let mut remaining = versions.len();

    for old in versions.iter().take(excess) {
        if remove_version(old) {
            remaining -= 1;
            info!(
                original = %original_path,
                timestamp = %old.timestamp,
                "Deleted old backup version (max_versions: {})", max_versions
            );
        }
    }

    Ok(remaining)
}

fn remove_version(descriptor: &BackupDescriptor) -> bool {
    let payload = descriptor.backup_path();
    let removed = match descriptor.kind {
        EntryKind::Folder => fs::remove_dir_all(payload),
        EntryKind::File => fs::remove_file(payload),
    };
    match removed {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!("Failed to delete old backup {}: {}", payload.display(), e);
            return false;
        }
    }

    let metadata = metadata_path_for(payload);
    if let Err(e) = fs::remove_file(&metadata) {
        warn!("Failed to delete descriptor {}: {}", metadata.display(), e);
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::metadata::{find_file_backups, write_descriptor};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn seed(root: &Path, original: &str, timestamp: &str, kind: EntryKind) -> PathBuf {
        let payload = root.join(format!("entry.{timestamp}"));
        match kind {
            EntryKind::File => fs::write(&payload, timestamp).unwrap(),
            EntryKind::Folder => {
                fs::create_dir_all(payload.join("inner")).unwrap();
                fs::write(payload.join("inner/f.txt"), timestamp).unwrap();
            }
        }
        let descriptor = BackupDescriptor {
            kind,
            original_path: original.to_string(),
            original_filename: None,
            original_foldername: None,
            timestamp: timestamp.to_string(),
            created_at: "2024-01-01T00:00:00.000Z".to_string(),
            backup_path: payload.to_string_lossy().into_owned(),
            relative_path: original.to_string(),
            agent_context: None,
            include_pattern: None,
            exclude_pattern: None,
            emergency: false,
        };
        write_descriptor(&metadata_path_for(&payload), &descriptor).unwrap();
        payload
    }

    #[test]
    fn test_under_limit_keeps_everything() {
        let dir = TempDir::new().unwrap();
        seed(dir.path(), "/w/a.txt", "20240101-000000-001", EntryKind::File);
        seed(dir.path(), "/w/a.txt", "20240101-000000-002", EntryKind::File);

        let kept = enforce_retention(dir.path(), "/w/a.txt", EntryKind::File, 3).unwrap();
        assert_eq!(kept, 2);
    }

    #[test]
    fn test_oldest_versions_deleted_with_descriptors() {
        let dir = TempDir::new().unwrap();
        let oldest = seed(dir.path(), "/w/a.txt", "20240101-000000-001", EntryKind::File);
        seed(dir.path(), "/w/a.txt", "20240101-000000-002", EntryKind::File);
        seed(dir.path(), "/w/a.txt", "20240101-000000-003", EntryKind::File);
        seed(dir.path(), "/w/other.txt", "20240101-000000-000", EntryKind::File);

        let kept = enforce_retention(dir.path(), "/w/a.txt", EntryKind::File, 2).unwrap();
        assert_eq!(kept, 2);
        assert!(!oldest.exists());
        assert!(!metadata_path_for(&oldest).exists());

        let left = find_file_backups(dir.path(), "/w/a.txt", &CancellationToken::new()).unwrap();
        let mut stamps: Vec<_> = left.into_iter().map(|d| d.timestamp).collect();
        stamps.sort();
        assert_eq!(stamps, vec!["20240101-000000-002", "20240101-000000-003"]);

        let other = find_file_backups(dir.path(), "/w/other.txt", &CancellationToken::new()).unwrap();
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn test_folder_retention_removes_whole_tree() {
        let dir = TempDir::new().unwrap();
        let oldest = seed(dir.path(), "/w/proj", "20240101-000000-001", EntryKind::Folder);
        let newest = seed(dir.path(), "/w/proj", "20240101-000000-002", EntryKind::Folder);

        let kept = enforce_retention(dir.path(), "/w/proj", EntryKind::Folder, 1).unwrap();
        assert_eq!(kept, 1);
        assert!(!oldest.exists());
        assert!(newest.join("inner/f.txt").exists());
    }
}
