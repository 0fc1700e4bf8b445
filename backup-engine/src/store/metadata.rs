//! Sidecar descriptors for backup entries.
//!
//! Each entry has exactly one `<entry>.meta.json` descriptor, and the
//! descriptor is the only source of truth for the entry's original path.
//! There is no index: lookups read every descriptor beneath a store root.

use crate::fs::walker::walk_store;
use crate::store::paths::METADATA_SUFFIX;
use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Whether an entry holds a single file or a directory tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Folder,
}

/// Descriptor persisted next to every backup entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupDescriptor {
    pub kind: EntryKind,

    /// Absolute, normalized original path (lookup key)
    pub original_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_foldername: Option<String>,

    /// Version identifier and sort key (`YYYYMMDD-HHMMSS-mmm`)
    pub timestamp: String,

    /// RFC 3339 creation time, informational
    pub created_at: String,

    /// Absolute path of the copied payload
    pub backup_path: String,

    /// Original path relative to the creating process's working directory
    pub relative_path: String,

    #[serde(default)]
    pub agent_context: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_pattern: Option<String>,

    #[serde(default)]
    pub emergency: bool,
}

impl BackupDescriptor {
    pub fn backup_path(&self) -> &Path {
        Path::new(&self.backup_path)
    }
}

/// Write a descriptor as pretty JSON, replacing any existing file.
/// The parent directory must already exist.
pub fn write_descriptor(metadata_path: &Path, descriptor: &BackupDescriptor) -> Result<()> {
    let json = serde_json::to_string_pretty(descriptor)?;
    fs::write(metadata_path, json).map_err(|e| {
        EngineError::io(format!("writing descriptor {}", metadata_path.display()), e)
    })
}

/// Read a descriptor; `None` when missing or malformed
pub fn read_descriptor(metadata_path: &Path) -> Option<BackupDescriptor> {
    let content = fs::read_to_string(metadata_path).ok()?;
    match serde_json::from_str(&content) {
        Ok(descriptor) => Some(descriptor),
        Err(e) => {
            debug!("Ignoring malformed descriptor {}: {}", metadata_path.display(), e);
            None
        }
    }
}

/// Only the `original_path` of a descriptor, tolerating foreign shapes
pub fn read_original_path(metadata_path: &Path) -> Option<String> {
    let content = fs::read_to_string(metadata_path).ok()?;
    let value: serde_json::Value = serde_json::from_str(&content).ok()?;
    value
        .get("original_path")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Every `*.meta.json` file beneath `store_root`
pub fn find_all_descriptors(store_root: &Path, cancel: &CancellationToken) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    walk_store(store_root, cancel, |entry| {
        if entry.is_file && entry.name.ends_with(METADATA_SUFFIX) {
            found.push(entry.path.clone());
        }
        Ok(true)
    })?;
    Ok(found)
}

/// Read every valid descriptor beneath `store_root` that `keep` accepts
pub fn load_descriptors<F>(
    store_root: &Path,
    cancel: &CancellationToken,
    keep: F,
) -> Result<Vec<BackupDescriptor>>
where
    F: Fn(&BackupDescriptor) -> bool,
{
    let descriptors = find_all_descriptors(store_root, cancel)?
        .iter()
        .filter_map(|path| read_descriptor(path))
        .filter(|descriptor| keep(descriptor))
        .collect();
    Ok(descriptors)
}

/// Main-store file entries whose original path equals `original`
pub fn find_file_backups(
    store_root: &Path,
    original: &str,
    cancel: &CancellationToken,
) -> Result<Vec<BackupDescriptor>> {
    load_descriptors(store_root, cancel, |d| {
        !d.emergency && d.kind == EntryKind::File && d.original_path == original
    })
}

/// Main-store folder entries at `original`, nested beneath it, or enclosing it
pub fn find_folder_backups(
    store_root: &Path,
    original: &str,
    cancel: &CancellationToken,
) -> Result<Vec<BackupDescriptor>> {
    let target = Path::new(original);
    load_descriptors(store_root, cancel, |d| {
        if d.emergency || d.kind != EntryKind::Folder {
            return false;
        }
        let candidate = Path::new(&d.original_path);
        candidate.starts_with(target) || target.starts_with(candidate)
    })
}

/// Sort newest first by timestamp
pub fn sort_newest_first(descriptors: &mut [BackupDescriptor]) {
    descriptors.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}
