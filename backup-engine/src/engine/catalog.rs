//! Store-wide listing of backup entries.

use crate::fs::filter::GlobFilter;
use crate::fs::walker::{walk_store, StoreEntry};
use crate::store::metadata::read_original_path;
use crate::store::paths::{is_backup_entry_name, metadata_path_for, METADATA_SUFFIX};
use crate::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub path: String,

    /// "file" or "directory"
    #[serde(rename = "type")]
    pub entry_type: &'static str,

    /// Byte length for files, 0 for directories
    pub size: u64,

    pub created_at: Option<String>,

    /// Resolved from the entry's descriptor; null when missing or unreadable
    pub original_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CatalogListing {
    pub main: Vec<CatalogEntry>,
    pub emergency: Vec<CatalogEntry>,
}

impl CatalogListing {
    pub fn total(&self) -> usize {
        self.main.len() + self.emergency.len()
    }
}

/// Every payload and descriptor under `store_root` whose full path passes
/// `filter`, in discovery order. A directory is an entry only when its
/// descriptor sits beside it; entry directories are reported once and not
/// descended into. Cancellation discards everything collected so far.
pub fn scan_store(
    store_root: &Path,
    filter: &GlobFilter,
    cancel: &CancellationToken,
) -> Result<Vec<CatalogEntry>> {
    let mut entries = Vec::new();
    walk_store(store_root, cancel, |entry| {
        if !is_backup_entry_name(&entry.name) {
            return Ok(true);
        }
        // mirror directory that only looks like an entry
        if entry.is_dir && !metadata_path_for(&entry.path).is_file() {
            return Ok(true);
        }
        if filter.accepts(&entry.path) {
            if let Some(item) = describe(entry) {
                entries.push(item);
            }
        }
        Ok(false)
    })?;
    Ok(entries)
}

fn describe(entry: &StoreEntry) -> Option<CatalogEntry> {
    let metadata = match fs::symlink_metadata(&entry.path) {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!("Skipping {}: {}", entry.path.display(), e);
            return None;
        }
    };

    let created_at = metadata
        .created()
        .or_else(|_| metadata.modified())
        .ok()
        .map(|time| DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Millis, true));

    let descriptor = if entry.name.ends_with(METADATA_SUFFIX) {
        entry.path.clone()
    } else {
        metadata_path_for(&entry.path)
    };

    Some(CatalogEntry {
        path: entry.path.to_string_lossy().into_owned(),
        entry_type: if metadata.is_dir() { "directory" } else { "file" },
        size: if metadata.is_dir() { 0 } else { metadata.len() },
        created_at,
        original_path: read_original_path(&descriptor),
    })
}
