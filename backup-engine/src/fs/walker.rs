//! Recursive traversal of store roots and source trees.

use crate::{EngineError, Result};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

/// An entry discovered while walking a store
#[derive(Debug, Clone)]
pub struct StoreEntry {
    /// Full path to the entry
    pub path: PathBuf,

    /// Final path component
    pub name: String,

    pub is_file: bool,

    pub is_dir: bool,
}

impl StoreEntry {
    fn from_entry(entry: &DirEntry) -> Self {
        let file_type = entry.file_type();
        Self {
            path: entry.path().to_path_buf(),
            name: entry.file_name().to_string_lossy().into_owned(),
            is_file: file_type.is_file(),
            is_dir: file_type.is_dir(),
        }
    }
}

/// Walk everything beneath `root` (excluding `root` itself).
///
/// The visitor returns whether to descend into a directory entry; the value
/// is ignored for files. Cancellation is checked before every entry and
/// aborts the whole walk with [`EngineError::Cancelled`]. Unreadable entries
/// are logged and skipped. A missing root yields nothing.
pub fn walk_store<F>(root: &Path, cancel: &CancellationToken, mut visit: F) -> Result<()>
where
    F: FnMut(&StoreEntry) -> Result<bool>,
{
    if !root.exists() {
        return Ok(());
    }

    let mut walker = WalkDir::new(root).min_depth(1).follow_links(false).into_iter();

    while let Some(next) = walker.next() {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let entry = match next {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable store entry under {}: {}", root.display(), e);
                continue;
            }
        };

        let store_entry = StoreEntry::from_entry(&entry);
        let descend = visit(&store_entry)?;
        if store_entry.is_dir && !descend {
            walker.skip_current_dir();
        }
    }

    Ok(())
}

/// Count regular files in a source tree (used to scale progress)
pub fn count_files(root: &Path) -> usize {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}
