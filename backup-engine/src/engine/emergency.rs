//! Emergency snapshots taken immediately before a restore overwrites data.

use super::{allocate_entry, build_descriptor, discard_entry, TimestampClock};
use crate::fs::copy::{copy_file, copy_tree};
use crate::fs::filter::GlobFilter;
use crate::store::metadata::{write_descriptor, EntryKind};
use crate::store::paths::{metadata_path_for, PathMapper};
use crate::Result;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

pub const EMERGENCY_CONTEXT: &str = "Emergency backup created automatically before restore";

/// Copy the current state of `original` into the emergency store.
///
/// Returns `Ok(None)` when there is nothing on disk to preserve. Emergency
/// entries are never subject to retention.
pub(crate) fn snapshot(
    store: &PathMapper,
    clock: &TimestampClock,
    original: &Path,
    kind: EntryKind,
    cancel: &CancellationToken,
) -> Result<Option<PathBuf>> {
    let present = match kind {
        EntryKind::File => original.is_file(),
        EntryKind::Folder => original.is_dir(),
    };
    if !present {
        return Ok(None);
    }

    let (entry_path, timestamp) = allocate_entry(store, clock, original, true)?;
    let copied = match kind {
        EntryKind::File => copy_file(original, &entry_path, cancel).map(|_| ()),
        EntryKind::Folder => {
            copy_tree(original, &entry_path, &GlobFilter::allow_all(), cancel, |_| {}).map(|_| ())
        }
    };
    if let Err(e) = copied {
        discard_entry(&entry_path, store.root());
        return Err(e);
    }

    let mut descriptor =
        build_descriptor(original, &entry_path, &timestamp, kind, Some(EMERGENCY_CONTEXT))?;
    descriptor.emergency = true;
    if let Err(e) = write_descriptor(&metadata_path_for(&entry_path), &descriptor) {
        discard_entry(&entry_path, store.root());
        return Err(e);
    }

    Ok(Some(entry_path))
}
