//! File and tree copying with cooperative cancellation.
//!
//! Only regular files and directories are copied. The cancellation token is
//! polled after every chunk of a file and before every file of a tree.

use crate::fs::filter::GlobFilter;
use crate::{EngineError, Result};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Bytes copied between cancellation checks
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Running totals of a copy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files_copied: usize,
    pub files_skipped: usize,
    pub bytes_copied: u64,
}

/// Byte-for-byte copy of `src` to `dst`, truncating `dst`.
///
/// On cancellation the partial `dst` is removed. Fails if `src` is missing
/// or the parent of `dst` does not exist.
pub fn copy_file(src: &Path, dst: &Path, cancel: &CancellationToken) -> Result<u64> {
    let result = copy_chunks(src, dst, cancel);
    if result.is_err() {
        let _ = fs::remove_file(dst);
    }
    result
}

fn copy_chunks(src: &Path, dst: &Path, cancel: &CancellationToken) -> Result<u64> {
    let mut reader =
        File::open(src).map_err(|e| EngineError::io(format!("opening {}", src.display()), e))?;
    let mut writer =
        File::create(dst).map_err(|e| EngineError::io(format!("creating {}", dst.display()), e))?;

    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let n = reader
            .read(&mut buffer)
            .map_err(|e| EngineError::io(format!("reading {}", src.display()), e))?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buffer[..n])
            .map_err(|e| EngineError::io(format!("writing {}", dst.display()), e))?;
        total += n as u64;
    }
    writer
        .flush()
        .map_err(|e| EngineError::io(format!("flushing {}", dst.display()), e))?;
    Ok(total)
}

/// Copy `src` over `dst` through a temporary sibling and an atomic rename,
/// so `dst` is either untouched or fully replaced.
pub fn replace_file(src: &Path, dst: &Path, cancel: &CancellationToken) -> Result<u64> {
    let temp = temp_sibling(dst)?;
    let copied = copy_file(src, &temp, cancel)?;
    if let Err(e) = fs::rename(&temp, dst) {
        let _ = fs::remove_file(&temp);
        return Err(EngineError::io(format!("replacing {}", dst.display()), e));
    }
    Ok(copied)
}

fn temp_sibling(dst: &Path) -> Result<PathBuf> {
    let name = dst
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| EngineError::validation(format!("Invalid destination: {}", dst.display())))?;
    let parent = dst.parent().unwrap_or_else(|| Path::new("."));
    Ok(parent.join(format!(".{}.partial-{}", name, std::process::id())))
}

/// Mirror the tree at `src` into `dst`, creating directories as needed.
///
/// `filter` is applied to file names at every level; directories are always
/// descended into. `on_file` runs after each copied file. On error or
/// cancellation the caller owns cleanup of `dst`.
pub fn copy_tree<F>(
    src: &Path,
    dst: &Path,
    filter: &GlobFilter,
    cancel: &CancellationToken,
    mut on_file: F,
) -> Result<CopyStats>
where
    F: FnMut(&CopyStats),
{
    let mut stats = CopyStats::default();
    copy_dir_contents(src, dst, filter, cancel, &mut stats, &mut on_file)?;
    Ok(stats)
}

fn copy_dir_contents(
    src: &Path,
    dst: &Path,
    filter: &GlobFilter,
    cancel: &CancellationToken,
    stats: &mut CopyStats,
    on_file: &mut dyn FnMut(&CopyStats),
) -> Result<()> {
    fs::create_dir_all(dst)
        .map_err(|e| EngineError::io(format!("creating directory {}", dst.display()), e))?;

    let mut entries = fs::read_dir(src)
        .map_err(|e| EngineError::io(format!("reading directory {}", src.display()), e))?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| EngineError::io(format!("reading directory {}", src.display()), e))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let source_path = entry.path();
        let name = entry.file_name();
        let target_path = dst.join(&name);
        let file_type = entry
            .file_type()
            .map_err(|e| EngineError::io(format!("inspecting {}", source_path.display()), e))?;

        if file_type.is_dir() {
            copy_dir_contents(&source_path, &target_path, filter, cancel, stats, on_file)?;
        } else if file_type.is_file() {
            if !filter.accepts_name(&name.to_string_lossy()) {
                stats.files_skipped += 1;
                continue;
            }
            stats.bytes_copied += replace_file(&source_path, &target_path, cancel)?;
            stats.files_copied += 1;
            on_file(stats);
        } else {
            debug!("Skipping special file {}", source_path.display());
        }
    }

    Ok(())
}
