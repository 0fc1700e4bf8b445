//! On-disk naming contract of the backup store.
//!
//! Every backup entry lives under a store root, in a directory that mirrors
//! the original parent directory (drive and root stripped). Entries are named
//! `<name>.<timestamp>` and carry a `<entry>.meta.json` descriptor sibling.
//! Everything here is pure path arithmetic; nothing touches the filesystem
//! except [`normalize_path`], which reads the working directory.

use crate::{EngineError, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use std::path::{Component, Path, PathBuf};

/// Suffix of every descriptor file
pub const METADATA_SUFFIX: &str = ".meta.json";

/// Infix marking emergency snapshot entries
pub const EMERGENCY_TAG: &str = "emergency";

/// Length of `YYYYMMDD-HHMMSS-mmm`
pub const TIMESTAMP_LEN: usize = 19;

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S-%3f";

/// Maps original paths to entry locations beneath one store root
#[derive(Debug, Clone)]
pub struct PathMapper {
    root: PathBuf,
}

impl PathMapper {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every version of `original`
    pub fn backup_dir_for(&self, original: &Path) -> PathBuf {
        let parent = original.parent().unwrap_or_else(|| Path::new(""));
        self.root.join(mirror_relative(parent))
    }

    /// Full path of the entry for `original` at `timestamp`
    pub fn entry_path_for(&self, original: &Path, timestamp: &str, emergency: bool) -> Result<PathBuf> {
        let name = if emergency {
            emergency_entry_name_for(original, timestamp)?
        } else {
            backup_entry_name_for(original, timestamp)?
        };
        Ok(self.backup_dir_for(original).join(name))
    }
}

/// Strip drive prefix and root so `path` can be joined under a store root
pub fn mirror_relative(path: &Path) -> PathBuf {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

/// `<base><ext>.<timestamp>` for files, `<base>.<timestamp>` for folders
pub fn backup_entry_name_for(original: &Path, timestamp: &str) -> Result<String> {
    let name = original_name(original)?;
    Ok(format!("{name}.{timestamp}"))
}

/// `<name>.emergency.<timestamp>`
pub fn emergency_entry_name_for(original: &Path, timestamp: &str) -> Result<String> {
    let name = original_name(original)?;
    Ok(format!("{name}.{EMERGENCY_TAG}.{timestamp}"))
}

/// Descriptor location for an entry: always `<entry>.meta.json`
pub fn metadata_path_for(entry: &Path) -> PathBuf {
    let mut raw = entry.as_os_str().to_os_string();
    raw.push(METADATA_SUFFIX);
    PathBuf::from(raw)
}

/// Final component of `original` as a string
pub fn original_name(original: &Path) -> Result<String> {
    original
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            EngineError::validation(format!("Path has no file name: {}", original.display()))
        })
}

/// Make `path` absolute against the working directory and resolve `.`/`..`
/// lexically. Symlinks are not followed; the path need not exist.
pub fn normalize_path(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| EngineError::io("resolving working directory", e))?
            .join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

/// `path` relative to the working directory when it lies beneath it
pub fn relative_to_cwd(path: &Path) -> PathBuf {
    match std::env::current_dir() {
        Ok(cwd) => path.strip_prefix(&cwd).unwrap_or(path).to_path_buf(),
        Err(_) => path.to_path_buf(),
    }
}

/// Format a version timestamp
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Timestamp for a backup taken now
pub fn current_timestamp() -> String {
    format_timestamp(&Utc::now())
}

/// Parse a `YYYYMMDD-HHMMSS-mmm` timestamp
pub fn parse_timestamp(timestamp: &str) -> Option<NaiveDateTime> {
    if !is_valid_timestamp(timestamp) {
        return None;
    }
    let date = NaiveDate::parse_from_str(&timestamp[..8], "%Y%m%d").ok()?;
    let hour: u32 = timestamp[9..11].parse().ok()?;
    let minute: u32 = timestamp[11..13].parse().ok()?;
    let second: u32 = timestamp[13..15].parse().ok()?;
    let millis: u32 = timestamp[16..19].parse().ok()?;
    date.and_hms_milli_opt(hour, minute, second, millis)
}

/// Timestamp one millisecond after `timestamp`
pub fn next_timestamp(timestamp: &str) -> Option<String> {
    let parsed = parse_timestamp(timestamp)? + Duration::milliseconds(1);
    Some(format_timestamp(&parsed.and_utc()))
}

/// Shape check for `\d{8}-\d{6}-\d{3}`
pub fn is_valid_timestamp(timestamp: &str) -> bool {
    let bytes = timestamp.as_bytes();
    bytes.len() == TIMESTAMP_LEN
        && bytes.iter().enumerate().all(|(i, b)| match i {
            8 | 15 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

/// The timestamp of a versioned entry name (`<name>.<timestamp>`)
pub fn timestamp_suffix(name: &str) -> Option<&str> {
    if name.len() <= TIMESTAMP_LEN + 1 {
        return None;
    }
    let split = name.len() - TIMESTAMP_LEN;
    if !name.is_char_boundary(split) || name.as_bytes()[split - 1] != b'.' {
        return None;
    }
    let suffix = &name[split..];
    is_valid_timestamp(suffix).then_some(suffix)
}

/// Whether a store entry name is a backup payload or a descriptor
pub fn is_backup_entry_name(name: &str) -> bool {
    name.ends_with(METADATA_SUFFIX) || timestamp_suffix(name).is_some()
}
