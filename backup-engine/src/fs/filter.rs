//! Include/exclude glob filtering.

use crate::Result;
use globset::{Glob, GlobMatcher};
use std::path::Path;

/// An optional include glob and an optional exclude glob.
///
/// An entry passes when it does not match `exclude` and, if `include` is
/// set, matches it.
#[derive(Debug, Clone, Default)]
pub struct GlobFilter {
    include: Option<GlobMatcher>,
    exclude: Option<GlobMatcher>,
}

impl GlobFilter {
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Result<Self> {
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// A filter that accepts everything
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_none() && self.exclude.is_none()
    }

    /// Test a single entry name (not a path)
    pub fn accepts_name(&self, name: &str) -> bool {
        self.accepts(Path::new(name))
    }

    /// Test a full path
    pub fn accepts(&self, candidate: &Path) -> bool {
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(candidate) {
                return false;
            }
        }
        match &self.include {
            Some(include) => include.is_match(candidate),
            None => true,
        }
    }
}

fn compile(pattern: Option<&str>) -> Result<Option<GlobMatcher>> {
    match pattern.map(str::trim).filter(|p| !p.is_empty()) {
        Some(pattern) => Ok(Some(Glob::new(pattern)?.compile_matcher())),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_accepts_everything() {
        let filter = GlobFilter::new(None, Some("  ")).unwrap();
        assert!(filter.is_empty());
        assert!(filter.accepts_name("anything.tmp"));
    }

    #[test]
    fn test_exclude_by_name() {
        let filter = GlobFilter::new(None, Some("*.tmp")).unwrap();
        assert!(!filter.accepts_name("scratch.tmp"));
        assert!(filter.accepts_name("main.rs"));
    }

    #[test]
    fn test_include_and_exclude() {
        let filter = GlobFilter::new(Some("*.rs"), Some("test_*")).unwrap();
        assert!(filter.accepts_name("lib.rs"));
        assert!(!filter.accepts_name("test_lib.rs"));
        assert!(!filter.accepts_name("README.md"));
    }

    #[test]
    fn test_full_path_matching() {
        let filter = GlobFilter::new(Some("*/docs/*"), None).unwrap();
        assert!(filter.accepts(Path::new("/store/home/docs/a.txt.20240101-000000-000")));
        assert!(!filter.accepts(Path::new("/store/home/src/a.txt")));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = GlobFilter::new(Some("a[b"), None).unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }
}
