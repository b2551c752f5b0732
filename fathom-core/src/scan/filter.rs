//! Include/exclude glob filtering for scans.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::{FsError, Result};

/// Compiled pattern sets applied to root-relative paths.
///
/// Bare patterns (no `/`) match at any depth, so `*.mkv` behaves the way an
/// operator expects rather than only matching at the root. Matching is
/// case-insensitive; media trees mix cases freely.
#[derive(Debug)]
pub struct PathFilter {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl PathFilter {
    pub fn new(
        include_patterns: &[String],
        exclude_patterns: &[String],
    ) -> Result<Self> {
        Ok(PathFilter {
            include: build_set(include_patterns)?,
            exclude: build_set(exclude_patterns)?,
        })
    }

    pub fn allow_all() -> Self {
        PathFilter {
            include: None,
            exclude: None,
        }
    }

    /// Whether a file record passes the filters. Excludes win; with no
    /// include set configured, everything not excluded passes.
    pub fn admits_file(&self, path: &str) -> bool {
        if let Some(exclude) = &self.exclude
            && exclude.is_match(path)
        {
            return false;
        }
        match &self.include {
            Some(include) => include.is_match(path),
            None => true,
        }
    }

    /// Whether the walk descends into a directory. Only excludes prune
    /// directories; include patterns select files, not subtrees.
    pub fn descends_into(&self, path: &str) -> bool {
        match &self.exclude {
            Some(exclude) => !exclude.is_match(path),
            None => true,
        }
    }
}

fn build_set(patterns: &[String]) -> Result<Option<GlobSet>> {
    let cleaned: Vec<&str> = patterns
        .iter()
        .map(|pattern| pattern.trim())
        .filter(|pattern| !pattern.is_empty())
        .collect();
    if cleaned.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in cleaned {
        let glob = GlobBuilder::new(&normalize(pattern))
            .literal_separator(true)
            .case_insensitive(true)
            .build()
            .map_err(|err| {
                FsError::Config(format!(
                    "invalid glob pattern {pattern:?}: {err}"
                ))
            })?;
        builder.add(glob);
    }
    builder.build().map(Some).map_err(|err| {
        FsError::Config(format!("building glob set: {err}"))
    })
}

fn normalize(pattern: &str) -> String {
    if pattern.contains('/') {
        pattern.to_string()
    } else {
        format!("**/{pattern}")
    }
}
