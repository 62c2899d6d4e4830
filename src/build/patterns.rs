//! Include/exclude pattern expansion against the source root.

use crate::error::{BuildError, BuildResult};
use ::glob::{MatchOptions, Pattern};
use std::collections::BTreeSet;
use std::path::Path;
use walkdir::WalkDir;

// `*` stays inside one segment, `**` crosses directories
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Expands `includes` minus `excludes` under `root`.
///
/// Keys are root-relative, `/`-separated and sorted. No include patterns
/// means no candidates.
pub fn resolve(root: &Path, includes: &[String], excludes: &[String]) -> BuildResult<BTreeSet<String>> {
    if includes.is_empty() {
        return Ok(BTreeSet::new());
    }

    let includes = compile_patterns(includes)?;
    let excludes = compile_patterns(excludes)?;

    let mut selected = BTreeSet::new();
    for key in relative_files(root) {
        let included = includes.iter().any(|p| p.matches_with(&key, MATCH_OPTIONS));
        if included && !excludes.iter().any(|p| p.matches_with(&key, MATCH_OPTIONS)) {
            selected.insert(key);
        }
    }

    Ok(selected)
}

fn compile_patterns(patterns: &[String]) -> BuildResult<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(&p.replace('\\', "/")).map_err(|e| {
                BuildError::Configuration(format!("invalid file pattern '{}': {}", p, e))
            })
        })
        .collect()
}

/// Every regular file below `root`, as a relative key.
fn relative_files(root: &Path) -> impl Iterator<Item = String> + '_ {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(move |e| {
            let rel = e.path().strip_prefix(root).ok()?;
            Some(make_relative(&rel.to_string_lossy()))
        })
}

/// Normalizes separators and strips a single leading separator.
pub fn make_relative(path: &str) -> String {
    let path = path.replace('\\', "/");
    match path.strip_prefix('/') {
        Some(stripped) => stripped.to_string(),
        None => path,
    }
}
