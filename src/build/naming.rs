//! Source → artifact/log file naming.

use std::path::{Path, PathBuf};

/// Extension of compiled MQL4 programs.
pub const ARTIFACT_EXT: &str = "ex4";
/// Extension of the log MetaEditor writes next to the source.
pub const LOG_EXT: &str = "log";

/// Replaces everything after the last `.` with `ext`, or appends `.ext` when
/// the name has no dot at all.
pub fn replace_extension(filename: &str, ext: &str) -> String {
    match filename.rfind('.') {
        Some(idx) => format!("{}{}", &filename[..=idx], ext),
        None => format!("{filename}.{ext}"),
    }
}

/// Same as [`replace_extension`] but only touches the final path component.
pub fn with_extension(path: &Path, ext: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let renamed = replace_extension(&name, ext);

    match path.parent() {
        Some(parent) => parent.join(renamed),
        None => PathBuf::from(renamed),
    }
}

pub fn artifact_path(source: &Path) -> PathBuf {
    with_extension(source, ARTIFACT_EXT)
}

pub fn log_path(source: &Path) -> PathBuf {
    with_extension(source, LOG_EXT)
}

/// Root-relative key of the artifact, used in status output.
pub fn artifact_key(key: &str) -> String {
    replace_extension(key, ARTIFACT_EXT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_extension() {
        assert_eq!(replace_extension("Indicators/Foo.mq4", "ex4"), "Indicators/Foo.ex4");
        assert_eq!(replace_extension("Foo.tar.mq4", "log"), "Foo.tar.log");
    }

    #[test]
    fn test_replace_extension_without_dot() {
        assert_eq!(replace_extension("Foo", "ex4"), "Foo.ex4");
    }

    #[test]
    fn test_replace_extension_trailing_dot() {
        // No double separator when the name already ends with a dot
        assert_eq!(replace_extension("Foo.", "ex4"), "Foo.ex4");
    }

    #[test]
    fn test_artifact_and_log_paths() {
        let src = Path::new("MQL4/Indicators/Foo.mq4");
        assert_eq!(artifact_path(src), PathBuf::from("MQL4/Indicators/Foo.ex4"));
        assert_eq!(log_path(src), PathBuf::from("MQL4/Indicators/Foo.log"));
    }

    #[test]
    fn test_only_file_name_is_renamed() {
        // A dot in a directory name must not be treated as the extension
        let src = Path::new("MQL4/v1.2/Script");
        assert_eq!(artifact_path(src), PathBuf::from("MQL4/v1.2/Script.ex4"));
    }

    #[test]
    fn test_artifact_key() {
        assert_eq!(artifact_key("Experts/EA.mq4"), "Experts/EA.ex4");
    }
}
