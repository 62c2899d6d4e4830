//! Error types for the build engine.
//!
//! Only fatal conditions live here. Unreadable sources and undecodable logs
//! are recovered where they happen and never surface as a `BuildError`.

use std::path::PathBuf;
use thiserror::Error;

/// A file that failed to compile, with the text shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileFailure {
    /// Root-relative key of the source file (e.g. `Indicators/Foo.mq4`)
    pub key: String,
    /// Decoded compiler log, or a generic message when no log was written
    pub diagnostics: String,
}

#[derive(Debug, Error)]
pub enum BuildError {
    /// Raised before any compiler process is spawned.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{}", describe_failures(.0))]
    CompileFailed(Vec<CompileFailure>),

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Io {
            path: path.into(),
            source,
        }
    }

    /// Failures carried by a `CompileFailed` error, empty for other kinds.
    pub fn failures(&self) -> &[CompileFailure] {
        match self {
            BuildError::CompileFailed(failures) => failures,
            _ => &[],
        }
    }
}

fn describe_failures(failures: &[CompileFailure]) -> String {
    match failures {
        [single] => format!("failed to compile {}", single.key),
        many => format!(
            "failed to compile {} files: {}",
            many.len(),
            many.iter()
                .map(|f| f.key.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

pub type BuildResult<T> = Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_failure_message() {
        let err = BuildError::CompileFailed(vec![CompileFailure {
            key: "Indicators/Test1.mq4".to_string(),
            diagnostics: String::new(),
        }]);
        assert_eq!(err.to_string(), "failed to compile Indicators/Test1.mq4");
        assert_eq!(err.failures().len(), 1);
    }

    #[test]
    fn test_multiple_failures_message() {
        let err = BuildError::CompileFailed(vec![
            CompileFailure {
                key: "Experts/A.mq4".to_string(),
                diagnostics: String::new(),
            },
            CompileFailure {
                key: "Experts/B.mq4".to_string(),
                diagnostics: String::new(),
            },
        ]);
        assert_eq!(
            err.to_string(),
            "failed to compile 2 files: Experts/A.mq4, Experts/B.mq4"
        );
    }

    #[test]
    fn test_configuration_has_no_failures() {
        let err = BuildError::Configuration("MQL4 is not a directory".to_string());
        assert!(err.failures().is_empty());
        assert!(err.to_string().contains("not a directory"));
    }
}
