//! MetaEditor invocation.
//!
//! MetaEditor's exit code cannot be trusted. Run natively it returns the
//! number of compiled files; run through Wine the code is unrelated to the
//! compilation. A file therefore counts as compiled when its `.ex4` exists
//! and is not older than the source.

use super::log::read_log;
use super::naming::{artifact_path, log_path};
use crate::config::MqConfig;
use crate::error::{BuildError, BuildResult};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Native MetaEditor exit code for "one file compiled".
pub const COMPILED_ONE_FILE: i32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    Success { log: Option<String> },
    Failure { diagnostics: String },
}

impl CompileOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CompileOutcome::Success { .. })
    }
}

#[derive(Debug, Clone)]
pub struct WineSettings {
    pub executable: String,
    pub prefix: Option<PathBuf>,
    pub system_wide_drive: String,
}

#[derive(Debug, Clone)]
pub enum InvocationMode {
    Direct,
    Wine(WineSettings),
}

/// Everything needed to run the compiler for any file of one source root.
#[derive(Debug, Clone)]
pub struct CompilerSettings {
    /// Absolute source root; also the working directory of the compiler.
    pub root: PathBuf,
    pub metaeditor: String,
    pub mode: InvocationMode,
}

impl CompilerSettings {
    pub fn from_config(config: &MqConfig, root: &Path) -> BuildResult<Self> {
        let metaeditor = config.metaeditor.clone().ok_or_else(|| {
            BuildError::Configuration("no metaeditor configured".to_string())
        })?;

        let mode = if config.wine.enabled {
            InvocationMode::Wine(WineSettings {
                executable: config.wine.executable.clone(),
                prefix: config.wine.prefix.clone(),
                system_wide_drive: config.wine.system_wide_drive.clone(),
            })
        } else {
            InvocationMode::Direct
        };

        Ok(Self {
            root: root.to_path_buf(),
            metaeditor,
            mode,
        })
    }

    pub fn uses_wine(&self) -> bool {
        matches!(self.mode, InvocationMode::Wine(_))
    }
}

/// A fully described child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
}

/// Runs a process to completion and reports its raw exit code.
pub trait ProcessRunner: Sync {
    fn run(&self, spec: &CommandSpec) -> BuildResult<i32>;
}

pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> BuildResult<i32> {
        let mut cmd = Command::new(&spec.program);

        // MetaEditor parses its own command line; its quotes must arrive as-is
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            for arg in &spec.args {
                cmd.raw_arg(arg);
            }
        }
        #[cfg(not(windows))]
        cmd.args(&spec.args);

        cmd.current_dir(&spec.working_dir);
        cmd.envs(spec.env.iter().map(|(k, v)| (k, v)));

        let status = cmd.status().map_err(|source| BuildError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        // Killed by a signal; no exit code to report
        Ok(status.code().unwrap_or(-1))
    }
}

/// Batch file used to start MetaEditor inside Wine's `cmd`.
///
/// Removed from disk when dropped.
#[derive(Debug)]
pub struct ShimScript {
    file: NamedTempFile,
}

impl ShimScript {
    pub fn create(dir: &Path) -> BuildResult<Self> {
        let file = tempfile::Builder::new()
            .prefix("mql4c-")
            .suffix(".cmd")
            .tempfile_in(dir)
            .map_err(|e| BuildError::io(dir, e))?;
        debug!("created temporary batch file {}", file.path().display());
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn write(&self, metaeditor: &str, key: &str) -> BuildResult<()> {
        fs::write(self.path(), shim_script(metaeditor, key))
            .map_err(|e| BuildError::io(self.path(), e))
    }
}

impl Drop for ShimScript {
    fn drop(&mut self) {
        debug!("remove temporary batch file {}", self.file.path().display());
    }
}

/// Latin-1 batch file body with CRLF line endings.
pub fn shim_script(metaeditor: &str, key: &str) -> Vec<u8> {
    let text = format!(
        "@ECHO OFF\r\n\"{}\" /compile:\"{}\" /log\r\n",
        metaeditor,
        key.replace('/', "\\")
    );

    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// Host path as seen from inside Wine, e.g. `z:\home\me\MQL4\x.cmd`.
pub fn to_wine_path(path: &Path, drive: &str) -> String {
    format!("{}{}", drive, path.to_string_lossy().replace('/', "\\"))
}

pub fn wine_environment(wine: &WineSettings) -> Vec<(String, String)> {
    // Keep Wine's debug chatter off the console
    let mut env = vec![("WINEDEBUG".to_string(), "-all".to_string())];

    if let Some(prefix) = &wine.prefix {
        env.push(("WINEPREFIX".to_string(), prefix.to_string_lossy().into_owned()));

        // A missing prefix is created on first start; MetaEditor needs win32
        if !prefix.is_dir() {
            env.push(("WINEARCH".to_string(), "win32".to_string()));
        }
    }

    env
}

pub fn direct_command(settings: &CompilerSettings, key: &str) -> CommandSpec {
    CommandSpec {
        program: settings.metaeditor.clone(),
        args: vec![
            format!("/compile:\"{}\"", key),
            format!("/inc:\"{}\"", settings.root.display()),
            "/log".to_string(),
        ],
        working_dir: settings.root.clone(),
        env: Vec::new(),
    }
}

pub fn wine_command(settings: &CompilerSettings, wine: &WineSettings, shim: &Path) -> CommandSpec {
    CommandSpec {
        program: wine.executable.clone(),
        args: vec![
            "cmd".to_string(),
            "/c".to_string(),
            to_wine_path(shim, &wine.system_wide_drive),
        ],
        working_dir: settings.root.clone(),
        env: wine_environment(wine),
    }
}

/// True when `artifact` exists and is at least as new as `source`.
pub fn is_up_to_date(source: &Path, artifact: &Path) -> bool {
    let modified = |p: &Path| fs::metadata(p).and_then(|m| m.modified());

    match (modified(artifact), modified(source)) {
        (Ok(artifact_time), Ok(source_time)) => artifact_time >= source_time,
        _ => false,
    }
}

/// Compiles one file.
///
/// The previous `.ex4` is deleted first, so an artifact found afterwards was
/// written by this run. In Wine mode `shim` is rewritten for this file;
/// without one a private shim is created and removed again before returning.
pub fn compile(
    key: &str,
    source: &Path,
    settings: &CompilerSettings,
    shim: Option<&ShimScript>,
    runner: &dyn ProcessRunner,
) -> BuildResult<CompileOutcome> {
    let artifact = artifact_path(source);
    if remove_if_present(&artifact)? {
        debug!("removed previous {}", artifact.display());
    }

    let exit_code = match &settings.mode {
        InvocationMode::Direct => runner.run(&direct_command(settings, key))?,
        InvocationMode::Wine(wine) => {
            let owned;
            let shim = match shim {
                Some(shim) => shim,
                None => {
                    owned = ShimScript::create(&settings.root)?;
                    &owned
                }
            };
            shim.write(&settings.metaeditor, key)?;
            runner.run(&wine_command(settings, wine, shim.path()))?
        }
    };
    debug!("compiler exited with {} for {}", exit_code, key);

    let exit_ok = settings.uses_wine() || exit_code == COMPILED_ONE_FILE;
    let compiled = exit_ok && is_up_to_date(source, &artifact);

    let log_file = log_path(source);
    let log = log_file.exists().then(|| read_log(&log_file));
    remove_log(&log_file);

    if compiled {
        return Ok(CompileOutcome::Success { log });
    }

    let diagnostics = match log {
        Some(text) if !text.is_empty() => text,
        _ => format!("failed to compile {}", key),
    };
    Ok(CompileOutcome::Failure { diagnostics })
}

/// Deletes `path`; a file that is already gone is not an error.
pub(crate) fn remove_if_present(path: &Path) -> BuildResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(BuildError::io(path, e)),
    }
}

fn remove_log(log_file: &Path) {
    match fs::remove_file(log_file) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove log file {}: {}", log_file.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use std::sync::Mutex;

    struct StubRunner {
        exit_code: i32,
        artifact: Option<PathBuf>,
        log: Option<(PathBuf, String)>,
        calls: Mutex<Vec<CommandSpec>>,
    }

    impl StubRunner {
        fn new(exit_code: i32) -> Self {
            Self {
                exit_code,
                artifact: None,
                log: None,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl ProcessRunner for StubRunner {
        fn run(&self, spec: &CommandSpec) -> BuildResult<i32> {
            self.calls.lock().unwrap().push(spec.clone());
            if let Some(artifact) = &self.artifact {
                fs::write(artifact, b"ex4").unwrap();
            }
            if let Some((path, text)) = &self.log {
                let bytes: Vec<u8> = text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
                fs::write(path, bytes).unwrap();
            }
            Ok(self.exit_code)
        }
    }

    fn settings(root: &Path, wine: bool) -> CompilerSettings {
        let mode = if wine {
            InvocationMode::Wine(WineSettings {
                executable: "wine".to_string(),
                prefix: None,
                system_wide_drive: "z:".to_string(),
            })
        } else {
            InvocationMode::Direct
        };
        CompilerSettings {
            root: root.to_path_buf(),
            metaeditor: "C:\\MT4\\metaeditor.exe".to_string(),
            mode,
        }
    }

    /// Source file with an mtime well in the past.
    fn old_source(root: &Path) -> PathBuf {
        let source = root.join("Indicators/Test1.mq4");
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        fs::write(&source, "int start() { return 0; }").unwrap();
        let past = FileTime::from_unix_time(FileTime::now().unix_seconds() - 60, 0);
        filetime::set_file_mtime(&source, past).unwrap();
        source
    }

    #[test]
    fn test_wine_success_ignores_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let source = old_source(dir.path());
        let mut runner = StubRunner::new(255);
        runner.artifact = Some(artifact_path(&source));

        let outcome = compile(
            "Indicators/Test1.mq4",
            &source,
            &settings(dir.path(), true),
            None,
            &runner,
        )
        .unwrap();
        assert!(outcome.is_success());

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0].program, "wine");
        assert_eq!(calls[0].args[..2], ["cmd".to_string(), "/c".to_string()]);
        assert!(calls[0].args[2].starts_with("z:\\"));
    }

    #[test]
    fn test_direct_requires_sentinel_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let source = old_source(dir.path());
        let mut runner = StubRunner::new(0);
        runner.artifact = Some(artifact_path(&source));

        let outcome = compile("Indicators/Test1.mq4", &source, &settings(dir.path(), false), None, &runner)
            .unwrap();
        assert_eq!(
            outcome,
            CompileOutcome::Failure {
                diagnostics: "failed to compile Indicators/Test1.mq4".to_string()
            }
        );
    }

    #[test]
    fn test_direct_success() {
        let dir = tempfile::tempdir().unwrap();
        let source = old_source(dir.path());
        let mut runner = StubRunner::new(COMPILED_ONE_FILE);
        runner.artifact = Some(artifact_path(&source));
        runner.log = Some((log_path(&source), "\u{feff}\r\n0 error(s), 0 warning(s)".to_string()));

        let outcome = compile("Indicators/Test1.mq4", &source, &settings(dir.path(), false), None, &runner)
            .unwrap();
        assert_eq!(
            outcome,
            CompileOutcome::Success {
                log: Some(format!("|  0 error(s), 0 warning(s){}", if cfg!(windows) { "\r\n" } else { "\n" })),
            }
        );
        assert!(!log_path(&source).exists());

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0].program, "C:\\MT4\\metaeditor.exe");
        assert_eq!(calls[0].args[0], "/compile:\"Indicators/Test1.mq4\"");
        assert_eq!(calls[0].args[2], "/log");
        assert_eq!(calls[0].working_dir, dir.path());
    }

    #[test]
    fn test_stale_artifact_fails_with_log() {
        let dir = tempfile::tempdir().unwrap();
        let source = old_source(dir.path());
        let artifact = artifact_path(&source);
        fs::write(&artifact, b"old").unwrap();
        let older = FileTime::from_unix_time(FileTime::now().unix_seconds() - 3600, 0);
        filetime::set_file_mtime(&artifact, older).unwrap();

        let mut runner = StubRunner::new(0);
        runner.log = Some((log_path(&source), "Test1.mq4 : 'x' - undeclared identifier".to_string()));

        let outcome = compile("Indicators/Test1.mq4", &source, &settings(dir.path(), true), None, &runner)
            .unwrap();
        match outcome {
            CompileOutcome::Failure { diagnostics } => {
                assert!(diagnostics.starts_with("|  Test1.mq4 : 'x' - undeclared identifier"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(!log_path(&source).exists());
    }

    #[test]
    fn test_previous_artifact_does_not_count_as_success() {
        let dir = tempfile::tempdir().unwrap();
        let source = old_source(dir.path());
        let artifact = artifact_path(&source);
        // Built by an earlier run, newer than the source
        fs::write(&artifact, b"previous").unwrap();

        let runner = StubRunner::new(0);
        let outcome = compile("Indicators/Test1.mq4", &source, &settings(dir.path(), true), None, &runner)
            .unwrap();

        assert_eq!(
            outcome,
            CompileOutcome::Failure {
                diagnostics: "failed to compile Indicators/Test1.mq4".to_string()
            }
        );
        assert!(!artifact.exists());
    }

    #[test]
    fn test_missing_artifact_fails() {
        let dir = tempfile::tempdir().unwrap();
        let source = old_source(dir.path());
        let runner = StubRunner::new(COMPILED_ONE_FILE);

        let outcome = compile("Indicators/Test1.mq4", &source, &settings(dir.path(), false), None, &runner)
            .unwrap();
        assert!(!outcome.is_success());
    }

    #[test]
    fn test_private_shim_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let source = old_source(dir.path());
        let runner = StubRunner::new(0);

        compile("Indicators/Test1.mq4", &source, &settings(dir.path(), true), None, &runner).unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".cmd"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_shared_shim_is_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let source = old_source(dir.path());
        let shim = ShimScript::create(dir.path()).unwrap();
        let runner = StubRunner::new(0);

        compile("Indicators/Test1.mq4", &source, &settings(dir.path(), true), Some(&shim), &runner).unwrap();

        let content = fs::read(shim.path()).unwrap();
        assert_eq!(content, shim_script("C:\\MT4\\metaeditor.exe", "Indicators/Test1.mq4"));

        let path = shim.path().to_path_buf();
        drop(shim);
        assert!(!path.exists());
    }

    #[test]
    fn test_shim_script_format() {
        let body = shim_script("C:\\MT4\\metaeditor.exe", "Experts/Sub/EA.mq4");
        assert_eq!(
            String::from_utf8(body).unwrap(),
            "@ECHO OFF\r\n\"C:\\MT4\\metaeditor.exe\" /compile:\"Experts\\Sub\\EA.mq4\" /log\r\n"
        );
    }

    #[test]
    fn test_shim_script_is_latin1() {
        let body = shim_script("C:\\Programme\\Größe\\metaeditor.exe", "Scripts/€.mq4");
        assert!(body.contains(&0xf6));
        assert!(body.contains(&b'?'));
    }

    #[test]
    fn test_wine_environment() {
        let dir = tempfile::tempdir().unwrap();
        let mut wine = WineSettings {
            executable: "wine".to_string(),
            prefix: None,
            system_wide_drive: "z:".to_string(),
        };
        assert_eq!(wine_environment(&wine), vec![("WINEDEBUG".to_string(), "-all".to_string())]);

        wine.prefix = Some(dir.path().join("new-prefix"));
        let env = wine_environment(&wine);
        assert!(env.iter().any(|(k, v)| k == "WINEARCH" && v == "win32"));

        wine.prefix = Some(dir.path().to_path_buf());
        let env = wine_environment(&wine);
        assert!(env.iter().any(|(k, _)| k == "WINEPREFIX"));
        assert!(!env.iter().any(|(k, _)| k == "WINEARCH"));
    }

    #[test]
    fn test_to_wine_path() {
        assert_eq!(
            to_wine_path(Path::new("/home/me/MQL4/mql4c-1.cmd"), "z:"),
            "z:\\home\\me\\MQL4\\mql4c-1.cmd"
        );
    }

    #[test]
    fn test_equal_timestamps_count_as_up_to_date() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("A.mq4");
        let artifact = dir.path().join("A.ex4");
        fs::write(&source, "").unwrap();
        fs::write(&artifact, "").unwrap();
        let t = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&source, t).unwrap();
        filetime::set_file_mtime(&artifact, t).unwrap();
        assert!(is_up_to_date(&source, &artifact));
    }

    #[test]
    fn test_missing_metaeditor_is_configuration_error() {
        let config = MqConfig::default();
        let err = CompilerSettings::from_config(&config, Path::new("/tmp")).unwrap_err();
        assert!(matches!(err, BuildError::Configuration(_)));
    }
}
