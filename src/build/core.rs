use super::deps::{DependencyGraph, DirtySet, NodeId, normalize_path};
use super::invoker::{
    CompileOutcome, CompilerSettings, ProcessRunner, ShimScript, compile, remove_if_present,
};
use super::naming::{artifact_key, artifact_path};
use super::patterns;
use crate::config::MqConfig;
use crate::error::{BuildError, BuildResult, CompileFailure};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Instant, SystemTime};
use tracing::debug;

/// Incremental facts for one build.
#[derive(Debug, Clone, Default)]
pub struct Changes {
    /// Files that are new or modified since the last build.
    pub changed: Vec<PathBuf>,
    /// Files that no longer exist.
    pub removed: Vec<PathBuf>,
    /// Compile every candidate regardless of dirty state.
    pub force_all: bool,
}

#[derive(Debug, Default)]
pub struct BuildReport {
    pub compiled: Vec<String>,
    pub up_to_date: Vec<String>,
}

/// A configured source root.
#[derive(Debug)]
pub struct Project {
    root: PathBuf,
    config: MqConfig,
}

impl Project {
    /// Resolves `config.source_root` against `base_dir`.
    pub fn open(config: MqConfig, base_dir: &Path) -> BuildResult<Self> {
        let root = normalize_path(&base_dir.join(&config.source_root));
        if !root.is_dir() {
            return Err(BuildError::Configuration(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        Ok(Self { root, config })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &MqConfig {
        &self.config
    }

    /// Selects candidates and builds their include graph.
    pub fn scan(&self) -> BuildResult<SourceSet> {
        let keys = patterns::resolve(&self.root, &self.config.includes, &self.config.excludes)?;
        debug!("selected mql4 files: {:?}", keys);

        let mut graph = DependencyGraph::new(&self.root);
        let mut units = BTreeMap::new();
        for key in keys {
            if let Some(id) = graph.insert(&self.root.join(&key)) {
                units.insert(key, id);
            }
        }

        Ok(SourceSet { graph, units })
    }
}

/// Candidate files of one build, keyed by root-relative path.
#[derive(Debug)]
pub struct SourceSet {
    graph: DependencyGraph,
    units: BTreeMap<String, NodeId>,
}

impl SourceSet {
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn units(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.units.iter().map(|(key, id)| (key.as_str(), *id))
    }

    /// Every candidate plus everything it includes.
    pub fn input_files(&self) -> BTreeSet<PathBuf> {
        self.units
            .values()
            .flat_map(|id| self.graph.dependencies_with_self(*id))
            .collect()
    }

    /// One expected `.ex4` per candidate.
    pub fn output_files(&self) -> BTreeSet<PathBuf> {
        self.units
            .values()
            .map(|id| artifact_path(self.graph.file(*id)))
            .collect()
    }

    /// Derives changed paths from timestamps when no host reports them. A
    /// candidate is reported when its artifact is missing or older than any
    /// of its inputs; the candidate's own source is reported, not the input,
    /// so candidates sharing a header are judged one by one.
    pub fn detect_changes(&self) -> Changes {
        let mut changed = BTreeSet::new();

        for id in self.units.values() {
            let source = self.graph.file(*id);
            let Some(built) = modified(&artifact_path(source)) else {
                changed.insert(source.to_path_buf());
                continue;
            };

            let stale = self
                .graph
                .dependencies_with_self(*id)
                .iter()
                .any(|input| modified(input).is_some_and(|t| t > built));
            if stale {
                changed.insert(source.to_path_buf());
            }
        }

        Changes {
            changed: changed.into_iter().collect(),
            ..Changes::default()
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Drives the compiler over a [`SourceSet`].
pub struct Builder<'a> {
    project: &'a Project,
    runner: &'a dyn ProcessRunner,
}

impl<'a> Builder<'a> {
    pub fn new(project: &'a Project, runner: &'a dyn ProcessRunner) -> Self {
        Self { project, runner }
    }

    /// Scans the project and builds it.
    pub fn build(&self, changes: &Changes) -> BuildResult<BuildReport> {
        let sources = self.project.scan()?;
        self.run(&sources, changes)
    }

    pub fn run(&self, sources: &SourceSet, changes: &Changes) -> BuildResult<BuildReport> {
        let start_time = Instant::now();
        let config = self.project.config();
        let force_all = changes.force_all || config.force_recompile;

        let mut dirty = DirtySet::new(sources.graph());
        for path in &changes.changed {
            dirty.mark_dirty(path);
            remove_artifact_of(path)?;
        }
        for path in &changes.removed {
            remove_artifact_of(path)?;
        }

        let mut report = BuildReport::default();
        let mut queue = Vec::new();

        for (key, id) in sources.units() {
            if force_all || dirty.is_dirty(id) {
                queue.push(Task {
                    key: key.to_string(),
                    source: sources.graph().file(id).to_path_buf(),
                    dependencies: sources.graph().dependencies(id),
                });
            } else {
                if config.verbose {
                    println!("{} {} is up-to-date", "⚡".green(), artifact_key(key));
                } else {
                    debug!("{} is up-to-date", artifact_key(key));
                }
                report.up_to_date.push(key.to_string());
            }
        }

        if queue.is_empty() {
            return Ok(report);
        }

        let settings = CompilerSettings::from_config(config, self.project.root())?;
        let pb = progress_bar(queue.len());

        let results = if config.jobs > 1 {
            self.compile_parallel(&queue, &settings, &pb)?
        } else {
            self.compile_sequential(&queue, &settings, &pb)?
        };
        pb.finish_and_clear();

        let mut failures = Vec::new();
        for (key, outcome) in results {
            match outcome {
                CompileOutcome::Success { .. } => report.compiled.push(key),
                CompileOutcome::Failure { diagnostics } => {
                    failures.push(CompileFailure { key, diagnostics })
                }
            }
        }

        if !failures.is_empty() {
            return Err(BuildError::CompileFailed(failures));
        }

        println!(
            "{} Compiled {} file(s) in {:.2?}",
            "✓".green(),
            report.compiled.len(),
            start_time.elapsed()
        );
        Ok(report)
    }

    /// One compiler at a time, sharing a single shim script.
    fn compile_sequential(
        &self,
        queue: &[Task],
        settings: &CompilerSettings,
        pb: &ProgressBar,
    ) -> BuildResult<Vec<(String, CompileOutcome)>> {
        let shim = if settings.uses_wine() {
            debug!("prepare for wine environment");
            Some(ShimScript::create(self.project.root())?)
        } else {
            None
        };

        let mut results = Vec::new();
        for task in queue {
            let outcome = self.compile_task(task, settings, shim.as_ref(), pb)?;
            let failed = !outcome.is_success();
            results.push((task.key.clone(), outcome));

            if failed && !self.project.config().keep_going {
                break;
            }
        }

        Ok(results)
    }

    /// Bounded worker pool; every task writes its own shim script.
    fn compile_parallel(
        &self,
        queue: &[Task],
        settings: &CompilerSettings,
        pb: &ProgressBar,
    ) -> BuildResult<Vec<(String, CompileOutcome)>> {
        let config = self.project.config();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.jobs)
            .build()
            .map_err(|e| BuildError::Configuration(format!("cannot start {} workers: {}", config.jobs, e)))?;

        let abort = AtomicBool::new(false);
        let results = pool.install(|| {
            queue
                .par_iter()
                .map(|task| -> BuildResult<Option<(String, CompileOutcome)>> {
                    if abort.load(Ordering::SeqCst) {
                        return Ok(None);
                    }
                    let outcome = self.compile_task(task, settings, None, pb)?;
                    if !outcome.is_success() && !config.keep_going {
                        abort.store(true, Ordering::SeqCst);
                    }
                    Ok(Some((task.key.clone(), outcome)))
                })
                .collect::<BuildResult<Vec<_>>>()
        })?;

        Ok(results.into_iter().flatten().collect())
    }

    fn compile_task(
        &self,
        task: &Task,
        settings: &CompilerSettings,
        shim: Option<&ShimScript>,
        pb: &ProgressBar,
    ) -> BuildResult<CompileOutcome> {
        let root = self.project.root();
        let deps: Vec<String> = task
            .dependencies
            .iter()
            .map(|f| patterns::make_relative(&f.strip_prefix(root).unwrap_or(f).to_string_lossy()))
            .collect();
        debug!("compile {} (dependencies {:?})", task.key, deps);
        pb.set_message(format!("Compiling {}", task.key));

        let outcome = compile(&task.key, &task.source, settings, shim, self.runner)?;

        match &outcome {
            CompileOutcome::Success { log } => {
                let verbose_log = log.as_deref().filter(|_| self.project.config().verbose);
                pb.suspend(|| {
                    println!("   {} {}", "✓".green(), artifact_key(&task.key));
                    if let Some(text) = verbose_log {
                        println!("{}", text.trim_end());
                    }
                });
            }
            CompileOutcome::Failure { diagnostics } => pb.suspend(|| {
                eprintln!("   {} Failed to compile {}", "x".red(), task.key);
                eprintln!("{}", diagnostics.trim_end());
            }),
        }

        pb.inc(1);
        Ok(outcome)
    }
}

struct Task {
    key: String,
    source: PathBuf,
    dependencies: BTreeSet<PathBuf>,
}

fn progress_bar(len: usize) -> ProgressBar {
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");

    let pb = ProgressBar::new(len as u64);
    pb.set_style(style);
    pb
}

/// Deletes the `.ex4` that belongs to `path`, if there is one.
fn remove_artifact_of(path: &Path) -> BuildResult<()> {
    let artifact = artifact_path(path);
    if artifact == path {
        return Ok(());
    }

    if remove_if_present(&artifact)? {
        debug!("removed {}", artifact.display());
    }
    Ok(())
}
