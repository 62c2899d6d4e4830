use super::core::{Builder, Changes, Project};
use super::invoker::ProcessRunner;
use super::naming::{ARTIFACT_EXT, LOG_EXT};
use anyhow::Result;
use colored::*;
use notify::event::{Event, EventKind};
use notify::{Config, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::time::Duration;
use tracing::debug;

pub fn watch(project: &Project, runner: &dyn ProcessRunner) -> Result<()> {
    println!(
        "{} Watching for changes in {}...",
        "👀".cyan(),
        project.root().display()
    );

    let (tx, rx) = channel();
    let config_notify = Config::default().with_poll_interval(Duration::from_secs(1));
    let mut watcher = notify::RecommendedWatcher::new(tx, config_notify)?;
    watcher.watch(project.root(), RecursiveMode::Recursive)?;

    // First run works from timestamps
    let sources = project.scan()?;
    let changes = sources.detect_changes();
    report(Builder::new(project, runner).run(&sources, &changes));

    while let Ok(event) = rx.recv() {
        let mut changes = Changes::default();
        collect(event, &mut changes);

        // Debounce simple
        std::thread::sleep(Duration::from_millis(100));
        while let Ok(event) = rx.try_recv() {
            collect(event, &mut changes);
        }

        if changes.changed.is_empty() && changes.removed.is_empty() {
            continue;
        }

        println!("{} File changed. Rebuilding...", "🔄".yellow());
        report(Builder::new(project, runner).build(&changes));
    }
    Ok(())
}

fn report<T>(result: crate::error::BuildResult<T>) {
    if let Err(e) = result {
        println!("{} Error: {}", "x".red(), e);
    }
}

/// Sorts one watcher event into changed and removed paths.
///
/// A removed file is also reported as changed so that sources including it
/// are recompiled (and report the missing include).
fn collect(event: notify::Result<Event>, changes: &mut Changes) {
    let event = match event {
        Ok(event) => event,
        Err(e) => {
            debug!("watch error: {}", e);
            return;
        }
    };

    let removal = matches!(event.kind, EventKind::Remove(_));
    let update = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_));
    if !removal && !update {
        return;
    }

    for path in event.paths.into_iter().filter(|p| !is_build_output(p)) {
        if removal || !path.exists() {
            push_unique(&mut changes.removed, path.clone());
        }
        push_unique(&mut changes.changed, path);
    }
}

fn push_unique(paths: &mut Vec<PathBuf>, path: PathBuf) {
    if !paths.contains(&path) {
        paths.push(path);
    }
}

/// Files written by the build itself; reacting to them would loop forever.
fn is_build_output(path: &Path) -> bool {
    let ext_matches = path
        .extension()
        .is_some_and(|ext| ext == ARTIFACT_EXT || ext == LOG_EXT);
    let is_shim = path
        .file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with("mql4c-"));
    ext_matches || is_shim
}
