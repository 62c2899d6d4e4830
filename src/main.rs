//! # mqbuild CLI Entry Point
//!
//! Parses CLI arguments with clap, merges them over `mqbuild.toml` and routes
//! to the build engine.
//!
//! ## Commands
//!
//! - `build` - compile changed programs (default)
//! - `clean` - remove compiled `.ex4` files
//! - `watch` - rebuild on every change
//! - `inputs` / `outputs` - list tracked sources and expected artifacts
//! - `tree <file>` - show the include tree of one program

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use colored::*;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use mqbuild::build::deps::DependencyGraph;
use mqbuild::build::{self, Builder, Project, SystemRunner};
use mqbuild::config::{self, MqConfig};
use mqbuild::error::BuildError;
use mqbuild::tree;

#[cfg(windows)]
#[link(name = "kernel32")]
unsafe extern "system" {
    fn SetConsoleOutputCP(wCodePageID: u32) -> i32;
}

#[cfg(windows)]
fn enable_windows_utf8_console() {
    unsafe {
        SetConsoleOutputCP(65001);
    }
}

#[cfg(not(windows))]
fn enable_windows_utf8_console() {}

#[derive(Parser)]
#[command(name = "mqbuild")]
#[command(about = "Incremental MQL4 builds with MetaEditor", version = env!("CARGO_PKG_VERSION"))]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Values that take precedence over `mqbuild.toml`.
#[derive(Args)]
struct Overrides {
    /// Directory holding mqbuild.toml (default: current directory)
    #[arg(short = 'C', long, global = true)]
    dir: Option<PathBuf>,
    /// MQL4 source root
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Path to metaeditor.exe
    #[arg(long, global = true)]
    metaeditor: Option<String>,
    /// Run MetaEditor through Wine
    #[arg(long, global = true, conflicts_with = "no_wine")]
    wine: bool,
    /// Run MetaEditor natively
    #[arg(long, global = true)]
    no_wine: bool,
    /// Show up-to-date files, compiler logs and debug output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile every program affected by a change
    Build {
        /// Recompile everything
        #[arg(long)]
        force: bool,
        /// Keep compiling after a failure and report all failures
        #[arg(long)]
        keep_going: bool,
        /// Number of parallel MetaEditor processes
        #[arg(short, long)]
        jobs: Option<usize>,
    },
    /// Remove compiled artifacts
    Clean,
    /// Watch the source root and rebuild on change
    Watch,
    /// List every source and include file the build depends on
    Inputs,
    /// List the expected .ex4 artifacts
    Outputs,
    /// Show the include tree of a source file
    Tree {
        /// Source file, relative to the source root
        file: PathBuf,
    },
    /// Generate shell completion scripts
    Completion { shell: Shell },
}

fn main() -> Result<()> {
    enable_windows_utf8_console();

    let cli = Cli::parse();
    init_logging(cli.overrides.verbose);

    let command = cli.command.unwrap_or(Commands::Build {
        force: false,
        keep_going: false,
        jobs: None,
    });

    if let Commands::Completion { shell } = command {
        generate(shell, &mut Cli::command(), "mqbuild", &mut std::io::stdout());
        return Ok(());
    }

    let base_dir = match &cli.overrides.dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let mut config = config::load_config(&base_dir)?;
    apply_overrides(&mut config, &cli.overrides);

    match command {
        Commands::Build {
            force,
            keep_going,
            jobs,
        } => {
            config.keep_going |= keep_going;
            if let Some(jobs) = jobs {
                config.jobs = jobs;
            }
            let config = config.validate()?;
            let project = open(config, &base_dir)?;

            let sources = project.scan()?;
            let mut changes = sources.detect_changes();
            changes.force_all = force;

            match Builder::new(&project, &SystemRunner).run(&sources, &changes) {
                Ok(report) if report.compiled.is_empty() => {
                    println!("{} Up to date", "⚡".green());
                    Ok(())
                }
                Ok(_) => Ok(()),
                Err(e) => {
                    eprintln!("{} {}", "x".red(), e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Clean => {
            let project = open(config, &base_dir)?;
            build::clean(&project)?;
            Ok(())
        }

        Commands::Watch => {
            let project = open(config, &base_dir)?;
            build::watch(&project, &SystemRunner)
        }

        Commands::Inputs => {
            let project = open(config, &base_dir)?;
            for file in project.scan()?.input_files() {
                println!("{}", file.display());
            }
            Ok(())
        }

        Commands::Outputs => {
            let project = open(config, &base_dir)?;
            for file in project.scan()?.output_files() {
                println!("{}", file.display());
            }
            Ok(())
        }

        Commands::Tree { file } => {
            let project = open(config, &base_dir)?;
            let path = project.root().join(&file);
            let mut graph = DependencyGraph::new(project.root());
            let id = graph
                .insert(&path)
                .with_context(|| format!("{} is not a source file below {}", file.display(), project.root().display()))?;
            tree::print_tree(&graph, id, &file.to_string_lossy());
            Ok(())
        }

        Commands::Completion { .. } => Ok(()),
    }
}

fn open(config: MqConfig, base_dir: &std::path::Path) -> Result<Project> {
    Project::open(config, base_dir).map_err(|e| match e {
        BuildError::Configuration(msg) => anyhow::anyhow!(
            "{}\n\n💡 Tip: set source_root in {} or pass --root.",
            msg,
            config::CONFIG_FILE
        ),
        other => other.into(),
    })
}

fn apply_overrides(config: &mut MqConfig, overrides: &Overrides) {
    if let Some(root) = &overrides.root {
        config.source_root = root.clone();
    }
    if let Some(metaeditor) = &overrides.metaeditor {
        config.metaeditor = Some(metaeditor.clone());
    }
    if overrides.wine {
        config.wine.enabled = true;
    }
    if overrides.no_wine {
        config.wine.enabled = false;
    }
    config.verbose |= overrides.verbose;
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "mqbuild=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .init();
}
