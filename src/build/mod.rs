mod clean;
mod core;
pub mod deps;
pub mod invoker;
pub mod log;
pub mod naming;
pub mod patterns;
mod watcher;

pub use clean::clean;
pub use core::{BuildReport, Builder, Changes, Project, SourceSet};
pub use invoker::{CompileOutcome, ProcessRunner, SystemRunner};
pub use watcher::watch;
