//! # mqbuild - incremental MQL4 builds
//!
//! mqbuild compiles MetaTrader 4 programs (`.mq4`) with MetaEditor, either
//! natively on Windows or through Wine everywhere else, and only recompiles
//! what an edit actually affects.
//!
//! ## Features
//!
//! - **Include tracking**: `#include <...>` and `#include "..."` are followed
//!   through the whole tree, so touching a header rebuilds every program that
//!   uses it
//! - **Trustworthy results**: success is judged by the `.ex4` timestamp, not
//!   by MetaEditor's exit code
//! - **Readable diagnostics**: MetaEditor's UTF-16 log is decoded and echoed
//! - **Watch mode**: rebuilds on every save
//!
//! ## Module Organization
//!
//! - [`build`] - Source selection, include graph, compiler invocation
//! - [`config`] - Configuration parsing (`mqbuild.toml`)
//! - [`error`] - Build error types

/// Source selection, include graph and compilation.
pub mod build;

/// Configuration file parsing (`mqbuild.toml`).
pub mod config;

/// Build error types.
pub mod error;

/// Include tree visualization.
pub mod tree;
