//! `mqbuild.toml` parsing.
//!
//! Every key is optional; a missing file yields the defaults below.
//!
//! ```toml
//! source_root = "MQL4"
//! includes = ["Indicators/*.mq4", "Experts/*.mq4", "Scripts/*.mq4"]
//! excludes = ["**/*.mqh"]
//! metaeditor = "C:\\Program Files\\MetaTrader 4\\metaeditor.exe"
//!
//! [wine]
//! enabled = true
//! prefix = "/home/me/.wine-mt4"
//! ```

use crate::error::BuildError;
use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "mqbuild.toml";

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct MqConfig {
    /// The `MQL4` data folder holding `Indicators/`, `Experts/`, `Include/`...
    pub source_root: PathBuf,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    /// Path to `metaeditor.exe`, as the compiler process should see it.
    pub metaeditor: Option<String>,
    pub force_recompile: bool,
    pub verbose: bool,
    /// Parallel compiler processes; 1 compiles strictly in order.
    pub jobs: usize,
    /// Compile every dirty file even after a failure.
    pub keep_going: bool,
    pub wine: WineConfig,
}

impl Default for MqConfig {
    fn default() -> Self {
        Self {
            source_root: PathBuf::from("MQL4"),
            includes: vec![
                "Indicators/*.mq4".to_string(),
                "Experts/*.mq4".to_string(),
                "Scripts/*.mq4".to_string(),
            ],
            excludes: vec!["**/*.mqh".to_string()],
            metaeditor: None,
            force_recompile: false,
            verbose: false,
            jobs: 1,
            keep_going: false,
            wine: WineConfig::default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct WineConfig {
    /// Run MetaEditor through Wine. Defaults to on for every host but Windows.
    pub enabled: bool,
    pub executable: String,
    /// Custom `WINEPREFIX`; created as a 32-bit prefix on first use.
    pub prefix: Option<PathBuf>,
    /// Drive letter Wine maps to the host `/`.
    pub system_wide_drive: String,
}

impl Default for WineConfig {
    fn default() -> Self {
        Self {
            enabled: !cfg!(windows),
            executable: "wine".to_string(),
            prefix: None,
            system_wide_drive: "z:".to_string(),
        }
    }
}

impl MqConfig {
    /// Checks values serde cannot and normalizes the drive letter.
    pub fn validate(mut self) -> Result<Self> {
        let drive = Regex::new(r"^[a-zA-Z]:$")?;
        if !drive.is_match(&self.wine.system_wide_drive) {
            return Err(BuildError::Configuration(format!(
                "system wide drive must be a windows drive specification (eg. d:), got '{}'",
                self.wine.system_wide_drive
            ))
            .into());
        }
        self.wine.system_wide_drive = self.wine.system_wide_drive.to_lowercase();

        if self.jobs == 0 {
            return Err(BuildError::Configuration("jobs must be at least 1".to_string()).into());
        }

        Ok(self)
    }
}

/// Loads `mqbuild.toml` from `dir`, falling back to defaults when absent.
pub fn load_config(dir: &Path) -> Result<MqConfig> {
    let path = dir.join(CONFIG_FILE);
    if !path.exists() {
        return MqConfig::default().validate();
    }

    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn parse_config(content: &str) -> Result<MqConfig> {
    let config: MqConfig = toml::from_str(content)?;
    config.validate()
}
