//! Build artifact cleanup.
//!
//! `mqbuild clean` removes the `.ex4` expected for every selected source, plus
//! any batch files a killed Wine build left behind in the source root.

use super::core::Project;
use anyhow::{Context, Result};
use colored::*;
use std::fs;

pub fn clean(project: &Project) -> Result<usize> {
    let sources = project.scan()?;
    let mut removed = 0;

    for artifact in sources.output_files() {
        if artifact.exists() {
            fs::remove_file(&artifact)
                .with_context(|| format!("Failed to remove {}", artifact.display()))?;
            println!("   {} Removed {}", "🗑️".red(), artifact.display());
            removed += 1;
        }
    }

    let pattern = project.root().join("mql4c-*.cmd");
    let leftovers = glob::glob(&pattern.to_string_lossy())
        .context("Failed to search for leftover batch files")?;
    for shim in leftovers.flatten() {
        fs::remove_file(&shim).with_context(|| format!("Failed to remove {}", shim.display()))?;
        removed += 1;
    }

    if removed > 0 {
        println!("{} Clean complete.", "✓".green());
    } else {
        println!("{} Nothing to clean", "!".yellow());
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MqConfig;

    #[test]
    fn test_clean_removes_expected_artifacts_only() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("MQL4");
        fs::create_dir_all(root.join("Indicators")).unwrap();
        fs::create_dir_all(root.join("Libraries")).unwrap();
        fs::write(root.join("Indicators/A.mq4"), "").unwrap();
        fs::write(root.join("Indicators/A.ex4"), "").unwrap();
        fs::write(root.join("Libraries/Vendor.ex4"), "").unwrap();
        fs::write(root.join("mql4c-stale.cmd"), "").unwrap();

        let project = Project::open(MqConfig::default(), dir.path()).unwrap();
        assert_eq!(clean(&project).unwrap(), 2);

        assert!(!root.join("Indicators/A.ex4").exists());
        assert!(!root.join("mql4c-stale.cmd").exists());
        assert!(root.join("Indicators/A.mq4").exists());
        // Not produced by this project
        assert!(root.join("Libraries/Vendor.ex4").exists());
    }

    #[test]
    fn test_clean_nothing() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("MQL4")).unwrap();
        let project = Project::open(MqConfig::default(), dir.path()).unwrap();
        assert_eq!(clean(&project).unwrap(), 0);
    }
}
