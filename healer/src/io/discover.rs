//! Discovery of scripts to repair from CLI arguments.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::io::config::{RuntimeConfig, runtime_for};
use crate::io::script::TEMP_SUFFIX;

/// Expand files and directories into an ordered, de-duplicated list of absolute script paths.
///
/// Files are taken as given and must have a configured runtime. Directories are
/// walked in file-name order, skipping hidden entries, backups and temp files.
pub fn discover_scripts(
    inputs: &[PathBuf],
    runtimes: &BTreeMap<String, RuntimeConfig>,
    backup_suffix: &str,
) -> Result<Vec<PathBuf>> {
    let mut seen = BTreeSet::new();
    let mut scripts = Vec::new();

    for input in inputs {
        let resolved =
            fs::canonicalize(input).with_context(|| format!("resolve {}", input.display()))?;

        if resolved.is_file() {
            if runtime_for(runtimes, &resolved).is_none() {
                return Err(anyhow!(
                    "no runtime configured for {} (add it under [runtimes])",
                    resolved.display()
                ));
            }
            if seen.insert(resolved.clone()) {
                scripts.push(resolved);
            }
            continue;
        }

        for entry in WalkDir::new(&resolved)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
        {
            let entry = entry.with_context(|| format!("walk {}", resolved.display()))?;
            let path = entry.path();
            if !entry.file_type().is_file() || is_generated(path, backup_suffix) {
                continue;
            }
            if runtime_for(runtimes, path).is_none() {
                continue;
            }
            if seen.insert(path.to_path_buf()) {
                scripts.push(path.to_path_buf());
            }
        }
    }

    debug!(count = scripts.len(), "discovered scripts");
    Ok(scripts)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

fn is_generated(path: &Path, backup_suffix: &str) -> bool {
    let name = path.to_string_lossy();
    name.ends_with(backup_suffix) || name.ends_with(TEMP_SUFFIX)
}
