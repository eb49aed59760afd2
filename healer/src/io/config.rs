//! Healer configuration stored in `healer.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "healer.toml";

/// Healer configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to the values the
/// loop has always used: 10 second runs, a 2 second pause after each patch,
/// no bound on repair rounds and no deadline on the oracle call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HealerConfig {
    /// Wall-clock limit for one script execution, in seconds.
    pub timeout_secs: u64,

    /// Pause after writing a patch and before re-running, in milliseconds.
    pub update_pause_ms: u64,

    /// Stop repairing a script after this many rounds. Unset means unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    /// Appended to the script path to name its one-time backup.
    pub backup_suffix: String,

    /// Keep at most this many bytes of a run's stdout and of its stderr.
    pub output_limit_bytes: usize,

    pub oracle: OracleConfig,

    /// Interpreter per file extension (without the dot, lowercase).
    ///
    /// A `[runtimes]` table in the file replaces the built-in set as a whole.
    pub runtimes: BTreeMap<String, RuntimeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OracleConfig {
    /// Base URL of the Ollama server.
    pub base_url: String,
    /// Model asked to repair scripts.
    pub model: String,
    /// Give up on a single oracle call after this many seconds. Unset waits forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Program and leading arguments; the script path is appended.
    pub command: Vec<String>,
    /// Fence info strings that mark code in this language.
    #[serde(default)]
    pub fence_tags: Vec<String>,
}

impl RuntimeConfig {
    fn new(command: &[&str], fence_tags: &[&str]) -> Self {
        Self {
            command: command.iter().map(|s| s.to_string()).collect(),
            fence_tags: fence_tags.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Human name of the language, used in the repair prompt.
    pub fn language(&self) -> &str {
        self.fence_tags
            .first()
            .or_else(|| self.command.first())
            .map(String::as_str)
            .unwrap_or("script")
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "deepseek-r1:32b".to_string(),
            deadline_secs: None,
        }
    }
}

impl OracleConfig {
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

pub fn default_runtimes() -> BTreeMap<String, RuntimeConfig> {
    BTreeMap::from([
        (
            "py".to_string(),
            RuntimeConfig::new(&["python3"], &["python", "py", "python3"]),
        ),
        (
            "sh".to_string(),
            RuntimeConfig::new(&["sh"], &["sh", "shell", "bash"]),
        ),
        (
            "js".to_string(),
            RuntimeConfig::new(&["node"], &["javascript", "js", "node"]),
        ),
        (
            "rb".to_string(),
            RuntimeConfig::new(&["ruby"], &["ruby", "rb"]),
        ),
    ])
}

impl Default for HealerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            update_pause_ms: 2_000,
            max_attempts: None,
            backup_suffix: ".backup".to_string(),
            output_limit_bytes: 1_000_000,
            oracle: OracleConfig::default(),
            runtimes: default_runtimes(),
        }
    }
}

impl HealerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(anyhow!("timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.max_attempts == Some(0) {
            return Err(anyhow!("max_attempts must be > 0 when set"));
        }
        if self.backup_suffix.is_empty() || self.backup_suffix.contains(['/', '\\']) {
            return Err(anyhow!(
                "backup_suffix must be non-empty and must not contain path separators"
            ));
        }
        if self.oracle.base_url.trim().is_empty() {
            return Err(anyhow!("oracle.base_url must be non-empty"));
        }
        if self.oracle.model.trim().is_empty() {
            return Err(anyhow!("oracle.model must be non-empty"));
        }
        if self.oracle.deadline_secs == Some(0) {
            return Err(anyhow!("oracle.deadline_secs must be > 0 when set"));
        }
        if self.runtimes.is_empty() {
            return Err(anyhow!("runtimes must configure at least one extension"));
        }
        for (ext, runtime) in &self.runtimes {
            if ext.is_empty() || ext.starts_with('.') || ext.to_lowercase() != *ext {
                return Err(anyhow!(
                    "runtime key '{ext}' must be a lowercase extension without the dot"
                ));
            }
            if runtime.command.is_empty() || runtime.command[0].trim().is_empty() {
                return Err(anyhow!("runtimes.{ext}.command must be a non-empty array"));
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn update_pause(&self) -> Duration {
        Duration::from_millis(self.update_pause_ms)
    }

    /// Runtime configured for the script's extension.
    pub fn runtime_for(&self, script: &Path) -> Option<&RuntimeConfig> {
        runtime_for(&self.runtimes, script)
    }
}

/// Look up the runtime for `script` by its lowercase extension.
pub fn runtime_for<'a>(
    runtimes: &'a BTreeMap<String, RuntimeConfig>,
    script: &Path,
) -> Option<&'a RuntimeConfig> {
    let ext = script.extension()?.to_str()?.to_lowercase();
    runtimes.get(&ext)
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `HealerConfig::default()`.
pub fn load_config(path: &Path) -> Result<HealerConfig> {
    if !path.exists() {
        let cfg = HealerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: HealerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &HealerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
