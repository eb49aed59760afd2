//! Execution sandbox: run one script as a child process and report what it printed.
//!
//! The [`Sandbox`] trait decouples the repair loop from process spawning. Tests
//! use scripted sandboxes that answer from the script's current content.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::io::config::{RuntimeConfig, runtime_for};
use crate::io::process::run_with_timeout;

/// Result of one script execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub stdout: String,
    /// Captured stderr, or a synthetic message when `timed_out` is set.
    pub stderr: String,
    pub timed_out: bool,
    /// Exit code when the script completed on its own.
    pub exit_code: Option<i32>,
}

impl Execution {
    /// Whether the run produced error text that should be repaired.
    pub fn has_error_output(&self) -> bool {
        !self.stderr.is_empty()
    }
}

/// Message used as the error text for a run that hit its timeout.
pub fn timeout_message(timeout: Duration) -> String {
    format!("execution timed out after {timeout:?}")
}

/// The environment could not run the script at all.
///
/// Unlike a failing script this is not repairable and aborts the whole batch.
#[derive(Debug, Clone, Error)]
#[error("cannot launch {}: {reason}", path.display())]
pub struct LaunchError {
    pub path: PathBuf,
    pub reason: String,
}

/// Abstraction over script execution backends.
pub trait Sandbox {
    /// Run `script` once. Script failures are reported in the returned
    /// [`Execution`]; only failures to launch are errors (a [`LaunchError`]).
    fn execute(&self, script: &Path, timeout: Duration) -> Result<Execution>;
}

/// Sandbox that spawns the interpreter configured for the script's extension.
pub struct ProcessSandbox {
    runtimes: BTreeMap<String, RuntimeConfig>,
    output_limit_bytes: usize,
}

impl ProcessSandbox {
    pub fn new(runtimes: BTreeMap<String, RuntimeConfig>, output_limit_bytes: usize) -> Self {
        Self {
            runtimes,
            output_limit_bytes,
        }
    }

    fn command_for(&self, script: &Path) -> Result<Command, LaunchError> {
        if !script.is_file() {
            return Err(LaunchError {
                path: script.to_path_buf(),
                reason: "script file not found".to_string(),
            });
        }
        let runtime = runtime_for(&self.runtimes, script).ok_or_else(|| LaunchError {
            path: script.to_path_buf(),
            reason: "no runtime configured for this file extension".to_string(),
        })?;
        let (program, args) = runtime.command.split_first().ok_or_else(|| LaunchError {
            path: script.to_path_buf(),
            reason: "runtime command is empty".to_string(),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        // Relative paths inside the script resolve against its own directory.
        match (script.parent(), script.file_name()) {
            (Some(dir), Some(name)) if !dir.as_os_str().is_empty() => {
                cmd.arg(name).current_dir(dir);
            }
            _ => {
                cmd.arg(script);
            }
        }
        Ok(cmd)
    }
}

impl Sandbox for ProcessSandbox {
    #[instrument(skip_all, fields(script = %script.display(), timeout_ms = timeout.as_millis() as u64))]
    fn execute(&self, script: &Path, timeout: Duration) -> Result<Execution> {
        let cmd = self.command_for(script)?;

        let output = run_with_timeout(cmd, timeout, self.output_limit_bytes).map_err(|err| {
            LaunchError {
                path: script.to_path_buf(),
                reason: format!("{err:#}"),
            }
        })?;

        let stdout = output.stdout.text();
        let Some(status) = output.status else {
            warn!("script timed out");
            return Ok(Execution {
                stdout,
                stderr: timeout_message(timeout),
                timed_out: true,
                exit_code: None,
            });
        };

        let stderr = output.stderr.text();
        let exit_code = status.code();
        if stderr.is_empty() && !status.success() {
            // Only stderr decides success; a silent non-zero exit still counts as clean.
            warn!(exit_code = ?exit_code, "script exited non-zero without writing to stderr");
        }
        debug!(exit_code = ?exit_code, stderr_bytes = stderr.len(), "script finished");
        Ok(Execution {
            stdout,
            stderr,
            timed_out: false,
            exit_code,
        })
    }
}
