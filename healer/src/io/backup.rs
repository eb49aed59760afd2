//! One-time backup of a script's pristine content.
//!
//! The backup is taken right before the first patch is written and is never
//! touched again. After several repair rounds it still holds generation 0,
//! the content the script had before any repair, not the previous patch.
//! Callers wanting "last known good" must look elsewhere.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

/// What [`Backup::ensure`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStatus {
    /// The pristine content was written now.
    Created,
    /// A backup already existed; nothing was written.
    AlreadyPresent,
}

/// Write-once backup slot for one script.
#[derive(Debug, Clone)]
pub struct Backup {
    path: PathBuf,
    present: bool,
}

/// `script` with `suffix` appended to its file name (`tool.py` -> `tool.py.backup`).
pub fn backup_path(script: &Path, suffix: &str) -> PathBuf {
    let mut backup: OsString = script.as_os_str().to_os_string();
    backup.push(suffix);
    PathBuf::from(backup)
}

impl Backup {
    /// Backup slot for `script`. A file already at the backup path counts as taken.
    pub fn for_script(script: &Path, suffix: &str) -> Self {
        let path = backup_path(script, suffix);
        let present = path.exists();
        Self { path, present }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a backup exists. Once true it stays true.
    pub fn is_present(&self) -> bool {
        self.present
    }

    /// Store `pristine` as the backup unless one exists.
    ///
    /// The file is opened with `create_new`, so a backup created since this slot
    /// was built (another run, another process) is detected on disk and kept.
    /// A partially written backup is removed before the error is returned.
    pub fn ensure(&mut self, pristine: &str) -> Result<BackupStatus> {
        if self.present {
            debug!(backup = %self.path.display(), "backup already exists");
            return Ok(BackupStatus::AlreadyPresent);
        }

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                debug!(backup = %self.path.display(), "backup appeared on disk, keeping it");
                self.present = true;
                return Ok(BackupStatus::AlreadyPresent);
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("create backup {}", self.path.display()));
            }
        };

        if let Err(err) = file
            .write_all(pristine.as_bytes())
            .and_then(|()| file.sync_all())
        {
            drop(file);
            if let Err(rm_err) = fs::remove_file(&self.path) {
                warn!(
                    backup = %self.path.display(),
                    err = %rm_err,
                    "failed to remove partial backup"
                );
            }
            return Err(err).with_context(|| format!("write backup {}", self.path.display()));
        }

        self.present = true;
        info!(backup = %self.path.display(), bytes = pristine.len(), "backup created");
        Ok(BackupStatus::Created)
    }
}
