//! Repair loop for a single script.
//!
//! A [`ScriptUnit`] moves through `ready -> running -> (repairing -> updating ->
//! running)* -> succeeded | failed`. Every move goes through
//! [`core::machine::next_state`](crate::core::machine::next_state); the driver
//! below only decides which trigger fires.
//!
//! There is no bound on repair rounds unless [`LoopConfig::max_attempts`] is
//! set: a script keeps cycling until a run is clean or the oracle stops giving
//! usable patches.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::machine::{Trigger, next_state};
use crate::core::response::parse_response;
use crate::core::types::{ErrorKind, FailureReason, UnitState};
use crate::io::backup::{Backup, BackupStatus};
use crate::io::cancel::CancelToken;
use crate::io::config::{HealerConfig, RuntimeConfig, runtime_for};
use crate::io::oracle::{RepairOracle, RepairRequest};
use crate::io::sandbox::Sandbox;
use crate::io::script::{read_script, write_script};

/// Longest slice of an unusable oracle reply quoted in a failure reason.
const REPLY_EXCERPT_BYTES: usize = 400;

/// Settings for driving one script.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Wall-clock limit per execution.
    pub timeout: Duration,
    /// Pause after writing a patch, before the next execution.
    pub update_pause: Duration,
    /// Fail after this many applied patches. `None` keeps going indefinitely.
    pub max_attempts: Option<u32>,
    pub backup_suffix: String,
    /// Used for the prompt's language name and for fence tags.
    pub runtimes: BTreeMap<String, RuntimeConfig>,
    /// Fired on interrupt. The batch stops before the next unit.
    pub cancel: CancelToken,
}

impl LoopConfig {
    pub fn from_config(cfg: &HealerConfig) -> Self {
        Self {
            timeout: cfg.timeout(),
            update_pause: cfg.update_pause(),
            max_attempts: cfg.max_attempts,
            backup_suffix: cfg.backup_suffix.clone(),
            runtimes: cfg.runtimes.clone(),
            cancel: CancelToken::new(),
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from_config(&HealerConfig::default())
    }
}

/// A script tracked through the repair loop.
#[derive(Debug)]
pub struct ScriptUnit {
    pub path: PathBuf,
    pub state: UnitState,
    backup: Backup,
}

impl ScriptUnit {
    pub fn new(path: &Path, backup_suffix: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            state: UnitState::Ready,
            backup: Backup::for_script(path, backup_suffix),
        }
    }

    pub fn backup_path(&self) -> &Path {
        self.backup.path()
    }

    pub fn has_backup(&self) -> bool {
        self.backup.is_present()
    }

    fn fire(&mut self, trigger: Trigger) -> Result<(UnitState, UnitState)> {
        let from = self.state;
        let to = next_state(from, trigger)
            .with_context(|| format!("drive {}", self.path.display()))?;
        self.state = to;
        debug!(%from, %to, ?trigger, "transition");
        Ok((from, to))
    }
}

/// One repair round. Lives from the failing run until the patch is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairAttempt {
    pub error_text: String,
    pub original_content: String,
    pub patched_content: Option<String>,
}

/// Progress notifications for one unit, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEvent {
    Transition {
        from: UnitState,
        to: UnitState,
    },
    /// A run finished. `error` is set when it produced error text.
    Executed {
        stdout: String,
        stderr: String,
        error: Option<ErrorKind>,
    },
    /// The oracle is being asked to fix `error_text`.
    RepairRequested {
        round: u32,
        error_text: String,
    },
    PatchExtracted {
        round: u32,
        bytes: usize,
    },
    BackupCreated {
        path: PathBuf,
    },
    BackupRetained {
        path: PathBuf,
    },
    ScriptUpdated {
        path: PathBuf,
        bytes: usize,
    },
    Finished {
        state: UnitState,
        reason: Option<FailureReason>,
    },
}

/// Summary of one unit after it reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub path: PathBuf,
    pub final_state: UnitState,
    pub reason: Option<FailureReason>,
    /// Script executions performed.
    pub executions: u32,
    /// Times the oracle was consulted.
    pub repair_rounds: u32,
    /// Patches written to the script.
    pub patches_applied: u32,
    /// Whether this run wrote the backup (false if one already existed).
    pub backup_created: bool,
    pub transitions: Vec<(UnitState, UnitState)>,
}

impl UnitReport {
    pub fn succeeded(&self) -> bool {
        self.final_state == UnitState::Succeeded
    }
}

/// Drive `path` from `ready` to a terminal state.
///
/// Only a launch failure from `sandbox` (or an internal transition error) is
/// returned as `Err`; oracle, extraction and persistence failures end the unit
/// as `failed` with a [`FailureReason`].
#[instrument(skip_all, fields(script = %path.display()))]
pub fn repair_script<S: Sandbox, O: RepairOracle, F: FnMut(&LoopEvent)>(
    path: &Path,
    sandbox: &S,
    oracle: &O,
    config: &LoopConfig,
    on_event: F,
) -> Result<UnitReport> {
    let runtime = runtime_for(&config.runtimes, path);
    let driver = Driver {
        sandbox,
        oracle,
        config,
        language: runtime
            .map(|r| r.language().to_string())
            .unwrap_or_else(|| "script".to_string()),
        fence_tags: runtime.map(|r| r.fence_tags.clone()).unwrap_or_default(),
        unit: ScriptUnit::new(path, &config.backup_suffix),
        on_event,
        pending_error: None,
        attempt: None,
        report: UnitReport {
            path: path.to_path_buf(),
            final_state: UnitState::Ready,
            reason: None,
            executions: 0,
            repair_rounds: 0,
            patches_applied: 0,
            backup_created: false,
            transitions: Vec::new(),
        },
    };
    driver.run()
}

struct Driver<'a, S, O, F> {
    sandbox: &'a S,
    oracle: &'a O,
    config: &'a LoopConfig,
    language: String,
    fence_tags: Vec<String>,
    unit: ScriptUnit,
    on_event: F,
    /// Error text of the last failing run, consumed by the next repair round.
    pending_error: Option<String>,
    /// Round whose patch is waiting to be persisted.
    attempt: Option<RepairAttempt>,
    report: UnitReport,
}

impl<S: Sandbox, O: RepairOracle, F: FnMut(&LoopEvent)> Driver<'_, S, O, F> {
    fn run(mut self) -> Result<UnitReport> {
        info!(
            backup = %self.unit.backup_path().display(),
            has_backup = self.unit.has_backup(),
            "processing script"
        );
        self.fire(Trigger::Begin)?;

        while !self.unit.state.is_terminal() {
            match self.unit.state {
                UnitState::Running => self.execute()?,
                UnitState::Repairing => self.repair()?,
                UnitState::Updating => self.update()?,
                state => return Err(anyhow!("unexpected state {state} inside the loop")),
            }
        }

        self.report.final_state = self.unit.state;
        (self.on_event)(&LoopEvent::Finished {
            state: self.unit.state,
            reason: self.report.reason.clone(),
        });
        info!(
            state = %self.unit.state,
            executions = self.report.executions,
            patches = self.report.patches_applied,
            "script finished"
        );
        Ok(self.report)
    }

    fn fire(&mut self, trigger: Trigger) -> Result<()> {
        let (from, to) = self.unit.fire(trigger)?;
        self.report.transitions.push((from, to));
        (self.on_event)(&LoopEvent::Transition { from, to });
        Ok(())
    }

    fn fail(&mut self, trigger: Trigger, reason: FailureReason) -> Result<()> {
        warn!(%reason, "giving up on script");
        self.report.reason = Some(reason);
        self.fire(trigger)
    }

    fn execute(&mut self) -> Result<()> {
        let run = self.sandbox.execute(&self.unit.path, self.config.timeout)?;
        self.report.executions += 1;

        let error = if run.timed_out {
            Some(ErrorKind::Timeout)
        } else if run.has_error_output() {
            Some(ErrorKind::Runtime)
        } else {
            None
        };
        (self.on_event)(&LoopEvent::Executed {
            stdout: run.stdout,
            stderr: run.stderr.clone(),
            error,
        });

        if error.is_some() {
            self.pending_error = Some(run.stderr);
            self.fire(Trigger::ErrorOutput)
        } else {
            self.fire(Trigger::CleanRun)
        }
    }

    fn repair(&mut self) -> Result<()> {
        let error_text = self
            .pending_error
            .take()
            .ok_or_else(|| anyhow!("repairing without error text"))?;

        if let Some(max) = self.config.max_attempts
            && self.report.patches_applied >= max
        {
            return self.fail(
                Trigger::AttemptsExhausted,
                FailureReason::AttemptsExhausted { attempts: max },
            );
        }

        let original_content = match read_script(&self.unit.path) {
            Ok(content) => content,
            Err(err) => {
                return self.fail(
                    Trigger::SourceUnreadable,
                    FailureReason::Persistence {
                        message: format!("{err:#}"),
                    },
                );
            }
        };

        self.report.repair_rounds += 1;
        let round = self.report.repair_rounds;
        (self.on_event)(&LoopEvent::RepairRequested {
            round,
            error_text: error_text.clone(),
        });

        let request = RepairRequest {
            script_path: self.unit.path.clone(),
            language: self.language.clone(),
            error_text,
            original_content,
        };
        let reply = match self.oracle.repair(&request) {
            Ok(reply) => reply,
            Err(err) => {
                return self.fail(
                    Trigger::OracleFailed,
                    FailureReason::OracleCommunication {
                        message: err.to_string(),
                    },
                );
            }
        };

        let parsed = parse_response(&reply, &self.fence_tags);
        let malformed = parsed.malformed_reason().map(str::to_string);
        let Some(patch) = parsed.into_patch() else {
            let reason = malformed.unwrap_or_else(|| "no code found".to_string());
            debug!(reply = %reply, "unusable oracle reply");
            return self.fail(
                Trigger::NoPatch,
                FailureReason::PatchExtraction {
                    message: format!("{reason}; reply began with: {}", excerpt(&reply)),
                },
            );
        };

        (self.on_event)(&LoopEvent::PatchExtracted {
            round,
            bytes: patch.len(),
        });
        self.attempt = Some(RepairAttempt {
            error_text: request.error_text,
            original_content: request.original_content,
            patched_content: Some(patch),
        });
        self.fire(Trigger::PatchExtracted)
    }

    fn update(&mut self) -> Result<()> {
        let attempt = self
            .attempt
            .take()
            .ok_or_else(|| anyhow!("updating without a repair attempt"))?;
        let patch = attempt
            .patched_content
            .as_deref()
            .ok_or_else(|| anyhow!("updating without a patch"))?;

        match self.unit.backup.ensure(&attempt.original_content) {
            Ok(BackupStatus::Created) => {
                self.report.backup_created = true;
                (self.on_event)(&LoopEvent::BackupCreated {
                    path: self.unit.backup_path().to_path_buf(),
                });
            }
            Ok(BackupStatus::AlreadyPresent) => {
                (self.on_event)(&LoopEvent::BackupRetained {
                    path: self.unit.backup_path().to_path_buf(),
                });
            }
            Err(err) => {
                return self.fail(
                    Trigger::PersistFailed,
                    FailureReason::Persistence {
                        message: format!("{err:#}"),
                    },
                );
            }
        }

        if let Err(err) = write_script(&self.unit.path, patch) {
            return self.fail(
                Trigger::PersistFailed,
                FailureReason::Persistence {
                    message: format!("{err:#}"),
                },
            );
        }
        self.report.patches_applied += 1;
        (self.on_event)(&LoopEvent::ScriptUpdated {
            path: self.unit.path.clone(),
            bytes: patch.len(),
        });

        if !self.config.update_pause.is_zero() {
            debug!(
                pause_ms = self.config.update_pause.as_millis() as u64,
                "pausing before re-run"
            );
            thread::sleep(self.config.update_pause);
        }
        self.fire(Trigger::Persisted)
    }
}

fn excerpt(reply: &str) -> String {
    let trimmed = reply.trim();
    if trimmed.len() <= REPLY_EXCERPT_BYTES {
        return format!("{trimmed:?}");
    }
    let mut end = REPLY_EXCERPT_BYTES;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{:?}...", &trimmed[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::backup::backup_path;
    use crate::io::oracle::OracleError;
    use crate::test_support::{
        FACTORIAL_FIXED, FACTORIAL_TYPO, OracleReply, ScriptedOracle, ScriptedSandbox,
        fenced_python, python_errors_on, quick_config,
    };
    use std::fs;

    fn write_script_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).expect("write script");
        path
    }

    #[test]
    fn clean_script_succeeds_after_one_run_without_writes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = write_script_file(temp.path(), "ok.py", "print('fine')\n");
        let sandbox = ScriptedSandbox::new(python_errors_on("raise"));
        let oracle = ScriptedOracle::new(Vec::new());

        let report =
            repair_script(&script, &sandbox, &oracle, &quick_config(), |_| {}).expect("loop");

        assert_eq!(report.final_state, UnitState::Succeeded);
        assert_eq!(report.executions, 1);
        assert_eq!(report.repair_rounds, 0);
        assert_eq!(
            report.transitions,
            vec![
                (UnitState::Ready, UnitState::Running),
                (UnitState::Running, UnitState::Succeeded)
            ]
        );
        assert_eq!(oracle.calls(), 0);
        assert_eq!(fs::read_to_string(&script).expect("read"), "print('fine')\n");
        assert!(!backup_path(&script, ".backup").exists());
    }

    #[test]
    fn name_error_is_fixed_by_one_patch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = write_script_file(temp.path(), "target_script.py", FACTORIAL_TYPO);
        let sandbox = ScriptedSandbox::new(python_errors_on("calculate_factrial"));
        let oracle = ScriptedOracle::new(vec![OracleReply::Text(format!(
            "<think>\nThe function name is misspelled.\n</think>\n{}",
            fenced_python(FACTORIAL_FIXED)
        ))]);
        let mut events = Vec::new();

        let report = repair_script(&script, &sandbox, &oracle, &quick_config(), |e| {
            events.push(e.clone());
        })
        .expect("loop");

        assert_eq!(report.final_state, UnitState::Succeeded);
        assert_eq!(report.executions, 2);
        assert_eq!(report.patches_applied, 1);
        assert!(report.backup_created);

        let current = fs::read_to_string(&script).expect("read script");
        assert!(current.contains("calculate_factorial(number)"));
        assert!(!current.contains("calculate_factrial"));
        let backup = fs::read_to_string(backup_path(&script, ".backup")).expect("read backup");
        assert_eq!(backup, FACTORIAL_TYPO);

        let requests = oracle.requests();
        let request = &requests[0];
        assert!(request.error_text.contains("NameError"));
        assert_eq!(request.original_content, FACTORIAL_TYPO);
        assert_eq!(request.language, "python");

        assert!(events.contains(&LoopEvent::BackupCreated {
            path: backup_path(&script, ".backup")
        }));
        assert!(matches!(
            events.last(),
            Some(LoopEvent::Finished {
                state: UnitState::Succeeded,
                reason: None
            })
        ));
    }

    #[test]
    fn backup_keeps_generation_zero_across_rounds() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = write_script_file(temp.path(), "tool.py", "raise 0\n");
        let sandbox = ScriptedSandbox::new(python_errors_on("raise"));
        let oracle = ScriptedOracle::new(vec![
            OracleReply::Text(fenced_python("raise 1\n")),
            OracleReply::Text(fenced_python("raise 2\n")),
            OracleReply::Text(fenced_python("print('done')\n")),
        ]);

        let report =
            repair_script(&script, &sandbox, &oracle, &quick_config(), |_| {}).expect("loop");

        assert_eq!(report.final_state, UnitState::Succeeded);
        assert_eq!(report.patches_applied, 3);
        assert_eq!(report.executions, 4);
        let backup = fs::read_to_string(backup_path(&script, ".backup")).expect("backup");
        assert_eq!(backup, "raise 0\n");
        assert_eq!(fs::read_to_string(&script).expect("read"), "print('done')\n");

        let requests = oracle.requests();
        let originals: Vec<&str> = requests
            .iter()
            .map(|r| r.original_content.as_str())
            .collect();
        assert_eq!(originals, vec!["raise 0\n", "raise 1\n", "raise 2\n"]);
    }

    #[test]
    fn oracle_failure_fails_without_touching_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = write_script_file(temp.path(), "tool.py", "raise 0\n");
        let sandbox = ScriptedSandbox::new(python_errors_on("raise"));
        let oracle = ScriptedOracle::new(vec![OracleReply::Error(OracleError::InvalidResponse(
            "connection reset".to_string(),
        ))]);

        let report =
            repair_script(&script, &sandbox, &oracle, &quick_config(), |_| {}).expect("loop");

        assert_eq!(report.final_state, UnitState::Failed);
        assert!(matches!(
            report.reason,
            Some(FailureReason::OracleCommunication { .. })
        ));
        assert_eq!(
            report.transitions.last(),
            Some(&(UnitState::Repairing, UnitState::Failed))
        );
        assert_eq!(fs::read_to_string(&script).expect("read"), "raise 0\n");
        assert!(!backup_path(&script, ".backup").exists());
    }

    #[test]
    fn unterminated_fence_fails_without_touching_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = write_script_file(temp.path(), "tool.py", "raise 0\n");
        let sandbox = ScriptedSandbox::new(python_errors_on("raise"));
        let oracle = ScriptedOracle::new(vec![OracleReply::Text(
            "```python\nprint('half of the fi".to_string(),
        )]);

        let report =
            repair_script(&script, &sandbox, &oracle, &quick_config(), |_| {}).expect("loop");

        assert_eq!(report.final_state, UnitState::Failed);
        let Some(FailureReason::PatchExtraction { message }) = &report.reason else {
            panic!("expected extraction failure, got {:?}", report.reason);
        };
        assert!(message.contains("never closed"));
        assert_eq!(report.patches_applied, 0);
        assert_eq!(fs::read_to_string(&script).expect("read"), "raise 0\n");
        assert!(!backup_path(&script, ".backup").exists());
    }

    #[test]
    fn identical_patches_keep_the_loop_cycling() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = write_script_file(temp.path(), "tool.py", "raise 0\n");
        let sandbox = ScriptedSandbox::new(python_errors_on("raise"));
        let rounds = 25;
        // Same unfixed script every time; the oracle only stops when its script runs dry.
        let oracle = ScriptedOracle::new(
            (0..rounds)
                .map(|_| OracleReply::Text(fenced_python("raise 0\n")))
                .collect(),
        );

        let report =
            repair_script(&script, &sandbox, &oracle, &quick_config(), |_| {}).expect("loop");

        assert_eq!(report.patches_applied, rounds);
        assert_eq!(report.repair_rounds, rounds + 1);
        assert_eq!(report.executions, rounds + 1);
        assert_eq!(report.final_state, UnitState::Failed);
        assert!(matches!(
            report.reason,
            Some(FailureReason::OracleCommunication { .. })
        ));
        let cycles = report
            .transitions
            .iter()
            .filter(|t| **t == (UnitState::Updating, UnitState::Running))
            .count();
        assert_eq!(cycles, rounds as usize);
    }

    #[test]
    fn update_pause_separates_patch_and_rerun() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = write_script_file(temp.path(), "tool.py", "raise 0\n");
        let runs = std::cell::RefCell::new(Vec::new());
        let errors = python_errors_on("raise");
        let sandbox = ScriptedSandbox::new(|content: &str| {
            runs.borrow_mut().push(std::time::Instant::now());
            errors(content)
        });
        let oracle = ScriptedOracle::new(vec![OracleReply::Text(fenced_python("print(1)\n"))]);
        let pause = Duration::from_millis(200);
        let config = LoopConfig {
            update_pause: pause,
            ..quick_config()
        };
        let mut updated_at = None;

        let report = repair_script(&script, &sandbox, &oracle, &config, |e| {
            if matches!(e, LoopEvent::ScriptUpdated { .. }) {
                updated_at = Some(std::time::Instant::now());
            }
        })
        .expect("loop");

        assert!(report.succeeded());
        let runs = runs.borrow().clone();
        assert_eq!(runs.len(), 2);
        let updated_at = updated_at.expect("script updated");
        assert!(runs[1] - updated_at >= pause);
        assert!(runs[1] - runs[0] >= pause);
    }

    #[test]
    fn max_attempts_bounds_the_loop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = write_script_file(temp.path(), "tool.py", "raise 0\n");
        let sandbox = ScriptedSandbox::new(python_errors_on("raise"));
        let oracle = ScriptedOracle::new(
            (0..10)
                .map(|_| OracleReply::Text(fenced_python("raise 0\n")))
                .collect(),
        );
        let config = LoopConfig {
            max_attempts: Some(2),
            ..quick_config()
        };

        let report = repair_script(&script, &sandbox, &oracle, &config, |_| {}).expect("loop");

        assert_eq!(report.final_state, UnitState::Failed);
        assert_eq!(
            report.reason,
            Some(FailureReason::AttemptsExhausted { attempts: 2 })
        );
        assert_eq!(report.patches_applied, 2);
        assert_eq!(report.executions, 3);
        assert_eq!(oracle.calls(), 2);
    }

    #[test]
    fn timeout_is_sent_to_the_oracle_as_error_text() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = write_script_file(temp.path(), "loop.py", "while True: pass\n");
        let sandbox = ScriptedSandbox::new(|content: &str| {
            if content.contains("while True") {
                crate::test_support::timed_out(Duration::from_secs(10))
            } else {
                crate::test_support::clean("")
            }
        });
        let oracle = ScriptedOracle::new(vec![OracleReply::Text(fenced_python("print(1)\n"))]);
        let mut kinds = Vec::new();

        let report = repair_script(&script, &sandbox, &oracle, &quick_config(), |e| {
            if let LoopEvent::Executed { error, .. } = e {
                kinds.push(*error);
            }
        })
        .expect("loop");

        assert_eq!(report.final_state, UnitState::Succeeded);
        assert_eq!(kinds, vec![Some(ErrorKind::Timeout), None]);
        assert!(oracle.requests()[0].error_text.contains("execution timed out"));
    }

    #[test]
    fn existing_backup_is_retained() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = write_script_file(temp.path(), "tool.py", "raise 1\n");
        fs::write(backup_path(&script, ".backup"), "raise 0\n").expect("old backup");
        let sandbox = ScriptedSandbox::new(python_errors_on("raise"));
        let oracle = ScriptedOracle::new(vec![OracleReply::Text(fenced_python("print(1)\n"))]);
        let mut retained = false;

        let report = repair_script(&script, &sandbox, &oracle, &quick_config(), |e| {
            if matches!(e, LoopEvent::BackupRetained { .. }) {
                retained = true;
            }
        })
        .expect("loop");

        assert!(report.succeeded());
        assert!(retained);
        assert!(!report.backup_created);
        assert_eq!(
            fs::read_to_string(backup_path(&script, ".backup")).expect("backup"),
            "raise 0\n"
        );
    }

    #[test]
    fn unwritable_backup_location_fails_before_patching() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = write_script_file(temp.path(), "tool.py", "raise 0\n");
        let sandbox = ScriptedSandbox::new(python_errors_on("raise"));
        let oracle = ScriptedOracle::new(vec![OracleReply::Text(fenced_python("print(1)\n"))]);
        let config = LoopConfig {
            backup_suffix: ".d/backup".to_string(),
            ..quick_config()
        };

        let report = repair_script(&script, &sandbox, &oracle, &config, |_| {}).expect("loop");

        assert_eq!(report.final_state, UnitState::Failed);
        assert!(matches!(
            report.reason,
            Some(FailureReason::Persistence { .. })
        ));
        assert_eq!(
            report.transitions.last(),
            Some(&(UnitState::Updating, UnitState::Failed))
        );
        assert_eq!(fs::read_to_string(&script).expect("read"), "raise 0\n");
    }

    #[test]
    fn launch_failure_is_returned_as_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = temp.path().join("missing.py");
        let sandbox = ScriptedSandbox::new(python_errors_on("raise"));
        let oracle = ScriptedOracle::new(Vec::new());

        let err = repair_script(&script, &sandbox, &oracle, &quick_config(), |_| {}).unwrap_err();
        assert!(
            err.downcast_ref::<crate::io::sandbox::LaunchError>()
                .is_some()
        );
    }

    #[test]
    fn excerpt_is_bounded() {
        let long = "x".repeat(REPLY_EXCERPT_BYTES * 2);
        let cut = excerpt(&long);
        assert!(cut.len() < REPLY_EXCERPT_BYTES + 10);
        assert!(cut.ends_with("..."));
    }
}
