//! Test-only sandboxes, oracles and fixtures for driving the repair loop.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;

use crate::io::oracle::{OracleError, RepairOracle, RepairRequest};
use crate::io::sandbox::{Execution, LaunchError, Sandbox, timeout_message};
use crate::repair_loop::LoopConfig;

/// Script with the `calculate_factrial` typo from the classic demo.
pub const FACTORIAL_TYPO: &str = r#"def calculate_factorial(n):
    if n < 0:
        raise ValueError("Factorial is not defined for negative numbers.")
    elif n == 0 or n == 1:
        return 1
    else:
        return n * calculate_factorial(n - 1)

def main():
    number = 5
    print(f"The factorial of {number} is {calculate_factrial(number)}")

if __name__ == "__main__":
    main()
"#;

/// [`FACTORIAL_TYPO`] with the call corrected.
pub const FACTORIAL_FIXED: &str = r#"def calculate_factorial(n):
    if n < 0:
        raise ValueError("Factorial is not defined for negative numbers.")
    elif n == 0 or n == 1:
        return 1
    else:
        return n * calculate_factorial(n - 1)

def main():
    number = 5
    print(f"The factorial of {number} is {calculate_factorial(number)}")

if __name__ == "__main__":
    main()
"#;

/// Loop config with no pause between rounds.
pub fn quick_config() -> LoopConfig {
    LoopConfig {
        update_pause: Duration::ZERO,
        ..LoopConfig::default()
    }
}

/// Wrap `code` the way a well-behaved oracle would.
pub fn fenced_python(code: &str) -> String {
    format!("Here is the corrected code:\n\n```python\n{code}```\n")
}

pub fn clean(stdout: &str) -> Execution {
    Execution {
        stdout: stdout.to_string(),
        stderr: String::new(),
        timed_out: false,
        exit_code: Some(0),
    }
}

pub fn failed(stderr: &str) -> Execution {
    Execution {
        stdout: String::new(),
        stderr: stderr.to_string(),
        timed_out: false,
        exit_code: Some(1),
    }
}

pub fn timed_out(timeout: Duration) -> Execution {
    Execution {
        stdout: String::new(),
        stderr: timeout_message(timeout),
        timed_out: true,
        exit_code: None,
    }
}

/// Behaves like a Python run that fails with a `NameError`-style traceback
/// whenever the script contains `marker`.
pub fn python_errors_on(marker: &'static str) -> impl Fn(&str) -> Execution {
    move |content: &str| {
        if content.contains(marker) {
            failed(&format!(
                "Traceback (most recent call last):\n  File \"script.py\", line 1, in <module>\nNameError: name '{marker}' is not defined\n"
            ))
        } else {
            clean("ok\n")
        }
    }
}

/// Sandbox that answers from the script's current content instead of running it.
///
/// A missing script is a launch failure, as with the process sandbox.
pub struct ScriptedSandbox<F> {
    respond: F,
    runs: RefCell<Vec<String>>,
}

impl<F: Fn(&str) -> Execution> ScriptedSandbox<F> {
    pub fn new(respond: F) -> Self {
        Self {
            respond,
            runs: RefCell::new(Vec::new()),
        }
    }

    /// Script content seen by each execution, in order.
    pub fn runs(&self) -> Vec<String> {
        self.runs.borrow().clone()
    }
}

impl<F: Fn(&str) -> Execution> Sandbox for ScriptedSandbox<F> {
    fn execute(&self, script: &Path, _timeout: Duration) -> Result<Execution> {
        let content = fs::read_to_string(script).map_err(|err| LaunchError {
            path: script.to_path_buf(),
            reason: err.to_string(),
        })?;
        let execution = (self.respond)(&content);
        self.runs.borrow_mut().push(content);
        Ok(execution)
    }
}

/// One queued oracle answer.
pub enum OracleReply {
    Text(String),
    Error(OracleError),
}

/// Oracle that replays queued answers and records every request.
///
/// Once the queue is empty every call fails like an unreachable server.
pub struct ScriptedOracle {
    replies: RefCell<VecDeque<OracleReply>>,
    requests: RefCell<Vec<RepairRequest>>,
}

impl ScriptedOracle {
    pub fn new(replies: Vec<OracleReply>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn requests(&self) -> Vec<RepairRequest> {
        self.requests.borrow().clone()
    }
}

impl RepairOracle for ScriptedOracle {
    fn repair(&self, request: &RepairRequest) -> Result<String, OracleError> {
        self.requests.borrow_mut().push(request.clone());
        match self.replies.borrow_mut().pop_front() {
            Some(OracleReply::Text(text)) => Ok(text),
            Some(OracleReply::Error(err)) => Err(err),
            None => Err(OracleError::InvalidResponse(
                "scripted oracle has no more replies".to_string(),
            )),
        }
    }
}

/// Temporary directory holding scripts for a test.
pub struct ScriptDir {
    dir: tempfile::TempDir,
}

impl ScriptDir {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `content` to `name` inside the directory and return its path.
    pub fn script(&self, name: &str, content: &str) -> Result<std::path::PathBuf> {
        let path = self.dir.path().join(name);
        fs::write(&path, content)?;
        Ok(path)
    }
}
