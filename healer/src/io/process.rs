//! Child process execution with a wall-clock timeout and bounded capture.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

const READ_CHUNK_BYTES: usize = 8192;

/// How long output is still collected once the process is gone. Descendants
/// that escaped the kill can hold the pipes open; past this they are ignored.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Bytes kept from one output stream, plus how many were dropped past the limit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capture {
    pub bytes: Vec<u8>,
    pub dropped: usize,
}

impl Capture {
    /// Lossy UTF-8 text, with a trailing marker when bytes were dropped.
    pub fn text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.dropped > 0 {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&format!("[output truncated: {} more bytes]\n", self.dropped));
        }
        text
    }

    fn push(&mut self, chunk: &[u8], limit: usize) {
        let keep = chunk.len().min(limit.saturating_sub(self.bytes.len()));
        self.bytes.extend_from_slice(&chunk[..keep]);
        self.dropped += chunk.len() - keep;
    }
}

/// How a child process ended.
#[derive(Debug)]
pub struct ProcessOutput {
    /// `None` when the child was killed for running past its timeout.
    pub status: Option<ExitStatus>,
    pub stdout: Capture,
    pub stderr: Capture,
}

impl ProcessOutput {
    pub fn timed_out(&self) -> bool {
        self.status.is_none()
    }
}

/// Run `cmd` to completion or until `timeout`, whichever comes first.
///
/// The child gets a null stdin and both output pipes are drained on their own
/// threads, keeping at most `limit` bytes of each. On Unix the child leads its
/// own process group, and at the deadline the whole group is killed, so
/// processes the script started go with it. What was printed until then is
/// returned.
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64, limit))]
pub fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    limit: usize,
) -> Result<ProcessOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = StreamReader::spawn(
        child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?,
        limit,
    );
    let stderr = StreamReader::spawn(
        child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?,
        limit,
    );

    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => Some(status),
        None => {
            warn!("command still running at deadline, killing");
            kill_process_tree(&mut child)?;
            child.wait().context("reap killed command")?;
            None
        }
    };

    let drain_until = Instant::now() + DRAIN_GRACE;
    let output = ProcessOutput {
        status,
        stdout: stdout.finish(drain_until).context("collect stdout")?,
        stderr: stderr.finish(drain_until).context("collect stderr")?,
    };
    if output.stdout.dropped > 0 || output.stderr.dropped > 0 {
        warn!(
            stdout_dropped = output.stdout.dropped,
            stderr_dropped = output.stderr.dropped,
            "output over limit"
        );
    }
    debug!(
        exit_code = ?output.status.and_then(|s| s.code()),
        timed_out = output.timed_out(),
        "command finished"
    );
    Ok(output)
}

#[cfg(unix)]
fn kill_process_tree(child: &mut Child) -> Result<()> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = i32::try_from(child.id()).context("child pid out of range")?;
    if let Err(err) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        warn!(%err, "killing process group failed, killing child only");
        child.kill().context("kill command")?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn kill_process_tree(child: &mut Child) -> Result<()> {
    child.kill().context("kill command")
}

/// One output pipe drained on a background thread into a shared [`Capture`].
struct StreamReader {
    captured: Arc<Mutex<Capture>>,
    done: Receiver<Result<()>>,
}

impl StreamReader {
    fn spawn<R: Read + Send + 'static>(mut reader: R, limit: usize) -> Self {
        let captured = Arc::new(Mutex::new(Capture::default()));
        let sink = Arc::clone(&captured);
        let (tx, done) = mpsc::channel();
        thread::spawn(move || {
            let mut chunk = [0u8; READ_CHUNK_BYTES];
            let result = loop {
                match reader.read(&mut chunk) {
                    Ok(0) => break Ok(()),
                    Ok(n) => lock(&sink).push(&chunk[..n], limit),
                    Err(err) => break Err(anyhow::Error::new(err).context("read output")),
                }
            };
            // The receiver is gone when the caller stopped waiting.
            let _ = tx.send(result);
        });
        Self { captured, done }
    }

    /// Wait for end of stream until `deadline`, then return what was read.
    ///
    /// A pipe still held open by a stray descendant is abandoned, with its
    /// reader thread left to exit on its own.
    fn finish(self, deadline: Instant) -> Result<Capture> {
        let wait = deadline.saturating_duration_since(Instant::now());
        match self.done.recv_timeout(wait) {
            Ok(result) => result?,
            Err(RecvTimeoutError::Timeout) => {
                warn!("output pipe still open after the process ended, keeping what was read");
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(anyhow!("output reader thread panicked"));
            }
        }
        Ok(std::mem::take(&mut *lock(&self.captured)))
    }
}

fn lock(capture: &Mutex<Capture>) -> std::sync::MutexGuard<'_, Capture> {
    capture.lock().unwrap_or_else(PoisonError::into_inner)
}
