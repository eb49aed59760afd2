//! Deadline and cooperative cancellation for blocking calls.
//!
//! [`call_with_deadline`] runs a blocking closure on a worker thread and waits
//! for it in short slices, giving up when the deadline passes or the
//! [`CancelToken`] fires. A call that is given up on keeps running on its
//! detached thread until it returns; its result is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::warn;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shared flag asking in-flight calls to stop waiting.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The run was interrupted before all work was done.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("interrupted")]
pub struct Interrupted;

/// Why a call did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallAborted {
    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
    #[error("call cancelled")]
    Cancelled,
    #[error("call panicked")]
    Panicked,
}

/// Run `call` to completion unless `deadline` elapses or `cancel` fires first.
///
/// `deadline = None` waits as long as the call takes (cancellation still applies).
pub fn call_with_deadline<T, F>(
    deadline: Option<Duration>,
    cancel: &CancelToken,
    call: F,
) -> Result<T, CallAborted>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(CallAborted::Cancelled);
    }

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone when the caller gave up; nothing left to do.
        let _ = tx.send(call());
    });

    let started = Instant::now();
    loop {
        let wait = match deadline {
            Some(limit) => {
                let Some(remaining) = limit.checked_sub(started.elapsed()) else {
                    warn!(deadline_ms = limit.as_millis() as u64, "call deadline exceeded");
                    return Err(CallAborted::DeadlineExceeded(limit));
                };
                remaining.min(POLL_INTERVAL)
            }
            None => POLL_INTERVAL,
        };

        match rx.recv_timeout(wait) {
            Ok(value) => return Ok(value),
            Err(RecvTimeoutError::Disconnected) => return Err(CallAborted::Panicked),
            Err(RecvTimeoutError::Timeout) => {
                if cancel.is_cancelled() {
                    warn!("call cancelled while in flight");
                    return Err(CallAborted::Cancelled);
                }
            }
        }
    }
}
