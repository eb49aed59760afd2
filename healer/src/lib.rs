//! Self-healing script runner.
//!
//! A script is executed; when the run writes error text, the text and the
//! current source go to a repair oracle, the corrected source is extracted from
//! its reply, the pristine original is backed up once, and the fix is written
//! in place and executed again.
//!
//! - **[`core`]**: Pure, deterministic logic (unit states, transition table,
//!   oracle reply parsing). No I/O.
//! - **[`io`]**: Side-effecting adapters (process execution, oracle client,
//!   backup, script files, config, discovery).
//!
//! [`repair_loop`] drives one script through the state machine and [`batch`]
//! runs an ordered list of them.

pub mod batch;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod repair_loop;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
