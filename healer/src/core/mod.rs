//! Deterministic, pure logic shared by the repair loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data (states, triggers, oracle reply text) and return deterministic outputs
//! suitable for tests.

pub mod machine;
pub mod response;
pub mod types;
