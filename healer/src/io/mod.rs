//! I/O adapters for the repair loop.

pub mod backup;
pub mod cancel;
pub mod config;
pub mod discover;
pub mod oracle;
pub mod process;
pub mod sandbox;
pub mod script;
