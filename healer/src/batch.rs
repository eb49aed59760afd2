//! Drive an ordered list of scripts through the repair loop.
//!
//! Units are processed one at a time in the order given. A unit that ends in
//! `failed` does not stop the batch; a launch failure does.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::io::cancel::Interrupted;
use crate::io::oracle::RepairOracle;
use crate::io::sandbox::Sandbox;
use crate::repair_loop::{LoopConfig, LoopEvent, UnitReport, repair_script};

/// Reports for every unit that reached a terminal state, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub reports: Vec<UnitReport>,
}

impl BatchOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.reports.iter().all(UnitReport::succeeded)
    }

    pub fn failed(&self) -> impl Iterator<Item = &UnitReport> {
        self.reports.iter().filter(|report| !report.succeeded())
    }
}

/// Run every script in `paths` to completion.
///
/// `on_event` receives each unit's events tagged with its path. A
/// [`LaunchError`](crate::io::sandbox::LaunchError) aborts the batch and is
/// returned with the offending path as context; reports of units finished so
/// far are dropped with it. Once `config.cancel` fires no further unit is
/// started and [`Interrupted`] is returned.
#[instrument(skip_all, fields(units = paths.len()))]
pub fn repair_all<S, O, F>(
    paths: &[PathBuf],
    sandbox: &S,
    oracle: &O,
    config: &LoopConfig,
    mut on_event: F,
) -> Result<BatchOutcome>
where
    S: Sandbox,
    O: RepairOracle,
    F: FnMut(&Path, &LoopEvent),
{
    let mut outcome = BatchOutcome::default();
    for path in paths {
        if config.cancel.is_cancelled() {
            warn!(
                done = outcome.reports.len(),
                remaining = paths.len() - outcome.reports.len(),
                "interrupted, skipping remaining scripts"
            );
            return Err(Interrupted.into());
        }
        let report = repair_script(path, sandbox, oracle, config, |event| {
            on_event(path, event);
        })
        .with_context(|| format!("repair {}", path.display()))?;
        outcome.reports.push(report);
    }
    info!(
        succeeded = outcome.reports.iter().filter(|r| r.succeeded()).count(),
        failed = outcome.failed().count(),
        "batch finished"
    );
    Ok(outcome)
}
