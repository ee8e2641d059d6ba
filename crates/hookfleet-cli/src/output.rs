//! Status-line printing and exit codes.

use std::sync::Mutex;

use anyhow::Result;
use serde::Serialize;

use hookfleet_core::orchestrator::{LineStatus, Phase, PhaseReport, RunObserver, RunVerdict};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_NONE_SUCCEEDED: u8 = 1;
pub const EXIT_PARTIAL: u8 = 2;
pub const EXIT_INTERRUPTED: u8 = 130;

/// Prints one status line per device as each phase completes.
///
/// In JSON mode nothing is printed live; the phase reports are collected
/// and emitted once at the end.
#[derive(Debug, Default)]
pub struct StatusPrinter {
    json: bool,
    collected: Mutex<Vec<PhaseReport>>,
}

impl StatusPrinter {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            collected: Mutex::new(Vec::new()),
        }
    }

    pub fn is_json(&self) -> bool {
        self.json
    }

    /// Phase reports seen so far (JSON mode only).
    pub fn take_reports(&self) -> Vec<PhaseReport> {
        match self.collected.lock() {
            Ok(mut reports) => std::mem::take(&mut *reports),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl RunObserver for StatusPrinter {
    fn phase_started(&self, phase: Phase) {
        if !self.json {
            println!("\n{phase}...");
        }
    }

    fn phase_completed(&self, report: &PhaseReport) {
        if self.json {
            if let Ok(mut reports) = self.collected.lock() {
                reports.push(report.clone());
            }
            return;
        }
        for line in &report.lines {
            println!("{line}");
        }
    }
}

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn verdict_exit_code(verdict: &RunVerdict) -> u8 {
    match verdict {
        RunVerdict::AllSucceeded => EXIT_SUCCESS,
        RunVerdict::Partial { .. } => EXIT_PARTIAL,
        RunVerdict::NoneSucceeded => EXIT_NONE_SUCCEEDED,
    }
}

/// Exit code for a single-phase command from its per-device statuses.
pub fn phase_exit_code(statuses: &[LineStatus]) -> u8 {
    if statuses.iter().any(|s| matches!(s, LineStatus::Interrupted)) {
        return EXIT_INTERRUPTED;
    }
    let failed = statuses
        .iter()
        .filter(|s| matches!(s, LineStatus::Failed(_)))
        .count();
    if statuses.is_empty() || failed == statuses.len() {
        EXIT_NONE_SUCCEEDED
    } else if failed == 0 {
        EXIT_SUCCESS
    } else {
        EXIT_PARTIAL
    }
}
