use std::time::Duration;

use colored::*;
use scanai_core::pipeline::{TargetRun, TargetStatus};

use crate::terminal::colors;

pub fn status_to_colored(status: &TargetStatus) -> ColoredString {
    let color = match status {
        TargetStatus::Completed => colors::STATUS_OK,
        TargetStatus::SkippedInvalidTarget
        | TargetStatus::SkippedNoCommands
        | TargetStatus::SkippedNoPorts => colors::STATUS_SKIPPED,
        TargetStatus::Failed(_) => colors::STATUS_FAILED,
    };
    status.to_string().color(color)
}

pub fn seconds(duration: Duration) -> String {
    format!("{:.1}s", duration.as_secs_f64())
}

pub fn run_duration(run: &TargetRun) -> String {
    run.elapsed()
        .and_then(|d| d.to_std().ok())
        .map(seconds)
        .unwrap_or_else(|| "-".to_string())
}

/// Key/value rows shown under a finished target.
pub fn run_to_details(run: &TargetRun) -> Vec<(String, ColoredString)> {
    let mut details = vec![(
        "Status".to_string(),
        status_to_colored(&run.status),
    )];

    if !run.status.is_success() {
        details.push(("Phase".to_string(), run.phase.to_string().normal()));
    }

    if !run.ports.is_empty() {
        details.push(("Ports".to_string(), run.ports.to_string().color(colors::PORTS)));
    }

    if !run.failures.is_empty() {
        let failed = format!("{} command(s)", run.failures.len());
        details.push(("Failed".to_string(), failed.color(colors::STATUS_FAILED)));
    }

    if let Some(dir) = &run.artifact_dir {
        details.push(("Output".to_string(), dir.display().to_string().normal()));
    }

    details.push(("Time".to_string(), run_duration(run).normal()));
    details
}
