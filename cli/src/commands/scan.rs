use std::process::ExitCode;
use std::sync::Arc;

use colored::*;
use scanai_common::config::Config;
use scanai_common::success;
use scanai_core::orchestrator::{Orchestrator, RunReport};
use scanai_core::pipeline::TargetRun;
use scanai_core::reasoning::{ReasoningAnalyzer, ReasoningClient, ReasoningPlanner};
use scanai_core::runner::ProcessRunner;
use scanai_core::tunnel::TunnelManager;
use tracing::warn;

use crate::mprint;
use crate::signal::shutdown_signal;
use crate::terminal::{colors, format, print, spinner};

pub const INTERRUPTED: u8 = 130;

/// Runs every target through the orchestrator, tunneled when `cfg` says so.
pub async fn scan(targets: Vec<String>, cfg: Config, q_level: u8) -> anyhow::Result<ExitCode> {
    print_run_header(&targets, &cfg, q_level);

    if cfg.reasoning.api_key.is_none() {
        warn!("CLAUDE_API_KEY is not set, no scan plans can be generated");
    }

    let cfg = Arc::new(cfg);
    let client = ReasoningClient::new(cfg.reasoning.clone())?;
    let runner = Arc::new(ProcessRunner::new(cfg.command_timeout));
    let planner = Arc::new(ReasoningPlanner::new(client.clone()));
    let analyzer = Arc::new(ReasoningAnalyzer::new(client));

    let mut orchestrator = Orchestrator::new(Arc::clone(&cfg), runner, planner, analyzer)
        .with_progress(|run, finished, total| {
            target_finished(run, finished);
            spinner::report_progress(finished, total);
        });
    if let Some(tunnel) = cfg.mode.tunnel() {
        orchestrator = orchestrator.with_tunnel(Box::new(TunnelManager::new(tunnel.clone())));
    }

    spinner::report_progress(0, targets.len());
    let report = orchestrator.run(targets, shutdown_signal()).await;
    spinner::console().clear_status();
    let report = report?;

    scan_ends(&report, q_level);

    Ok(if report.interrupted {
        ExitCode::from(INTERRUPTED)
    } else {
        ExitCode::SUCCESS
    })
}

fn print_run_header(targets: &[String], cfg: &Config, q_level: u8) {
    print::header("scan configuration", q_level);
    if q_level > 0 {
        return;
    }

    print::aligned_line("Targets", targets.len().to_string());
    for target in targets {
        print::print_status(format!("  {}", target.color(colors::SUBNET)));
    }
    print::aligned_line("Output", cfg.output_dir.display().to_string());
    print::aligned_line("Timeout", format::seconds(cfg.command_timeout));
    if let Some(tunnel) = cfg.mode.tunnel() {
        print::aligned_line("SSH", tunnel.endpoint());
        print::aligned_line("SOCKS", format!("127.0.0.1:{}", tunnel.local_port));
    }
    mprint!();
}

fn target_finished(run: &TargetRun, idx: usize) {
    print::tree_head(idx, &run.target);
    print::as_tree_one_level(format::run_to_details(run));
    for failure in &run.failures {
        print::print_status(format!(
            "  {} {}",
            failure.command.color(colors::TEXT_DEFAULT),
            format!("({})", failure.reason).color(colors::STATUS_FAILED)
        ));
    }
}

fn scan_ends(report: &RunReport, q_level: u8) {
    let total = report.runs.len();
    let succeeded: ColoredString = format!("{}/{total} targets", report.succeeded()).bold().green();
    let elapsed: ColoredString = format::seconds(report.elapsed).bold().yellow();
    let output: String = format!("Scan Complete: {succeeded} finished cleanly in {elapsed}");

    if report.interrupted {
        warn!("Run was interrupted, remaining targets were cancelled");
    }
    if report.tunnel_verified == Some(false) {
        warn!("Tunnel was never verified, results may be incomplete");
    }

    match q_level {
        0 => {
            print::fat_separator();
            print::centerln(&output);
            print::end_of_program();
        }
        _ => success!("{}", output),
    }
}
