//! In-process stand-ins for the scanner, the reasoning service and the
//! SSH tunnel, shared by the integration tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use scanai_common::config::Config;
use scanai_common::network::target::Target;
use scanai_core::parser::ScanDocument;
use scanai_core::reasoning::{Analyzer, Planner, ScanPlan};
use scanai_core::runner::{ArtifactSet, CommandResult, CommandRunner, ProxyRoute, ScanCommand};
use scanai_core::tunnel::{ProxyTunnel, TunnelError};

/// Ordered record of what happened, across every fake.
#[derive(Default)]
pub struct Journal(Mutex<Vec<String>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

pub fn nmap_xml(ports: &[u16]) -> String {
    let ports: String = ports
        .iter()
        .map(|p| format!(r#"<port protocol="tcp" portid="{p}"><state state="open" reason="syn-ack"/></port>"#))
        .collect();
    format!(
        r#"<?xml version="1.0"?><nmaprun scanner="nmap"><host><status state="up"/><ports>{ports}</ports></host></nmaprun>"#
    )
}

#[derive(Clone)]
pub enum Behavior {
    /// Writes an XML artifact listing these ports as open.
    Open(Vec<u16>),
    Fail(&'static str),
    Timeout,
    Panic,
    /// Never finishes on its own.
    Hang,
}

#[derive(Clone, Debug)]
pub struct RunnerCall {
    pub command: String,
    pub proxy: Option<ProxyRoute>,
}

/// Picks the first rule whose needle occurs in the command line.
pub struct FakeRunner {
    rules: Vec<(String, Behavior)>,
    fallback: Behavior,
    delay: Duration,
    calls: Mutex<Vec<RunnerCall>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    journal: Option<Arc<Journal>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            fallback: Behavior::Open(Vec::new()),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            journal: None,
        }
    }

    pub fn on(mut self, needle: &str, behavior: Behavior) -> Self {
        self.rules.push((needle.to_string(), behavior));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_journal(mut self, journal: Arc<Journal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn calls(&self) -> Vec<RunnerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn behavior_for(&self, line: &str) -> Behavior {
        self.rules
            .iter()
            .find(|(needle, _)| line.contains(needle.as_str()))
            .map(|(_, behavior)| behavior.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl Default for FakeRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(
        &self,
        command: &ScanCommand,
        artifacts: &ArtifactSet,
        proxy: Option<&ProxyRoute>,
    ) -> CommandResult {
        let line = command.to_string();
        self.calls.lock().unwrap().push(RunnerCall {
            command: line.clone(),
            proxy: proxy.cloned(),
        });
        if let Some(journal) = &self.journal {
            journal.push(format!("run:{line}"));
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.behavior_for(&line) {
            Behavior::Open(ports) => {
                std::fs::write(&artifacts.xml, nmap_xml(&ports)).unwrap();
                CommandResult::Success {
                    artifacts: vec![artifacts.xml.clone()],
                }
            }
            Behavior::Fail(reason) => CommandResult::Failure {
                reason: reason.to_string(),
            },
            Behavior::Timeout => CommandResult::Timeout,
            Behavior::Panic => panic!("scanner exploded on {line}"),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                CommandResult::Timeout
            }
        }
    }
}

/// Returns a fixed plan per target; unknown targets get an empty plan.
#[derive(Default)]
pub struct FakePlanner {
    plans: HashMap<String, Vec<String>>,
    calls: AtomicUsize,
}

impl FakePlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(mut self, target: &str, commands: &[&str]) -> Self {
        self.plans.insert(
            target.to_string(),
            commands.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    /// The usual two-step plan: ping sweep, then a full port scan.
    pub fn standard(self, target: &str) -> Self {
        let sweep = format!("nmap -sn {target}");
        let ports = format!("nmap -p- --min-rate 500 {target}");
        self.plan(target, &[&sweep, &ports])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Planner for FakePlanner {
    async fn plan(&self, target: &Target) -> ScanPlan {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.plans.get(target.as_str()) {
            Some(commands) => ScanPlan {
                steps: vec!["Active host discovery".into(), "Complete port scan".into()],
                commands: commands.clone(),
            },
            None => ScanPlan::default(),
        }
    }
}

#[derive(Default)]
pub struct FakeAnalyzer {
    calls: AtomicUsize,
}

impl FakeAnalyzer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Analyzer for FakeAnalyzer {
    async fn analyze(&self, documents: &[ScanDocument]) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        format!("analysis of {} documents", documents.len())
    }
}

/// Counters for a [`FakeTunnel`], kept after the tunnel moves into the orchestrator.
#[derive(Default)]
pub struct TunnelCounters {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub verifies: AtomicUsize,
}

pub struct FakeTunnel {
    pub counters: Arc<TunnelCounters>,
    journal: Option<Arc<Journal>>,
    fail_start: bool,
    verify_ok: bool,
    fail_config: bool,
    config_path: PathBuf,
    active: bool,
}

impl FakeTunnel {
    pub fn new(config_path: PathBuf) -> Self {
        Self {
            counters: Arc::default(),
            journal: None,
            fail_start: false,
            verify_ok: true,
            fail_config: false,
            config_path,
            active: false,
        }
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_verify(mut self) -> Self {
        self.verify_ok = false;
        self
    }

    pub fn failing_config(mut self) -> Self {
        self.fail_config = true;
        self
    }

    pub fn with_journal(mut self, journal: Arc<Journal>) -> Self {
        self.journal = Some(journal);
        self
    }

    fn record(&self, entry: &str) {
        if let Some(journal) = &self.journal {
            journal.push(entry);
        }
    }
}

#[async_trait]
impl ProxyTunnel for FakeTunnel {
    async fn start(&mut self) -> Result<(), TunnelError> {
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        self.record("tunnel:start");
        if self.fail_start {
            return Err(TunnelError::ExitedEarly {
                status: "exit status: 255".into(),
                stderr: "Permission denied (publickey)".into(),
            });
        }
        self.active = true;
        Ok(())
    }

    async fn verify(&self) -> bool {
        self.counters.verifies.fetch_add(1, Ordering::SeqCst);
        self.verify_ok
    }

    fn is_active(&mut self) -> bool {
        self.active
    }

    async fn stop(&mut self) {
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
        self.record("tunnel:stop");
        self.active = false;
    }

    async fn write_proxy_config(&self) -> Result<PathBuf, TunnelError> {
        if self.fail_config {
            return Err(TunnelError::ConfigWrite {
                path: self.config_path.clone(),
                source: std::io::Error::other("read-only file system"),
            });
        }
        scanai_core::tunnel::write_proxy_config(&self.config_path, 1080).await
    }
}

pub fn config_in(dir: &std::path::Path) -> Config {
    Config {
        output_dir: dir.join("output"),
        ..Default::default()
    }
}
