//! The per-target state machine.
//!
//! One [`TargetPipeline::run`] call drives one target through
//! Validate → Plan → Discover → Extract → Rescan → Summarize → Persist.
//! Phases are strictly sequential. Every error is turned into a terminal
//! [`TargetStatus`] on the returned [`TargetRun`]; nothing propagates out.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Local};
use scanai_common::config::Config;
use scanai_common::network::target::Target;
use scanai_common::success;
use thiserror::Error;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::extractor::{PortSet, extract_open_ports, service_command};
use crate::parser::{ScanDocument, parse_artifacts};
use crate::reasoning::{Analyzer, Planner};
use crate::runner::{ArtifactSet, CommandResult, CommandRunner, ProxyRoute, ScanCommand};

pub const RESULTS_FILE: &str = "summary.json";
pub const ANALYSIS_FILE: &str = "analysis.txt";
const SERVICE_SCAN_STEM: &str = "service_scan";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Validate,
    Plan,
    Discover,
    Extract,
    Rescan,
    Summarize,
    Persist,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Validate => "validate",
            Phase::Plan => "plan",
            Phase::Discover => "discover",
            Phase::Extract => "extract",
            Phase::Rescan => "rescan",
            Phase::Summarize => "summarize",
            Phase::Persist => "persist",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetStatus {
    Completed,
    SkippedInvalidTarget,
    SkippedNoCommands,
    /// Nothing open. A clean finish, not an error.
    SkippedNoPorts,
    Failed(String),
}

impl TargetStatus {
    /// Everything except `Failed` counts as a normal finish.
    pub fn is_success(&self) -> bool {
        !matches!(self, TargetStatus::Failed(_))
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetStatus::Completed => f.write_str("completed"),
            TargetStatus::SkippedInvalidTarget => f.write_str("skipped (invalid target)"),
            TargetStatus::SkippedNoCommands => f.write_str("skipped (no commands generated)"),
            TargetStatus::SkippedNoPorts => f.write_str("skipped (no open ports)"),
            TargetStatus::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// A command that failed, timed out, or was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub command: String,
    pub reason: String,
}

/// Execution record of one target. Owned by its pipeline until returned.
#[derive(Debug, Clone)]
pub struct TargetRun {
    pub target: String,
    /// Last phase entered.
    pub phase: Phase,
    pub ports: PortSet,
    pub summary: Option<String>,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
    pub status: TargetStatus,
    /// Set once the target's output directory exists.
    pub artifact_dir: Option<PathBuf>,
    pub failures: Vec<CommandFailure>,
    pub documents: Vec<ScanDocument>,
    pub commands_run: usize,
}

impl TargetRun {
    fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            phase: Phase::Validate,
            ports: PortSet::new(),
            summary: None,
            started_at: Local::now(),
            finished_at: None,
            status: TargetStatus::Failed("did not reach a terminal state".to_string()),
            artifact_dir: None,
            failures: Vec::new(),
            documents: Vec::new(),
            commands_run: 0,
        }
    }

    /// Record for a pipeline that never returned one (panicked or cancelled).
    pub fn aborted(target: &str, reason: impl Into<String>) -> Self {
        let mut run = Self::new(target);
        run.finish(TargetStatus::Failed(reason.into()));
        run
    }

    fn finish(&mut self, status: TargetStatus) {
        if status == TargetStatus::Completed {
            self.phase = Phase::Done;
        }
        self.status = status;
        self.finished_at = Some(Local::now());
    }

    pub fn elapsed(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("error serializing results: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("error writing {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Shared by every target of one run. Holds only read-only handles.
pub struct TargetPipeline {
    config: Arc<Config>,
    runner: Arc<dyn CommandRunner>,
    planner: Arc<dyn Planner>,
    analyzer: Arc<dyn Analyzer>,
    proxy: Option<ProxyRoute>,
}

impl TargetPipeline {
    pub fn new(
        config: Arc<Config>,
        runner: Arc<dyn CommandRunner>,
        planner: Arc<dyn Planner>,
        analyzer: Arc<dyn Analyzer>,
    ) -> Self {
        Self {
            config,
            runner,
            planner,
            analyzer,
            proxy: None,
        }
    }

    /// Routes every command through `proxy`.
    pub fn with_proxy(mut self, proxy: Option<ProxyRoute>) -> Self {
        self.proxy = proxy;
        self
    }

    pub async fn run(&self, target: &str) -> TargetRun {
        let span = info_span!("target", subnet = %target);
        async {
            let mut run = TargetRun::new(target);
            let status = self.advance(&mut run).await;
            run.finish(status);
            run
        }
        .instrument(span)
        .await
    }

    async fn advance(&self, run: &mut TargetRun) -> TargetStatus {
        run.phase = Phase::Validate;
        let target = match Target::from_str(&run.target) {
            Ok(target) => target,
            Err(e) => {
                warn!("{e}");
                return TargetStatus::SkippedInvalidTarget;
            }
        };
        if let Ok(range) = target.range() {
            debug!(
                "{} address(es), {} - {}",
                range.len(),
                range.start_addr,
                range.end_addr
            );
        }

        run.phase = Phase::Plan;
        info!("Requesting scan plan");
        let plan = self.planner.plan(&target).await;
        if plan.is_empty() {
            warn!("No commands generated");
            return TargetStatus::SkippedNoCommands;
        }
        for step in &plan.steps {
            info!("Step: {step}");
        }

        let dir = self.config.output_dir.join(target.dir_name());
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            error!("Error creating {}: {e}", dir.display());
            return TargetStatus::Failed(format!("cannot create {}: {e}", dir.display()));
        }
        run.artifact_dir = Some(dir.clone());

        run.phase = Phase::Discover;
        let commands = plan.commands.iter().filter(|c| !c.trim().is_empty());
        for (i, line) in commands.enumerate() {
            let artifacts = ArtifactSet::new(&dir, &format!("scan_{i}"));
            let documents = self.discover(run, line, &artifacts).await;
            run.documents.extend(documents);
        }
        if run.documents.is_empty() {
            error!("No results obtained");
            return TargetStatus::Failed("no results obtained".to_string());
        }

        run.phase = Phase::Extract;
        run.ports = extract_open_ports(&run.documents);
        if run.ports.is_empty() {
            info!("No open ports found");
            return TargetStatus::SkippedNoPorts;
        }
        success!("Open ports: {}", run.ports);

        run.phase = Phase::Rescan;
        if let Some(command) = service_command(&target, &run.ports, &self.config.scanner) {
            info!("Service scan on {} port(s)", run.ports.len());
            let artifacts = ArtifactSet::new(&dir, SERVICE_SCAN_STEM);
            let documents = self.execute(run, &command, &artifacts).await;
            run.documents.extend(documents);
        }

        run.phase = Phase::Summarize;
        info!("Analyzing results");
        let summary = self.analyzer.analyze(&run.documents).await;

        run.phase = Phase::Persist;
        let persisted = persist(&dir, &run.documents, &summary).await;
        run.summary = Some(summary);
        match persisted {
            Ok(()) => {
                success!("Results saved to {}", dir.display());
                TargetStatus::Completed
            }
            Err(e) => {
                error!("{e}");
                TargetStatus::Failed(e.to_string())
            }
        }
    }

    /// Tokenizes and vets one planner command before running it.
    async fn discover(
        &self,
        run: &mut TargetRun,
        line: &str,
        artifacts: &ArtifactSet,
    ) -> Vec<ScanDocument> {
        if line.trim().is_empty() {
            return Vec::new();
        }
        let Some(command) = ScanCommand::parse(line) else {
            let reason = "unbalanced quotes".to_string();
            warn!("Rejected command {line}: {reason}");
            run.failures.push(CommandFailure {
                command: line.to_string(),
                reason,
            });
            return Vec::new();
        };

        if command.program != self.config.scanner {
            let reason = format!("program '{}' is not allowed", command.program);
            warn!("Rejected command {line}: {reason}");
            run.failures.push(CommandFailure {
                command: line.to_string(),
                reason,
            });
            return Vec::new();
        }

        self.execute(run, &command, artifacts).await
    }

    async fn execute(
        &self,
        run: &mut TargetRun,
        command: &ScanCommand,
        artifacts: &ArtifactSet,
    ) -> Vec<ScanDocument> {
        info!("Executing: {command}");
        run.commands_run += 1;

        let reason = match self.runner.run(command, artifacts, self.proxy.as_ref()).await {
            CommandResult::Success { artifacts } => return parse_artifacts(&artifacts).await,
            CommandResult::Failure { reason } => reason,
            CommandResult::Timeout => format!(
                "timed out after {}s",
                self.config.command_timeout.as_secs()
            ),
        };

        warn!("Command failed ({command}): {reason}");
        run.failures.push(CommandFailure {
            command: command.to_string(),
            reason,
        });
        Vec::new()
    }
}

/// Writes the accumulated documents and the analysis text into `dir`.
pub async fn persist(
    dir: &Path,
    documents: &[ScanDocument],
    summary: &str,
) -> Result<(), PersistError> {
    let results = serde_json::to_string_pretty(documents)?;
    write_file(&dir.join(RESULTS_FILE), results.as_bytes()).await?;
    write_file(&dir.join(ANALYSIS_FILE), summary.as_bytes()).await
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<(), PersistError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|source| PersistError::Write {
            path: path.to_path_buf(),
            source,
        })
}
