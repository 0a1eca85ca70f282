//! Scanner invocation.
//!
//! Commands are kept as a program plus an ordered argument list and are
//! never handed to a shell. Output redirection and proxy routing are
//! applied by wrapping the argument list, not by string concatenation.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// One program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ScanCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Tokenizes a command line with POSIX shell quoting rules.
    ///
    /// Returns `None` for a blank line or one with unbalanced quotes.
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = shlex::split(line)?.into_iter();
        let program = tokens.next()?;
        Some(Self::new(program, tokens))
    }

    /// Appends the three scanner output flags for `artifacts`.
    pub fn with_output(mut self, artifacts: &ArtifactSet) -> Self {
        self.args.extend([
            "-oX".to_string(),
            path_arg(&artifacts.xml),
            "-oN".to_string(),
            path_arg(&artifacts.normal),
            "-oG".to_string(),
            path_arg(&artifacts.grepable),
        ]);
        self
    }

    /// Prefixes the invocation with the proxy wrapper when a route is given.
    pub fn routed_through(self, proxy: Option<&ProxyRoute>) -> Self {
        let Some(route) = proxy else {
            return self;
        };

        let mut args = vec!["-f".to_string(), path_arg(&route.config_path), self.program];
        args.extend(self.args);
        Self {
            program: route.wrapper.clone(),
            args,
        }
    }
}

impl fmt::Display for ScanCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// The files one scanner run writes: XML for parsing, plus normal and
/// grepable text for humans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    pub xml: PathBuf,
    pub normal: PathBuf,
    pub grepable: PathBuf,
}

impl ArtifactSet {
    pub fn new(dir: &Path, stem: &str) -> Self {
        Self {
            xml: dir.join(format!("{stem}.xml")),
            normal: dir.join(format!("{stem}.nmap")),
            grepable: dir.join(format!("{stem}.gnmap")),
        }
    }
}

/// Routing through the local SOCKS tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    pub wrapper: String,
    pub config_path: PathBuf,
}

/// Outcome of one invocation. Never mutated after it is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// The XML artifact is first, followed by whichever text outputs exist.
    Success { artifacts: Vec<PathBuf> },
    Failure { reason: String },
    Timeout,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        command: &ScanCommand,
        artifacts: &ArtifactSet,
        proxy: Option<&ProxyRoute>,
    ) -> CommandResult;
}

/// Runs commands as child processes with a hard timeout.
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        command: &ScanCommand,
        artifacts: &ArtifactSet,
        proxy: Option<&ProxyRoute>,
    ) -> CommandResult {
        let invocation = command.clone().with_output(artifacts).routed_through(proxy);
        debug!("Executing: {invocation}");

        // kill_on_drop: when the timeout drops the wait future, the child goes with it.
        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                return CommandResult::Failure {
                    reason: format!("failed to spawn {}: {e}", invocation.program),
                };
            }
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Err(_) => return CommandResult::Timeout,
            Ok(Err(e)) => {
                return CommandResult::Failure {
                    reason: format!("failed to wait for {}: {e}", invocation.program),
                };
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let reason = if stderr.is_empty() {
                format!("exited with {}", output.status)
            } else {
                stderr
            };
            return CommandResult::Failure { reason };
        }

        collect_artifacts(artifacts).await
    }
}

async fn collect_artifacts(artifacts: &ArtifactSet) -> CommandResult {
    let xml_len = tokio::fs::metadata(&artifacts.xml)
        .await
        .map(|meta| meta.len())
        .unwrap_or(0);

    if xml_len == 0 {
        return CommandResult::Failure {
            reason: format!("file {} is empty or doesn't exist", artifacts.xml.display()),
        };
    }

    let mut found = vec![artifacts.xml.clone()];
    for extra in [&artifacts.normal, &artifacts.grepable] {
        if tokio::fs::try_exists(extra).await.unwrap_or(false) {
            found.push(extra.clone());
        }
    }

    CommandResult::Success { artifacts: found }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
