pub mod plan;
pub mod scan;
pub mod tunnel;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Args, Parser, Subcommand};
use scanai_common::config::{
    Config, DEFAULT_MODEL, DEFAULT_PROXY_CONFIG, ReasoningConfig, ScanMode, TunnelConfig,
};
use scanai_common::network::target::Target;

#[derive(Parser)]
#[command(name = "scanai", version)]
#[command(about = "Planned reconnaissance scans, direct or through an SSH tunnel.")]
pub struct CommandLine {
    #[command(subcommand)]
    pub command: Commands,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Less output
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[command(flatten)]
    pub reasoning: ReasoningArgs,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan targets directly from this machine
    #[command(alias = "s")]
    Scan(ScanArgs),
    /// Scan targets through an SSH SOCKS tunnel
    #[command(alias = "r")]
    Remote {
        #[command(flatten)]
        scan: ScanArgs,
        #[command(flatten)]
        ssh: SshArgs,
    },
    /// Bring a tunnel up, check it, and hold it open until Ctrl-C
    #[command(alias = "t")]
    Tunnel(SshArgs),
    /// Print the scan plan for one target without running it
    #[command(alias = "p")]
    Plan { target: Target },
}

#[derive(Args)]
pub struct ReasoningArgs {
    /// API key for the reasoning service
    #[arg(long, env = "CLAUDE_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "SCANAI_MODEL", default_value = DEFAULT_MODEL, global = true)]
    pub model: String,
}

#[derive(Args)]
pub struct ScanArgs {
    /// Ranges in CIDR notation, e.g. 192.168.1.0/24
    pub targets: Vec<String>,

    /// File with one target per line
    #[arg(long, value_name = "PATH")]
    pub targets_file: Option<PathBuf>,

    /// Base directory for per-target results
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Per-command timeout in seconds
    #[arg(long, default_value_t = 300)]
    pub timeout: u64,

    /// Scanner program; planner commands for anything else are refused
    #[arg(long, default_value = "nmap")]
    pub scanner: String,

    /// Maximum targets scanned at once (0 = all)
    #[arg(short = 'j', long, default_value_t = 0)]
    pub max_parallel: usize,
}

#[derive(Args)]
pub struct SshArgs {
    #[arg(long = "ssh-host", env = "SSH_HOST")]
    pub host: String,

    #[arg(long = "ssh-user", env = "SSH_USER")]
    pub user: String,

    #[arg(long = "ssh-port", env = "SSH_PORT", default_value_t = 22)]
    pub port: u16,

    /// Identity file for ssh -i
    #[arg(long = "ssh-key", env = "SSH_KEY", value_name = "PATH")]
    pub key: Option<PathBuf>,

    /// Local SOCKS port
    #[arg(long, env = "SOCKS_PORT", default_value_t = 1080)]
    pub socks_port: u16,

    #[arg(long, value_name = "PATH", default_value = DEFAULT_PROXY_CONFIG)]
    pub proxy_config: PathBuf,

    #[arg(long, default_value = "proxychains4")]
    pub proxy_wrapper: String,

    /// host:port reached through the tunnel to verify it (default: the SSH server)
    #[arg(long, value_name = "HOST:PORT", value_parser = parse_probe)]
    pub probe: Option<(String, u16)>,
}

impl CommandLine {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl ReasoningArgs {
    pub fn to_config(&self) -> ReasoningConfig {
        ReasoningConfig {
            api_key: self.api_key.clone().filter(|k| !k.trim().is_empty()),
            model: self.model.clone(),
            ..Default::default()
        }
    }
}

impl SshArgs {
    pub fn to_config(&self) -> TunnelConfig {
        let mut cfg = TunnelConfig::new(&self.host, &self.user);
        cfg.port = self.port;
        cfg.key = self.key.clone();
        cfg.local_port = self.socks_port;
        cfg.proxy_config_path = self.proxy_config.clone();
        cfg.probe = self.probe.clone();
        cfg
    }
}

pub fn build_config(
    scan: &ScanArgs,
    ssh: Option<&SshArgs>,
    reasoning: &ReasoningArgs,
) -> Config {
    let mode = match ssh {
        Some(ssh) => ScanMode::Tunneled(ssh.to_config()),
        None => ScanMode::Direct,
    };
    let default_output = if mode.is_tunneled() {
        "output_remote"
    } else {
        "output"
    };

    let mut cfg = Config {
        output_dir: scan
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(default_output)),
        command_timeout: Duration::from_secs(scan.timeout),
        scanner: scan.scanner.clone(),
        max_parallel: scan.max_parallel,
        mode,
        reasoning: reasoning.to_config(),
        ..Default::default()
    };
    if let Some(ssh) = ssh {
        cfg.proxy_wrapper = ssh.proxy_wrapper.clone();
    }
    cfg
}

/// Positional targets followed by the ones from `--targets-file`.
pub fn collect_targets(scan: &ScanArgs) -> anyhow::Result<Vec<String>> {
    let mut targets = scan.targets.clone();
    if let Some(path) = &scan.targets_file {
        targets.extend(read_targets_file(path)?);
    }
    if targets.is_empty() {
        anyhow::bail!("no targets given; pass ranges or --targets-file");
    }
    Ok(targets)
}

fn read_targets_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read targets file {}", path.display()))?;
    Ok(parse_target_lines(&content))
}

fn parse_target_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_probe(s: &str) -> Result<(String, u16), String> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("expected HOST:PORT, got '{s}'"))?;
    let port: u16 = port.parse().map_err(|_| format!("invalid port '{port}'"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(format!("missing host in '{s}'"));
    }
    Ok((host.to_string(), port))
}
