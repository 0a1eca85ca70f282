//! Run configuration.
//!
//! Built once at startup and handed to the orchestrator and the tunnel
//! manager behind an `Arc`. Nothing in here is mutated after construction.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_SETTLE_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_SOCKS_PORT: u16 = 1080;
pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_PROXY_CONFIG: &str = "/tmp/proxychains.conf";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
pub const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Clone)]
pub struct Config {
    /// Every target writes into its own subdirectory of this path.
    pub output_dir: PathBuf,
    /// Hard upper bound for a single scanner invocation.
    pub command_timeout: Duration,
    /// The only program planner commands are allowed to run.
    pub scanner: String,
    /// Wrapper used to route the scanner through the SOCKS tunnel.
    pub proxy_wrapper: String,
    /// Pipelines running at the same time. `0` admits all of them at once.
    pub max_parallel: usize,
    pub mode: ScanMode,
    pub reasoning: ReasoningConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            scanner: "nmap".to_string(),
            proxy_wrapper: "proxychains4".to_string(),
            max_parallel: 0,
            mode: ScanMode::Direct,
            reasoning: ReasoningConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ScanMode {
    Direct,
    Tunneled(TunnelConfig),
}

impl ScanMode {
    pub fn is_tunneled(&self) -> bool {
        matches!(self, ScanMode::Tunneled(_))
    }

    pub fn tunnel(&self) -> Option<&TunnelConfig> {
        match self {
            ScanMode::Direct => None,
            ScanMode::Tunneled(cfg) => Some(cfg),
        }
    }
}

/// SSH dynamic port forwarding settings.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub host: String,
    pub user: String,
    pub port: u16,
    /// Identity file passed with `-i`.
    pub key: Option<PathBuf>,
    /// Local SOCKS port opened by `ssh -D`.
    pub local_port: u16,
    /// How long to wait after spawning before the tunnel is considered up.
    pub settle: Duration,
    pub proxy_config_path: PathBuf,
    /// Address reached through the proxy by `verify`. Defaults to the SSH
    /// endpoint itself.
    pub probe: Option<(String, u16)>,
    pub ssh_program: String,
}

impl TunnelConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            port: DEFAULT_SSH_PORT,
            key: None,
            local_port: DEFAULT_SOCKS_PORT,
            settle: DEFAULT_SETTLE_INTERVAL,
            proxy_config_path: PathBuf::from(DEFAULT_PROXY_CONFIG),
            probe: None,
            ssh_program: "ssh".to_string(),
        }
    }

    pub fn probe_target(&self) -> (&str, u16) {
        match &self.probe {
            Some((host, port)) => (host.as_str(), *port),
            None => (self.host.as_str(), self.port),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Settings for the planning and analysis calls.
#[derive(Clone)]
pub struct ReasoningConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub max_tokens: u32,
    /// At most this many documents are sent for analysis.
    pub excerpt_documents: usize,
    /// Serialized excerpt is cut to this many bytes.
    pub excerpt_bytes: usize,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_tokens: 2000,
            excerpt_documents: 2,
            excerpt_bytes: 8000,
        }
    }
}

impl fmt::Debug for ReasoningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReasoningConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("max_tokens", &self.max_tokens)
            .field("excerpt_documents", &self.excerpt_documents)
            .field("excerpt_bytes", &self.excerpt_bytes)
            .finish()
    }
}
