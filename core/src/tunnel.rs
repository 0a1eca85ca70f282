//! SSH dynamic port forwarding for remote scans.
//!
//! The manager owns the `ssh -D` child process directly. Liveness checks and
//! shutdown act on that handle, so they never confuse two tunnels that share
//! a port number.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use scanai_common::config::TunnelConfig;
use scanai_common::success;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio_socks::tcp::Socks5Stream;
use tracing::{debug, info, warn};

const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_TOTAL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("ssh exited during startup ({status}){}", stderr_suffix(.stderr))]
    ExitedEarly { status: String, stderr: String },
    #[error("cannot query tunnel process: {0}")]
    Wait(#[source] std::io::Error),
    #[error("error creating proxy config {path}: {source}")]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

/// The tunnel lifecycle as seen by the orchestrator.
#[async_trait]
pub trait ProxyTunnel: Send + Sync {
    /// Spawns the tunnel and waits for it to settle.
    async fn start(&mut self) -> Result<(), TunnelError>;

    /// Probes a known address through the proxy. Only a signal; the caller
    /// decides what a failed probe means.
    async fn verify(&self) -> bool;

    fn is_active(&mut self) -> bool;

    /// Terminates the tunnel. A no-op when nothing is running.
    async fn stop(&mut self);

    /// Writes the proxy-chain file pointing at the local SOCKS port.
    async fn write_proxy_config(&self) -> Result<PathBuf, TunnelError>;
}

/// One live `ssh -D` session.
pub struct TunnelManager {
    config: TunnelConfig,
    child: Option<Child>,
}

impl TunnelManager {
    pub fn new(config: TunnelConfig) -> Self {
        Self {
            config,
            child: None,
        }
    }
}

#[async_trait]
impl ProxyTunnel for TunnelManager {
    async fn start(&mut self) -> Result<(), TunnelError> {
        if self.is_active() {
            warn!("SSH tunnel is already running");
            return Ok(());
        }

        info!("Starting SSH tunnel to {}", self.config.endpoint());
        info!("SOCKS proxy: localhost:{}", self.config.local_port);

        // kill_on_drop also covers unwinding paths that never reach `stop`.
        let mut child = Command::new(&self.config.ssh_program)
            .args(ssh_args(&self.config))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TunnelError::Spawn {
                program: self.config.ssh_program.clone(),
                source,
            })?;

        tokio::time::sleep(self.config.settle).await;

        match child.try_wait() {
            Ok(None) => {
                self.child = Some(child);
                success!("SSH tunnel established");
                Ok(())
            }
            Ok(Some(status)) => {
                let mut stderr = String::new();
                if let Some(mut pipe) = child.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr).await;
                }
                Err(TunnelError::ExitedEarly {
                    status: status.to_string(),
                    stderr: stderr.trim().to_string(),
                })
            }
            Err(e) => {
                let _ = child.kill().await;
                Err(TunnelError::Wait(e))
            }
        }
    }

    async fn verify(&self) -> bool {
        let (host, port) = self.config.probe_target();
        let probe = socks5_connect(self.config.local_port, host, port);

        match tokio::time::timeout(PROBE_TOTAL_TIMEOUT, probe).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("Tunnel probe to {host}:{port} failed: {e}");
                false
            }
            Err(_) => {
                warn!("Tunnel probe to {host}:{port} timed out");
                false
            }
        }
    }

    fn is_active(&mut self) -> bool {
        self.child
            .as_mut()
            .is_some_and(|child| matches!(child.try_wait(), Ok(None)))
    }

    async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            debug!("No SSH tunnel to close");
            return;
        };

        if let Ok(Some(status)) = child.try_wait() {
            warn!("SSH tunnel had already exited ({status})");
            return;
        }

        match child.kill().await {
            Ok(()) => success!("SSH tunnel closed"),
            Err(e) => warn!("Error closing tunnel: {e}"),
        }
    }

    async fn write_proxy_config(&self) -> Result<PathBuf, TunnelError> {
        write_proxy_config(&self.config.proxy_config_path, self.config.local_port).await
    }
}

/// Arguments for `ssh`: dynamic forwarding, no remote command, quiet,
/// compressed, and failing fast instead of prompting.
pub fn ssh_args(config: &TunnelConfig) -> Vec<String> {
    let mut args = vec![
        "-D".to_string(),
        config.local_port.to_string(),
        "-N".to_string(),
        "-q".to_string(),
        "-p".to_string(),
        config.port.to_string(),
    ];

    if let Some(key) = &config.key {
        args.push("-i".to_string());
        args.push(key.to_string_lossy().into_owned());
    }

    args.extend([
        "-C".to_string(),
        "-o".to_string(),
        "ExitOnForwardFailure=yes".to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        format!("{}@{}", config.user, config.host),
    ]);
    args
}

pub fn proxy_config_contents(socks_port: u16) -> String {
    format!(
        "# Proxychains config for scanai\n\
         # Generated automatically\n\
         \n\
         strict_chain\n\
         proxy_dns\n\
         tcp_read_time_out 15000\n\
         tcp_connect_time_out 8000\n\
         \n\
         [ProxyList]\n\
         socks5 127.0.0.1 {socks_port}\n"
    )
}

pub async fn write_proxy_config(path: &Path, socks_port: u16) -> Result<PathBuf, TunnelError> {
    tokio::fs::write(path, proxy_config_contents(socks_port))
        .await
        .map_err(|source| TunnelError::ConfigWrite {
            path: path.to_path_buf(),
            source,
        })?;

    success!("Proxychains config created: {}", path.display());
    Ok(path.to_path_buf())
}

/// Opens a CONNECT to `host:port` through the local SOCKS5 listener.
async fn socks5_connect(local_port: u16, host: &str, port: u16) -> Result<(), tokio_socks::Error> {
    let proxy = SocketAddr::from((Ipv4Addr::LOCALHOST, local_port));
    let socket = tokio::time::timeout(PROBE_CONNECT_TIMEOUT, TcpStream::connect(proxy))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connection timeout"))??;

    Socks5Stream::connect_with_socket(socket, (host, port)).await?;
    Ok(())
}
