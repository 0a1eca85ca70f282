use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use scanai_common::success;
use scanai_core::tunnel::{ProxyTunnel, TunnelManager};
use tracing::{info, warn};

use crate::commands::SshArgs;
use crate::signal::shutdown_signal;
use crate::terminal::print;

const LIVENESS_INTERVAL: Duration = Duration::from_secs(5);

/// Starts a tunnel, checks it, writes the proxy config and holds it open
/// until Ctrl-C or until the ssh process goes away.
pub async fn tunnel(ssh: &SshArgs, q_level: u8) -> anyhow::Result<ExitCode> {
    let cfg = ssh.to_config();
    print::header("ssh tunnel", q_level);
    print::aligned_line("Endpoint", cfg.endpoint());
    print::aligned_line("SOCKS", format!("127.0.0.1:{}", cfg.local_port));

    let mut tunnel = TunnelManager::new(cfg);
    tunnel
        .start()
        .await
        .context("could not establish SSH tunnel")?;

    print::aligned_line("Active", if tunnel.is_active() { "yes" } else { "no" });
    if tunnel.verify().await {
        success!("Tunnel verified");
    } else {
        warn!("Tunnel could not be verified");
    }

    let config_path = match tunnel.write_proxy_config().await {
        Ok(path) => path,
        Err(e) => {
            tunnel.stop().await;
            return Err(e.into());
        }
    };

    info!("Route a scan through the tunnel with:");
    print::print_status(format!(
        "{} -f {} nmap -sT -Pn <target>",
        ssh.proxy_wrapper,
        config_path.display()
    ));
    info!("Press Ctrl-C to close the tunnel");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(LIVENESS_INTERVAL);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                if !tunnel.is_active() {
                    warn!("SSH tunnel exited on its own");
                    break;
                }
            }
        }
    }

    tunnel.stop().await;
    Ok(ExitCode::SUCCESS)
}
