mod commands;
mod signal;
mod terminal;

use std::process::ExitCode;

use commands::{CommandLine, Commands, build_config, collect_targets, plan, scan, tunnel};
use scanai_core::orchestrator::OrchestratorError;
use terminal::{logging, print, spinner};
use tracing::{error, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let commands = CommandLine::parse_args();

    if let Err(e) = logging::init_logging(commands.verbose, commands.quiet) {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }
    print::banner(commands.quiet);

    let result = match &commands.command {
        Commands::Scan(args) => match collect_targets(args) {
            Ok(targets) => {
                warn_if_not_root();
                let cfg = build_config(args, None, &commands.reasoning);
                scan::scan(targets, cfg, commands.quiet).await
            }
            Err(e) => Err(e),
        },
        Commands::Remote { scan: args, ssh } => match collect_targets(args) {
            Ok(targets) => {
                warn_if_not_root();
                let cfg = build_config(args, Some(ssh), &commands.reasoning);
                scan::scan(targets, cfg, commands.quiet).await
            }
            Err(e) => Err(e),
        },
        Commands::Tunnel(ssh) => tunnel::tunnel(ssh, commands.quiet).await,
        Commands::Plan { target } => {
            plan::plan(target.clone(), commands.reasoning.to_config(), commands.quiet).await
        }
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(exit_status(&e))
        }
    };

    spinner::console().flush();
    code
}

/// 130 when the run was interrupted before any target started, 1 otherwise.
fn exit_status(e: &anyhow::Error) -> u8 {
    match e.downcast_ref::<OrchestratorError>() {
        Some(OrchestratorError::Interrupted) => scan::INTERRUPTED,
        _ => 1,
    }
}

/// Host discovery and SYN scans need raw sockets.
fn warn_if_not_root() {
    if !is_root::is_root() {
        warn!("Not running as root, some scan types may fail or fall back to slower methods");
    }
}
