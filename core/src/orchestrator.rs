//! Fan-out of one pipeline per target, with the tunnel lifecycle around it.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use scanai_common::config::Config;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::pipeline::{TargetPipeline, TargetRun};
use crate::reasoning::{Analyzer, Planner};
use crate::runner::{CommandRunner, ProxyRoute};
use crate::tunnel::{ProxyTunnel, TunnelError};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("could not establish SSH tunnel: {0}")]
    Tunnel(#[source] TunnelError),
    #[error("could not write proxy configuration: {0}")]
    ProxyConfig(#[source] TunnelError),
    #[error("tunneled mode requires a tunnel")]
    MissingTunnel,
    #[error("interrupted while establishing the tunnel")]
    Interrupted,
}

/// Terminal records of every target, in input order.
#[derive(Debug)]
pub struct RunReport {
    pub runs: Vec<TargetRun>,
    pub elapsed: Duration,
    pub interrupted: bool,
    /// `None` in direct mode.
    pub tunnel_verified: Option<bool>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.runs.iter().filter(|r| r.status.is_success()).count()
    }
}

type Progress = Box<dyn Fn(&TargetRun, usize, usize) + Send + Sync>;

pub struct Orchestrator {
    config: Arc<Config>,
    runner: Arc<dyn CommandRunner>,
    planner: Arc<dyn Planner>,
    analyzer: Arc<dyn Analyzer>,
    tunnel: Option<Box<dyn ProxyTunnel>>,
    progress: Option<Progress>,
}

impl Orchestrator {
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
            tunnel: None,
            progress: None,
        }
    }

    pub fn with_tunnel(mut self, tunnel: Box<dyn ProxyTunnel>) -> Self {
        self.tunnel = Some(tunnel);
        self
    }

    /// Called with `(run, finished, total)` whenever a target reaches a
    /// terminal state.
    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(&TargetRun, usize, usize) + Send + Sync + 'static,
    {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Runs every target to a terminal state. The tunnel, when present, is
    /// up before the first pipeline starts and stopped after the last one
    /// ends, also when `shutdown` resolves early.
    pub async fn run<F>(
        &mut self,
        targets: Vec<String>,
        shutdown: F,
    ) -> Result<RunReport, OrchestratorError>
    where
        F: Future<Output = ()>,
    {
        let started = Instant::now();
        tokio::pin!(shutdown);

        if self.config.mode.is_tunneled() && self.tunnel.is_none() {
            return Err(OrchestratorError::MissingTunnel);
        }

        let (proxy, tunnel_verified) = match self.tunnel.as_mut() {
            None => (None, None),
            Some(tunnel) => {
                let (route, verified) = establish(tunnel.as_mut(), &self.config, &mut shutdown).await?;
                (Some(route), Some(verified))
            }
        };

        let (runs, interrupted) = self.fan_out(targets, proxy, &mut shutdown).await;

        if let Some(tunnel) = self.tunnel.as_mut() {
            tunnel.stop().await;
        }

        Ok(RunReport {
            runs,
            elapsed: started.elapsed(),
            interrupted,
            tunnel_verified,
        })
    }

    async fn fan_out<F>(
        &self,
        targets: Vec<String>,
        proxy: Option<ProxyRoute>,
        shutdown: &mut std::pin::Pin<&mut F>,
    ) -> (Vec<TargetRun>, bool)
    where
        F: Future<Output = ()>,
    {
        let targets = unique_targets(targets);
        let total = targets.len();
        let pipeline = Arc::new(
            TargetPipeline::new(
                Arc::clone(&self.config),
                Arc::clone(&self.runner),
                Arc::clone(&self.planner),
                Arc::clone(&self.analyzer),
            )
            .with_proxy(proxy),
        );
        let limiter = (self.config.max_parallel > 0)
            .then(|| Arc::new(Semaphore::new(self.config.max_parallel)));

        let mut tasks = JoinSet::new();
        let mut pending = HashMap::with_capacity(total);

        for (index, target) in targets.into_iter().enumerate() {
            let pipeline = Arc::clone(&pipeline);
            let limiter = limiter.clone();
            let task_target = target.clone();

            let handle = tasks.spawn(async move {
                // Held for the whole pipeline; dropped with the task on abort.
                let _permit = match limiter {
                    Some(sem) => sem.acquire_owned().await.ok(),
                    None => None,
                };
                pipeline.run(&task_target).await
            });
            pending.insert(handle.id(), (index, target));
        }
        debug!("Spawned {total} pipeline(s)");

        let mut runs: Vec<(usize, TargetRun)> = Vec::with_capacity(total);
        let mut interrupted = false;

        loop {
            tokio::select! {
                joined = tasks.join_next_with_id() => {
                    let Some(joined) = joined else { break };
                    let (id, outcome) = match joined {
                        Ok((id, run)) => (id, Ok(run)),
                        Err(e) => (e.id(), Err(e)),
                    };
                    let Some((index, target)) = pending.remove(&id) else {
                        continue;
                    };

                    let run = match outcome {
                        Ok(run) => run,
                        Err(e) if e.is_panic() => {
                            let reason = format!("pipeline panicked: {}", panic_message(e.into_panic()));
                            error!("{target}: {reason}");
                            TargetRun::aborted(&target, reason)
                        }
                        Err(_) => TargetRun::aborted(&target, "interrupted"),
                    };

                    if let Some(progress) = &self.progress {
                        progress(&run, runs.len() + 1, total);
                    }
                    runs.push((index, run));
                }
                _ = shutdown.as_mut(), if !interrupted => {
                    warn!("Interrupt received, cancelling {} pipeline(s)", tasks.len());
                    interrupted = true;
                    tasks.abort_all();
                }
            }
        }

        runs.sort_by_key(|(index, _)| *index);
        (runs.into_iter().map(|(_, run)| run).collect(), interrupted)
    }
}

/// Drops repeated targets, keeping the first occurrence. Two pipelines for
/// one target would share an artifact directory.
fn unique_targets(targets: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(targets.len());
    targets
        .into_iter()
        .filter(|target| {
            let first = seen.insert(target.clone());
            if !first {
                warn!("Skipping duplicate target {target}");
            }
            first
        })
        .collect()
}

/// Starts, probes and configures the tunnel. Stops it again on any failure
/// after a successful start.
async fn establish<F>(
    tunnel: &mut dyn ProxyTunnel,
    config: &Config,
    shutdown: &mut std::pin::Pin<&mut F>,
) -> Result<(ProxyRoute, bool), OrchestratorError>
where
    F: Future<Output = ()>,
{
    let started = tokio::select! {
        result = tunnel.start() => Some(result),
        _ = shutdown.as_mut() => None,
    };

    match started {
        Some(Ok(())) => {}
        Some(Err(e)) => {
            error!("{e}");
            tunnel.stop().await;
            return Err(OrchestratorError::Tunnel(e));
        }
        None => {
            warn!("Interrupted while starting the tunnel");
            tunnel.stop().await;
            return Err(OrchestratorError::Interrupted);
        }
    }

    info!("Verifying tunnel");
    let verified = tunnel.verify().await;
    if verified {
        scanai_common::success!("Tunnel verified");
    } else {
        warn!("Tunnel could not be verified, continuing anyway");
    }

    match tunnel.write_proxy_config().await {
        Ok(config_path) => Ok((
            ProxyRoute {
                wrapper: config.proxy_wrapper.clone(),
                config_path,
            },
            verified,
        )),
        Err(e) => {
            error!("{e}");
            tunnel.stop().await;
            Err(OrchestratorError::ProxyConfig(e))
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
