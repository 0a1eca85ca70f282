use std::process::ExitCode;

use colored::*;
use scanai_common::config::ReasoningConfig;
use scanai_common::network::target::Target;
use scanai_core::reasoning::{Planner, ReasoningClient, ReasoningPlanner};
use tracing::{info, warn};

use crate::terminal::{colors, print};

pub async fn plan(target: Target, reasoning: ReasoningConfig, q_level: u8) -> anyhow::Result<ExitCode> {
    let planner = ReasoningPlanner::new(ReasoningClient::new(reasoning)?);

    info!("Requesting scan plan for {target}");
    let plan = planner.plan(&target).await;
    if plan.is_empty() {
        warn!("No commands generated for {target}");
        return Ok(ExitCode::FAILURE);
    }

    print::header("scan plan", q_level);
    for (idx, step) in plan.steps.iter().enumerate() {
        print::tree_head(idx, step);
    }
    for command in plan.commands.iter().filter(|c| !c.trim().is_empty()) {
        print::print_status(command.color(colors::ACCENT).to_string());
    }
    print::end_of_program();
    Ok(ExitCode::SUCCESS)
}
