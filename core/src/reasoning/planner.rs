use async_trait::async_trait;
use scanai_common::network::target::Target;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::client::ReasoningClient;

/// Ordered scan commands for one target plus their human-readable steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanPlan {
    pub steps: Vec<String>,
    pub commands: Vec<String>,
}

impl ScanPlan {
    pub fn new<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: Vec::new(),
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }

    /// True when there is nothing to run. Blank command strings do not count.
    pub fn is_empty(&self) -> bool {
        self.commands.iter().all(|c| c.trim().is_empty())
    }
}

#[derive(Deserialize)]
struct RawPlan {
    steps: Option<Vec<String>>,
    commands: Option<Vec<String>>,
}

#[async_trait]
pub trait Planner: Send + Sync {
    /// Never fails: anything unusable comes back as an empty plan.
    async fn plan(&self, target: &Target) -> ScanPlan;
}

pub struct ReasoningPlanner {
    client: ReasoningClient,
}

impl ReasoningPlanner {
    pub fn new(client: ReasoningClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Planner for ReasoningPlanner {
    async fn plan(&self, target: &Target) -> ScanPlan {
        match self.client.complete(&plan_prompt(target)).await {
            Ok(reply) => parse_plan(&reply).unwrap_or_else(|| {
                warn!("No valid JSON found in planner response");
                ScanPlan::default()
            }),
            Err(e) => {
                warn!("Error in planner: {e}");
                ScanPlan::default()
            }
        }
    }
}

/// Decodes the JSON object spanning the first `{` to the last `}` of `reply`.
pub fn parse_plan(reply: &str) -> Option<ScanPlan> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }

    let raw: RawPlan = match serde_json::from_str(&reply[start..=end]) {
        Ok(raw) => raw,
        Err(e) => {
            debug!("Planner JSON rejected: {e}");
            return None;
        }
    };

    Some(ScanPlan {
        steps: raw.steps.unwrap_or_default(),
        commands: raw.commands.unwrap_or_default(),
    })
}

fn plan_prompt(target: &Target) -> String {
    format!(
        r#"You are a penetration testing expert. Generate quiet nmap commands to scan the network {target}.

Return EXACTLY this JSON format:

{{
  "steps": [
    "Active host discovery",
    "Complete port scan (rate limited)"
  ],
  "commands": [
    "nmap -sn {target}",
    "nmap -p- --min-rate 500 {target}"
  ]
}}

Generate nmap commands for:
1. Discovering active hosts with a ping sweep (-sn)
2. Scanning ALL ports at a controlled rate (--min-rate 500)

Notes:
- Use --min-rate 500 instead of -T4 to limit traffic
- Service detection runs later against the ports that are found
- Do not include -sV or -sC in these commands

Reply with the JSON only."#
    )
}
