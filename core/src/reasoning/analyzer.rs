use async_trait::async_trait;
use tracing::debug;

use super::client::ReasoningClient;
use crate::parser::ScanDocument;

pub const NO_RESULTS: &str = "[!] No results to analyze";

#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Free-text findings. Failures are reported inline, never raised.
    async fn analyze(&self, documents: &[ScanDocument]) -> String;
}

pub struct ReasoningAnalyzer {
    client: ReasoningClient,
}

impl ReasoningAnalyzer {
    pub fn new(client: ReasoningClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Analyzer for ReasoningAnalyzer {
    async fn analyze(&self, documents: &[ScanDocument]) -> String {
        if documents.is_empty() {
            return NO_RESULTS.to_string();
        }

        let config = self.client.config();
        let data = match excerpt(documents, config.excerpt_documents, config.excerpt_bytes) {
            Ok(data) => data,
            Err(e) => return analysis_error(e),
        };
        debug!(bytes = data.len(), "Sending scan excerpt for analysis");

        self.client
            .complete(&analysis_prompt(&data))
            .await
            .unwrap_or_else(analysis_error)
    }
}

pub fn analysis_error(reason: impl std::fmt::Display) -> String {
    format!("[!] Error in analysis: {reason}")
}

/// Pretty JSON of the first `max_documents`, cut to at most `max_bytes`
/// on a character boundary.
pub fn excerpt(
    documents: &[ScanDocument],
    max_documents: usize,
    max_bytes: usize,
) -> serde_json::Result<String> {
    let head = &documents[..documents.len().min(max_documents)];
    let mut data = serde_json::to_string_pretty(head)?;

    if data.len() > max_bytes {
        let mut cut = max_bytes;
        while !data.is_char_boundary(cut) {
            cut -= 1;
        }
        data.truncate(cut);
    }
    Ok(data)
}

fn analysis_prompt(data: &str) -> String {
    format!(
        "Analyze the following Nmap scan results:\n\n\
         {data}\n\n\
         Identify:\n\
         - Dangerous or exposed services\n\
         - Known vulnerable versions\n\
         - Common attack vectors\n\
         - Suggestions for next pentesting steps\n\
         - Overall risk level (Low/Medium/High/Critical)\n"
    )
}
