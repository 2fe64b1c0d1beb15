//! CLI command implementations for pgmcp.

pub mod call;
pub mod check;
pub mod listen;
pub mod read;

use anyhow::{Context, Result};
use pgmcp_core::BridgeConfig;
use pgmcp_mcp::{BindReport, Bridge, McpError};
use std::path::Path;

/// Load the configuration, connect and bind.
pub(crate) async fn open(config_path: &Path) -> Result<(Bridge, BindReport)> {
    let config = BridgeConfig::from_file(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    tracing::info!(
        server = %config.server.name,
        resources = config.expose.resources.len(),
        tools = config.expose.tools.len(),
        channels = config.expose.notifications.len(),
        "configuration loaded"
    );

    let bridge = Bridge::connect(config).await?;
    let report = bridge.bind().await;
    for (kind, failure) in &report.failures {
        tracing::warn!(?kind, rule = failure.rule_index, error = %failure.error, "rule not bound");
    }
    Ok((bridge, report))
}

/// Print a structured failure body and turn it into an error exit.
pub(crate) fn fail(err: McpError) -> anyhow::Error {
    match serde_json::to_string_pretty(&err.to_body()) {
        Ok(body) => eprintln!("{body}"),
        Err(_) => eprintln!("{err}"),
    }
    anyhow::anyhow!(err)
}
