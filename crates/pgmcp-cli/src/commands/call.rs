//! `pgmcp call`: invoke a tool with JSON arguments.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;

pub async fn run(config_path: &Path, id: &str, args: &str) -> Result<()> {
    let arguments: Value = serde_json::from_str(args).context("--args must be a JSON object")?;
    let (bridge, _) = super::open(config_path).await?;

    let result = bridge.dispatcher().call(id, arguments).await;
    bridge.shutdown().await;

    let value = result.map_err(super::fail)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
