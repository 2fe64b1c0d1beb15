//! `pgmcp read`: one page from a resource, printed as JSON.

use anyhow::Result;
use pgmcp_mcp::ReadRequest;
use std::path::Path;

pub async fn run(
    config_path: &Path,
    id: &str,
    filter: Option<String>,
    order_by: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
) -> Result<()> {
    let (bridge, _) = super::open(config_path).await?;
    let request = ReadRequest {
        filter,
        order_by,
        limit,
        offset,
    };

    let result = bridge.dispatcher().read(id, &request).await;
    bridge.shutdown().await;

    let page = result.map_err(super::fail)?;
    println!("{}", serde_json::to_string_pretty(&page)?);
    Ok(())
}
