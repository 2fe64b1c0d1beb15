//! `pgmcp check`: bind every rule against the live catalog and report.

use anyhow::{Result, bail};
use pgmcp_mcp::{EndpointKind, EndpointRegistry};
use std::path::Path;

pub async fn run(config_path: &Path, schemas: bool) -> Result<()> {
    let (bridge, report) = super::open(config_path).await?;

    let mut registry = EndpointRegistry::new();
    bridge.register(&mut registry);

    println!("Resources ({}):", report.resources);
    for resource in registry.resources() {
        println!(
            "  {:<32} {}",
            resource.id,
            resource.uri.as_deref().unwrap_or_default()
        );
        if schemas {
            println!("{}", serde_json::to_string_pretty(&resource.input_schema)?);
        }
    }

    println!("Tools ({}):", report.tools);
    for tool in registry.tools() {
        let marker = if tool.dangerous { " [dangerous]" } else { "" };
        println!("  {:<32} {}{marker}", tool.id, tool.description);
        if schemas {
            println!("{}", serde_json::to_string_pretty(&tool.input_schema)?);
        }
    }

    println!("Streams ({}):", report.streams);
    for stream in registry.streams() {
        println!("  {:<32} {:?}", stream.channel, stream.format);
    }

    bridge.shutdown().await;

    if !report.is_clean() {
        for (kind, failure) in &report.failures {
            let section = match kind {
                EndpointKind::Resource => "resources",
                EndpointKind::Tool => "tools",
            };
            eprintln!("ERROR expose.{section}[{}]: {}", failure.rule_index, failure.error);
        }
        bail!("{} rule(s) failed to bind", report.failures.len());
    }
    Ok(())
}
