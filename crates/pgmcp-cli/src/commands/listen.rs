//! `pgmcp listen`: stream notifications as JSON lines until ctrl-c.

use anyhow::Result;
use futures::StreamExt;
use futures::stream::select_all;
use std::path::Path;

pub async fn run(config_path: &Path, channels: &[String]) -> Result<()> {
    let (bridge, _) = super::open(config_path).await?;
    let dispatcher = bridge.dispatcher();

    let mut streams = Vec::with_capacity(channels.len());
    for channel in channels {
        let subscription = dispatcher.subscribe(channel).await.map_err(super::fail)?;
        tracing::info!(channel = %channel, "listening");
        streams.push(subscription.into_stream().boxed());
    }
    let mut events = select_all(streams);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            event = events.next() => match event {
                Some(event) => println!("{}", serde_json::to_string(&event)?),
                None => break,
            }
        }
    }

    drop(events);
    bridge.shutdown().await;
    Ok(())
}
