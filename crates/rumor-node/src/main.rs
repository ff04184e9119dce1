//! Rumor Node binary
//!
//! One member of a gossip broadcast cluster, speaking JSON lines on stdio.

use std::sync::Arc;

use rumor_node::{runtime, BroadcastNode, NodeConfig, Runtime};
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Stdout carries the protocol, so logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rumor_node=info,rumor_protocols=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = NodeConfig::from_env()?;
    tracing::info!(delivery = %config.gossip.mode, "Starting Rumor node");

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        if let Err(e) = runtime::write_lines(outbound_rx, tokio::io::stdout()).await {
            tracing::error!("Output writer error: {}", e);
        }
    });

    let node = BroadcastNode::new(Arc::new(Runtime::new(outbound_tx)), &config);
    node.serve(BufReader::new(tokio::io::stdin())).await?;

    Ok(())
}
