use anyhow::Context;
use tracing::info;

use ripple_node::NodeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ripple_observability::init();

    let config = NodeConfig::from_env().context("invalid configuration")?;
    let node = ripple_node::start(config).await.context("service failed to start")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    node.shutdown().await?;
    Ok(())
}
