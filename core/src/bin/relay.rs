/// chatsync relay - fans published events out to every channel member
use chatsync_core::{Relay, RelayConfig};
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let config = RelayConfig::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let relay = Relay::bind(config.listen_addr).await
        .map_err(|e| anyhow::anyhow!("Failed to bind relay: {}", e))?;
    relay.run().await
        .map_err(|e| anyhow::anyhow!("Relay error: {}", e))?;
    Ok(())
}
