/// chatsync client - interactive terminal chat
use chatsync_core::{cli_app, ChatClient, Config, TcpTransport};
use std::env;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they don't interleave with the chat
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn"))
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let config = Config::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let transport = Arc::new(TcpTransport::new(
        config.relay_addr,
        config.channel.clone(),
        config.event_name.clone(),
        config.connect_timeout,
        config.notice_capacity,
    ));

    info!("Starting chat client");
    info!("   Relay: {}", config.relay_addr);
    info!("   Channel: {}", config.channel);

    let client = ChatClient::start(&config, transport).await;
    cli_app::run(client).await
}
