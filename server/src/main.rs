use clap::Parser;
use ingest_server::config::{Cli, ServerConfig};
use ingest_server::context::ServerContext;
use ingest_server::listener;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load(&cli)?;

    let listener = TcpListener::bind(config.listen_address).await?;
    tracing::info!(address = %config.listen_address, "Listening for RTMP connections");

    let context = Arc::new(ServerContext::new(config));
    let shutdown = context.shutdown.clone();
    ingest_server::spawn(async move {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutting down");
        shutdown.cancel();
        Ok::<(), std::io::Error>(())
    });

    listener::serve(listener, context).await;
    Ok(())
}
