use std::sync::Arc;

use webserv::config::Config;
use webserv::server::{self, ServerState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string());
    let cfg = Config::load(&path)?;
    tracing::info!(config = %path, routes = cfg.routes.len(), "configuration loaded");

    let state = Arc::new(ServerState::new(cfg));

    tokio::select! {
        res = server::listener::run(state) => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
