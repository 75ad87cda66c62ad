use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::http::connection::Connection;
use crate::server::ServerState;

/// Accepts connections forever, serving each on its own task.
///
/// Only a failure to bind is fatal. A failed `accept` (descriptor
/// exhaustion, a peer resetting during the handshake) is logged and the
/// loop backs off briefly before trying again.
pub async fn run(state: Arc<ServerState>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&state.config.listen).await?;
    info!(addr = %state.config.listen, routes = state.config.routes.len(), "listening");

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };
        if let Err(e) = socket.set_nodelay(true) {
            debug!(%peer, error = %e, "could not set TCP_NODELAY");
        }
        info!(%peer, "accepted connection");

        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let mut conn = Connection::new(socket, state, Some(peer));
            if let Err(e) = conn.run().await {
                error!(%peer, error = %e, "connection error");
            }
        });
    }
}
