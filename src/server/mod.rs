//! TCP server: shared state and the accept loop.

pub mod listener;

use std::net::SocketAddr;
use std::time::Duration;

use crate::cgi::{CgiContext, CgiExecutor};
use crate::config::Config;
use crate::router::Router;

/// Immutable state shared by every connection task.
#[derive(Debug)]
pub struct ServerState {
    pub config: Config,
    pub router: Router,
    pub cgi: CgiExecutor,
    server_port: u16,
}

impl ServerState {
    pub fn new(config: Config) -> Self {
        let router = Router::new(&config);
        let cgi = CgiExecutor::new(Duration::from_secs(config.cgi_timeout_secs));
        let server_port = config
            .listen
            .parse::<SocketAddr>()
            .map(|a| a.port())
            .or_else(|_| {
                config
                    .listen
                    .rsplit_once(':')
                    .map(|(_, p)| p)
                    .unwrap_or("80")
                    .parse::<u16>()
            })
            .unwrap_or(80);

        Self {
            config,
            router,
            cgi,
            server_port,
        }
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.config.client_timeout_secs)
    }

    pub fn cgi_context(&self, peer: Option<SocketAddr>) -> CgiContext {
        CgiContext {
            server_name: self.config.server_name.clone(),
            server_port: self.server_port,
            remote_addr: peer,
        }
    }
}
