//! CGI/1.1 execution.
//!
//! A script is treated as an opaque function from (environment, stdin) to
//! stdout. [`CgiInvocation`] builds the environment from the request,
//! [`CgiExecutor`] runs the child and [`parse_cgi_output`] turns what it
//! printed into a response.

mod executor;
mod output;

pub use executor::CgiExecutor;
pub use output::{CgiOutput, parse_cgi_output};

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::http::request::Request;
use crate::router::CgiTarget;

pub const SERVER_SOFTWARE: &str = concat!("webserv/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum CgiError {
    #[error("failed to spawn CGI program: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("CGI program timed out")]
    Timeout,
    #[error("invalid CGI output: {0}")]
    Protocol(String),
    #[error("CGI pipe error: {0}")]
    Io(#[from] std::io::Error),
}

/// Server-side facts a script sees next to the request metadata.
#[derive(Debug, Clone)]
pub struct CgiContext {
    pub server_name: String,
    pub server_port: u16,
    pub remote_addr: Option<SocketAddr>,
}

/// Everything needed to start one CGI child.
#[derive(Debug, Clone)]
pub struct CgiInvocation {
    pub interpreter: Option<PathBuf>,
    pub script: PathBuf,
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl CgiInvocation {
    /// Builds the invocation for `req` against `target`.
    ///
    /// `content_length` is the number of body bytes that will be written to
    /// the child, or `None` when the request carried no body framing at all;
    /// in that case `CONTENT_LENGTH` is present but empty. The same holds
    /// for `CONTENT_TYPE` and `QUERY_STRING`.
    pub fn new(
        target: &CgiTarget,
        req: &Request,
        ctx: &CgiContext,
        content_length: Option<u64>,
    ) -> Self {
        let script = absolute(&target.script);
        let working_dir = script
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut env = BTreeMap::new();
        let mut set = |k: &str, v: String| {
            env.insert(k.to_string(), v);
        };

        set("REQUEST_METHOD", req.method.to_string());
        set("QUERY_STRING", req.query.clone());
        set("CONTENT_TYPE", req.content_type().unwrap_or("").to_string());
        set(
            "CONTENT_LENGTH",
            content_length.map(|n| n.to_string()).unwrap_or_default(),
        );

        set("GATEWAY_INTERFACE", "CGI/1.1".to_string());
        set("SERVER_PROTOCOL", req.version.clone());
        set("SERVER_SOFTWARE", SERVER_SOFTWARE.to_string());
        set("SERVER_NAME", ctx.server_name.clone());
        set("SERVER_PORT", ctx.server_port.to_string());
        set(
            "REMOTE_ADDR",
            ctx.remote_addr.map(|a| a.ip().to_string()).unwrap_or_default(),
        );
        set("SCRIPT_NAME", target.script_name.clone());
        set("SCRIPT_FILENAME", script.to_string_lossy().into_owned());
        set("PATH_INFO", target.path_info.clone());
        set("REQUEST_URI", req.target.clone());
        // php-cgi refuses to run without it
        set("REDIRECT_STATUS", "200".to_string());
        if let Ok(path) = std::env::var("PATH") {
            set("PATH", path);
        }

        for (name, value) in req.headers.iter() {
            if name.eq_ignore_ascii_case("Content-Type") || name.eq_ignore_ascii_case("Content-Length") {
                continue;
            }
            let key = format!("HTTP_{}", name.to_ascii_uppercase().replace('-', "_"));
            match env.get_mut(&key) {
                // repeated headers are joined the way a proxy would fold them
                Some(existing) => {
                    existing.push_str(", ");
                    existing.push_str(value);
                }
                None => {
                    env.insert(key, value.to_string());
                }
            }
        }

        Self {
            interpreter: target.interpreter.clone(),
            script,
            working_dir,
            env,
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
