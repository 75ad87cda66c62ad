//! Server configuration.
//!
//! Loaded once from a YAML file at startup, validated, then shared
//! read-only by every connection behind an `Arc`.
//!
//! ```yaml
//! listen: 127.0.0.1:8080
//! client_max_body_size: 1048576
//! error_pages:
//!   404: www/errors/404.html
//! routes:
//!   - path: /uploads
//!     root: www/uploads
//!     methods: [GET, POST, DELETE]
//!     upload_dir: www/uploads
//!   - path: /cgi-bin
//!     root: www/cgi-bin
//!     methods: [GET, POST]
//!     cgi:
//!       .py: /usr/bin/python3
//!       .cgi: ~
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::http::request::Method;

/// Body limit applied when neither the server nor the route sets one.
pub const DEFAULT_MAX_BODY_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid configuration: {}", .0.join(", "))]
    Validation(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the listener binds to, overridden by `LISTEN` when set.
    pub listen: String,
    pub server_name: String,
    /// Default body limit for routes that do not set `max_body_size`.
    pub client_max_body_size: u64,
    /// Upper bound on any single read from a client.
    pub client_timeout_secs: u64,
    pub cgi_timeout_secs: u64,
    /// Status code to page served in place of the built-in error body.
    pub error_pages: HashMap<u16, PathBuf>,
    pub routes: Vec<RouteConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            server_name: "localhost".to_string(),
            client_max_body_size: DEFAULT_MAX_BODY_SIZE,
            client_timeout_secs: 30,
            cgi_timeout_secs: 10,
            error_pages: HashMap::new(),
            routes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    /// URL prefix this route answers for.
    pub path: String,
    /// Directory the prefix maps onto.
    pub root: PathBuf,
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    /// File served for a request naming a directory.
    #[serde(default)]
    pub index: Option<String>,
    /// POST bodies to this route are decoded as multipart and stored here.
    #[serde(default)]
    pub upload_dir: Option<PathBuf>,
    #[serde(default)]
    pub max_body_size: Option<u64>,
    /// Script extension (`.py`) to interpreter. `~` runs the script directly.
    #[serde(default)]
    pub cgi: HashMap<String, Option<PathBuf>>,
}

fn default_methods() -> Vec<String> {
    vec!["GET".to_string()]
}

impl RouteConfig {
    /// Methods the route accepts, in configuration order.
    pub fn allowed_methods(&self) -> Vec<Method> {
        self.methods
            .iter()
            .filter_map(|m| Method::from_str(&m.to_ascii_uppercase()))
            .collect()
    }
}

impl Config {
    /// Reads, parses and validates the file at `path`, then applies the
    /// `LISTEN` environment override.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::from_yaml(&text)?;
        if let Ok(listen) = std::env::var("LISTEN") {
            config.listen = listen;
        }
        Ok(config)
    }

    /// Parses and validates a YAML document. No environment is consulted.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every route and collects all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.routes.is_empty() {
            errors.push("at least one route is required".to_string());
        }
        if self.client_timeout_secs == 0 {
            errors.push("client_timeout_secs must be positive".to_string());
        }
        if self.cgi_timeout_secs == 0 {
            errors.push("cgi_timeout_secs must be positive".to_string());
        }

        for route in &self.routes {
            if !route.path.starts_with('/') {
                errors.push(format!("route path {:?} must start with '/'", route.path));
            }
            for method in &route.methods {
                if Method::from_str(&method.to_ascii_uppercase()).is_none() {
                    errors.push(format!("route {}: unknown method {:?}", route.path, method));
                }
            }
            for ext in route.cgi.keys() {
                if !ext.starts_with('.') || ext.len() < 2 {
                    errors.push(format!("route {}: CGI extension {:?} must look like \".py\"", route.path, ext));
                }
            }
        }

        let mut seen = std::collections::HashSet::new();
        for route in &self.routes {
            if !seen.insert(route.path.trim_end_matches('/')) {
                errors.push(format!("route {} is defined twice", route.path));
            }
        }

        for code in self.error_pages.keys() {
            if !(400..600).contains(code) {
                errors.push(format!("error page for {} is not an error status", code));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}
