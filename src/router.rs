//! Route resolution.
//!
//! The router is built once from the configuration and answers, for a
//! method and a normalised path, which handler serves the request and which
//! limits apply to its body. It never touches the filesystem and runs
//! before any body byte is read.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::{Config, RouteConfig};
use crate::error::ServeError;
use crate::http::request::Method;

/// Per-route limits handed to the body readers. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteLimits {
    pub max_body_size: u64,
    pub allowed_methods: Vec<Method>,
    pub upload_dir: Option<PathBuf>,
}

/// What will answer a routed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handler {
    Static { path: PathBuf, index: Option<String> },
    Delete { path: PathBuf },
    Cgi(CgiTarget),
    Upload { dir: PathBuf },
}

/// A CGI script selected by extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgiTarget {
    /// `None` runs the script itself as the program.
    pub interpreter: Option<PathBuf>,
    pub script: PathBuf,
    /// URL path of the script (`/cgi-bin/env.py`).
    pub script_name: String,
    /// Remainder of the URL path after the script name.
    pub path_info: String,
}

#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub handler: Handler,
    pub limits: RouteLimits,
    /// Directory the matched prefix maps onto.
    pub root: PathBuf,
}

#[derive(Debug, Clone)]
struct Route {
    prefix: String,
    root: PathBuf,
    index: Option<String>,
    cgi: HashMap<String, Option<PathBuf>>,
    limits: RouteLimits,
}

#[derive(Debug, Clone)]
pub struct Router {
    /// Sorted longest prefix first.
    routes: Vec<Route>,
}

impl Router {
    pub fn new(config: &Config) -> Self {
        let mut routes: Vec<Route> = config
            .routes
            .iter()
            .map(|r| Route::from_config(r, config.client_max_body_size))
            .collect();
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));

        Self { routes }
    }

    /// Selects the handler for `method` on `path`.
    ///
    /// Fails with `NotFound` when no route prefix matches, `MethodNotAllowed`
    /// when the route does not accept `method` or has nothing that could
    /// serve it, and `Forbidden` when the path would leave the route root.
    pub fn resolve(&self, method: Method, path: &str) -> Result<RouteMatch, ServeError> {
        let route = self
            .routes
            .iter()
            .find(|r| prefix_matches(&r.prefix, path))
            .ok_or(ServeError::NotFound)?;

        let allowed = &route.limits.allowed_methods;
        if !allowed.contains(&method) {
            return Err(ServeError::MethodNotAllowed {
                method,
                allow: allowed.clone(),
            });
        }

        let relative = &path[route.prefix.len().min(path.len())..];
        let handler = match method {
            Method::GET | Method::HEAD => match route.cgi_target(path, relative)? {
                Some(target) => Handler::Cgi(target),
                None => Handler::Static {
                    path: route.fs_path(relative)?,
                    index: route.index.clone(),
                },
            },
            Method::POST => match route.cgi_target(path, relative)? {
                Some(target) => Handler::Cgi(target),
                None => match &route.limits.upload_dir {
                    Some(dir) => Handler::Upload { dir: dir.clone() },
                    None => {
                        return Err(ServeError::MethodNotAllowed {
                            method,
                            allow: allowed.iter().copied().filter(|m| *m != Method::POST).collect(),
                        });
                    }
                },
            },
            Method::DELETE => Handler::Delete {
                path: route.fs_path(relative)?,
            },
            _ => {
                return Err(ServeError::MethodNotAllowed {
                    method,
                    allow: allowed
                        .iter()
                        .copied()
                        .filter(|m| matches!(m, Method::GET | Method::HEAD | Method::POST | Method::DELETE))
                        .collect(),
                });
            }
        };

        Ok(RouteMatch {
            handler,
            limits: route.limits.clone(),
            root: route.root.clone(),
        })
    }
}

impl Route {
    fn from_config(cfg: &RouteConfig, default_limit: u64) -> Self {
        let prefix = match cfg.path.trim_end_matches('/') {
            "" => "/".to_string(),
            p => p.to_string(),
        };

        Self {
            prefix,
            root: cfg.root.clone(),
            index: cfg.index.clone(),
            cgi: cfg.cgi.clone(),
            limits: RouteLimits {
                max_body_size: cfg.max_body_size.unwrap_or(default_limit),
                allowed_methods: cfg.allowed_methods(),
                upload_dir: cfg.upload_dir.clone(),
            },
        }
    }

    /// Maps the part of the URL after the prefix onto the route root.
    fn fs_path(&self, relative: &str) -> Result<PathBuf, ServeError> {
        let mut path = self.root.clone();
        for segment in relative.split('/').filter(|s| !s.is_empty() && *s != ".") {
            if segment == ".." || segment.contains('\\') || segment.contains('\0') {
                return Err(ServeError::Forbidden);
            }
            path.push(segment);
        }
        Ok(path)
    }

    /// Finds the first path segment ending in a configured CGI extension.
    fn cgi_target(&self, path: &str, relative: &str) -> Result<Option<CgiTarget>, ServeError> {
        if self.cgi.is_empty() {
            return Ok(None);
        }

        let mut consumed = 0;
        for segment in relative.split('/') {
            consumed += segment.len();
            let interpreter = self
                .cgi
                .iter()
                .find(|(ext, _)| segment.len() > ext.len() && segment.ends_with(ext.as_str()));

            if let Some((_, interpreter)) = interpreter {
                let script_rel = &relative[..consumed];
                let script_name_len = path.len() - relative.len() + consumed;
                return Ok(Some(CgiTarget {
                    interpreter: interpreter.clone(),
                    script: self.fs_path(script_rel)?,
                    script_name: path[..script_name_len].to_string(),
                    path_info: relative[consumed..].to_string(),
                }));
            }
            consumed += 1;
        }
        Ok(None)
    }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return path.starts_with('/');
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// True when `path` lies inside `root` once both are canonicalised.
///
/// Symlinks are resolved, so a link pointing outside the root is caught
/// here even though the URL looked harmless.
pub fn is_path_safe(root: &Path, path: &Path) -> bool {
    let Ok(root) = root.canonicalize() else {
        return false;
    };
    match path.canonicalize() {
        Ok(resolved) => resolved.starts_with(&root),
        // a missing file is judged by its parent directory
        Err(_) => match (path.parent(), path.file_name()) {
            (Some(parent), Some(_)) => parent
                .canonicalize()
                .map(|p| p.starts_with(&root))
                .unwrap_or(false),
            _ => false,
        },
    }
}
