//! Filesystem-backed handlers: static files and deletes.
//!
//! Both receive a path the router already mapped under the route root and
//! re-check it against the canonical root, which also catches symlinks.

mod delete;
mod static_files;

pub use delete::delete_file;
pub use static_files::serve_static;

use std::io;

use crate::error::ServeError;

fn io_to_serve(err: io::Error) -> ServeError {
    match err.kind() {
        io::ErrorKind::NotFound => ServeError::NotFound,
        io::ErrorKind::PermissionDenied => ServeError::Forbidden,
        _ => ServeError::Io(err),
    }
}
