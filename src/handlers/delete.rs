use std::path::Path;

use tokio::fs;
use tracing::info;

use crate::error::ServeError;
use crate::handlers::io_to_serve;
use crate::http::response::Response;
use crate::router::is_path_safe;

/// Removes the file at `path`.
///
/// A missing file is 404, so a repeated delete of the same resource
/// answers 404 the second time. Directories are never removed.
pub async fn delete_file(path: &Path, root: &Path) -> Result<Response, ServeError> {
    let meta = fs::symlink_metadata(path).await.map_err(io_to_serve)?;
    if meta.is_dir() || !is_path_safe(root, path) {
        return Err(ServeError::Forbidden);
    }

    fs::remove_file(path).await.map_err(io_to_serve)?;
    info!(path = %path.display(), "deleted");

    Ok(Response::no_content())
}
