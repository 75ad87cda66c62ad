use std::path::Path;

use tokio::fs;

use crate::error::ServeError;
use crate::handlers::io_to_serve;
use crate::http::mime;
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::router::is_path_safe;

/// Serves the file at `path`, or `index` inside it when `path` is a directory.
pub async fn serve_static(path: &Path, root: &Path, index: Option<&str>) -> Result<Response, ServeError> {
    let meta = fs::metadata(path).await.map_err(io_to_serve)?;
    if !is_path_safe(root, path) {
        return Err(ServeError::Forbidden);
    }

    let file = if meta.is_dir() {
        // no directory listings
        let index = index.ok_or(ServeError::Forbidden)?;
        let candidate = path.join(index);
        let meta = fs::metadata(&candidate).await.map_err(io_to_serve)?;
        if !meta.is_file() {
            return Err(ServeError::NotFound);
        }
        candidate
    } else {
        path.to_path_buf()
    };

    let body = fs::read(&file).await.map_err(io_to_serve)?;
    Ok(ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Type", mime::from_path(&file))
        .body(body)
        .build())
}
