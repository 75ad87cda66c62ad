//! Storage for decoded multipart uploads.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::ServeError;
use crate::multipart::{MultipartEvent, PartHead};

/// Distinguishes staging files of concurrent uploads within this process.
static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// One part of a finished upload, in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEntry {
    Field {
        name: String,
        value: String,
    },
    File {
        name: String,
        filename: String,
        path: PathBuf,
        size: u64,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadResult {
    pub entries: Vec<UploadEntry>,
}

impl UploadResult {
    /// Field parts as `(name, value)` pairs.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().filter_map(|e| match e {
            UploadEntry::Field { name, value } => Some((name.as_str(), value.as_str())),
            UploadEntry::File { .. } => None,
        })
    }

    /// Stored file names.
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|e| match e {
            UploadEntry::File { filename, .. } => Some(filename.as_str()),
            UploadEntry::Field { .. } => None,
        })
    }

    /// Plain-text summary: a header line, then `name: value` for each field
    /// and the stored name for each file, in the order the parts arrived.
    pub fn summary(&self) -> String {
        let mut out = String::from("Uploaded files:\n");
        for entry in &self.entries {
            match entry {
                UploadEntry::Field { name, value } => {
                    let _ = writeln!(out, "{}: {}", name, value);
                }
                UploadEntry::File { filename, .. } => {
                    let _ = writeln!(out, "{}", filename);
                }
            }
        }
        out
    }
}

enum Current {
    Field { name: String, value: Vec<u8> },
    File {
        name: String,
        filename: String,
        path: PathBuf,
        staging: PathBuf,
        file: File,
        size: u64,
    },
    /// A file part with an empty filename: nothing was chosen client side.
    Skip,
}

/// Consumes [`MultipartEvent`]s for one request.
///
/// File parts stream to hidden staging files in the upload directory;
/// field parts are held in memory. Only [`finish`](Self::finish) moves the
/// staged files onto their final names, so a request that fails part way
/// leaves every previously stored file untouched. [`abort`](Self::abort)
/// removes the staging files.
pub struct UploadSink {
    dir: PathBuf,
    entries: Vec<UploadEntry>,
    /// `(staging, final)` pairs, renamed in part order on success.
    staged: Vec<(PathBuf, PathBuf)>,
    current: Option<Current>,
}

impl UploadSink {
    /// Prepares a sink writing into `dir`, creating the directory if needed.
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, ServeError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        Ok(Self {
            dir,
            entries: Vec::new(),
            staged: Vec::new(),
            current: None,
        })
    }

    pub async fn handle(&mut self, event: MultipartEvent) -> Result<(), ServeError> {
        match event {
            MultipartEvent::PartBegin(head) => {
                self.finish_part().await?;
                self.current = Some(self.begin_part(head).await?);
            }
            MultipartEvent::PartData(data) => match &mut self.current {
                Some(Current::Field { value, .. }) => value.extend_from_slice(&data),
                Some(Current::File { file, size, .. }) => {
                    file.write_all(&data).await?;
                    *size += data.len() as u64;
                }
                Some(Current::Skip) | None => {}
            },
            MultipartEvent::PartEnd => self.finish_part().await?,
        }
        Ok(())
    }

    /// Completes the upload: stored files replace any earlier file of the
    /// same name, in the order their parts arrived.
    ///
    /// On failure the staging files that were not yet moved are removed.
    pub async fn finish(mut self) -> Result<UploadResult, ServeError> {
        if let Err(e) = self.finish_part().await {
            self.abort().await;
            return Err(e);
        }

        let staged = std::mem::take(&mut self.staged);
        for (i, (staging, path)) in staged.iter().enumerate() {
            if let Err(e) = fs::rename(staging, path).await {
                warn!(path = %path.display(), error = %e, "failed to store upload");
                remove_staging(&staged[i..]).await;
                return Err(e.into());
            }
        }

        Ok(UploadResult {
            entries: self.entries,
        })
    }

    /// Drops the upload and removes its staging files.
    pub async fn abort(mut self) {
        // close the open handle before unlinking
        self.current = None;
        remove_staging(&self.staged).await;
    }

    async fn begin_part(&mut self, head: PartHead) -> Result<Current, ServeError> {
        let Some(filename) = head.filename.as_deref() else {
            return Ok(Current::Field {
                name: head.name,
                value: Vec::new(),
            });
        };

        let Some(filename) = sanitize_filename(filename) else {
            debug!(field = %head.name, "skipping file part without a filename");
            return Ok(Current::Skip);
        };

        let path = self.dir.join(&filename);
        let staging = self.dir.join(format!(
            ".{}.{}-{}.upload",
            filename,
            std::process::id(),
            STAGING_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staging)
            .await?;
        self.staged.push((staging.clone(), path.clone()));
        debug!(field = %head.name, path = %path.display(), "staging upload");

        Ok(Current::File {
            name: head.name,
            filename,
            path,
            staging,
            file,
            size: 0,
        })
    }

    async fn finish_part(&mut self) -> Result<(), ServeError> {
        match self.current.take() {
            Some(Current::Field { name, value }) => {
                let value = String::from_utf8_lossy(&value);
                // one trailing CRLF is line framing; anything before it is data
                let value = value.strip_suffix("\r\n").unwrap_or(value.as_ref()).to_string();
                self.entries.push(UploadEntry::Field { name, value });
            }
            Some(Current::File {
                name,
                filename,
                path,
                staging,
                mut file,
                size,
            }) => {
                file.flush().await?;
                file.sync_all().await?;
                debug!(staging = %staging.display(), size, "upload part complete");
                self.entries.push(UploadEntry::File {
                    name,
                    filename,
                    path,
                    size,
                });
            }
            Some(Current::Skip) | None => {}
        }
        Ok(())
    }
}

async fn remove_staging(staged: &[(PathBuf, PathBuf)]) {
    for (staging, _) in staged {
        if let Err(e) = fs::remove_file(staging).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %staging.display(), error = %e, "failed to remove staged upload");
            }
        }
    }
}

/// Reduces a client-supplied filename to its last path component.
///
/// Both `/` and `\` count as separators. Returns `None` when nothing usable
/// remains.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let base = Path::new(base).file_name()?.to_str()?;
    if base.is_empty() || base == "." || base == ".." || base.contains('\0') {
        return None;
    }
    Some(base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_lose_their_directories() {
        assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_filename("C:\\Users\\me\\a.txt").as_deref(), Some("a.txt"));
        assert_eq!(sanitize_filename("demo.txt").as_deref(), Some("demo.txt"));
        assert_eq!(sanitize_filename(""), None);
        assert_eq!(sanitize_filename("dir/"), None);
        assert_eq!(sanitize_filename(".."), None);
    }
}
