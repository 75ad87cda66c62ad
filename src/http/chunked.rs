use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::error::ServeError;
use crate::http::body::fill_body;
use crate::http::reader::ByteStreamReader;

/// Cap on a chunk-size line or a trailer line.
const MAX_CHUNK_LINE: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data { remaining: u64 },
    DataEnd,
    Trailers,
    Done,
}

/// Pull decoder for `Transfer-Encoding: chunked`.
///
/// Each call hands back the next run of decoded payload bytes as soon as
/// they are buffered, so callers can count and reject bytes before the
/// rest of the body arrives.
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: ChunkState,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: ChunkState::Size }
    }

    pub fn is_done(&self) -> bool {
        self.state == ChunkState::Done
    }

    pub async fn next_chunk<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut ByteStreamReader<R>,
    ) -> Result<Option<Bytes>, ServeError> {
        loop {
            match self.state {
                ChunkState::Size => {
                    let line = reader
                        .read_line(MAX_CHUNK_LINE)
                        .await?
                        .ok_or(ServeError::TruncatedBody)?;
                    let size = parse_chunk_size(&line)?;
                    self.state = if size == 0 {
                        ChunkState::Trailers
                    } else {
                        ChunkState::Data { remaining: size }
                    };
                }
                ChunkState::Data { remaining } => {
                    if reader.buffered().is_empty() {
                        fill_body(reader).await?;
                    }
                    let want = usize::try_from(remaining).unwrap_or(usize::MAX);
                    let chunk = reader.take(want);
                    let left = remaining - chunk.len() as u64;
                    self.state = if left == 0 {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data { remaining: left }
                    };
                    return Ok(Some(chunk));
                }
                ChunkState::DataEnd => {
                    let line = reader
                        .read_line(MAX_CHUNK_LINE)
                        .await?
                        .ok_or(ServeError::TruncatedBody)?;
                    if !line.is_empty() {
                        return Err(ServeError::MalformedRequest(
                            "chunk data not followed by CRLF".to_string(),
                        ));
                    }
                    self.state = ChunkState::Size;
                }
                ChunkState::Trailers => {
                    let line = reader
                        .read_line(MAX_CHUNK_LINE)
                        .await?
                        .ok_or(ServeError::TruncatedBody)?;
                    // trailer fields are read and dropped
                    if line.is_empty() {
                        self.state = ChunkState::Done;
                    }
                }
                ChunkState::Done => return Ok(None),
            }
        }
    }
}

/// Parses a chunk-size line, ignoring any `;extension`.
pub fn parse_chunk_size(line: &[u8]) -> Result<u64, ServeError> {
    let size = match memchr::memchr(b';', line) {
        Some(pos) => &line[..pos],
        None => line,
    };
    let size = std::str::from_utf8(size)
        .map_err(|_| ServeError::MalformedRequest("invalid chunk size".to_string()))?
        .trim_matches(|c| c == ' ' || c == '\t');

    if size.is_empty() || size.len() > 16 || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ServeError::MalformedRequest(format!("invalid chunk size {:?}", size)));
    }
    u64::from_str_radix(size, 16)
        .map_err(|_| ServeError::MalformedRequest("invalid chunk size".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_accepts_extensions() {
        assert_eq!(parse_chunk_size(b"1a;name=value").unwrap(), 26);
        assert_eq!(parse_chunk_size(b"0").unwrap(), 0);
    }

    #[test]
    fn chunk_size_rejects_garbage() {
        assert!(parse_chunk_size(b"").is_err());
        assert!(parse_chunk_size(b"zz").is_err());
        assert!(parse_chunk_size(b"11111111111111111").is_err());
    }
}
