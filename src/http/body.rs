use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::error::ServeError;
use crate::http::chunked::ChunkedDecoder;
use crate::http::reader::ByteStreamReader;

/// How the body of a request is framed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BodyKind {
    /// A fixed body length set by the `Content-Length` header.
    /// Requests without a body have the value `Fixed(0)`.
    Fixed(u64),
    /// A chunked body set by `Transfer-Encoding: chunked`.
    Chunked,
}

enum Framing {
    Fixed { remaining: u64 },
    Chunked(ChunkedDecoder),
}

/// Delivers the body of one request off a [`ByteStreamReader`].
///
/// The configured limit is enforced while bytes arrive: a declared length
/// over the limit is refused before anything is read, and a chunked body is
/// refused the moment its running total crosses the limit. A limit of zero
/// disables the check.
///
/// Once the body has been fully read the underlying reader is positioned at
/// the first byte of the next request.
pub struct BodyReader<'a, R> {
    reader: &'a mut ByteStreamReader<R>,
    framing: Framing,
    limit: u64,
    received: u64,
}

impl<'a, R: AsyncRead + Unpin> BodyReader<'a, R> {
    pub fn new(
        reader: &'a mut ByteStreamReader<R>,
        kind: BodyKind,
        limit: u64,
    ) -> Result<Self, ServeError> {
        let framing = match kind {
            BodyKind::Fixed(n) => {
                if limit > 0 && n > limit {
                    return Err(ServeError::PayloadTooLarge { limit });
                }
                Framing::Fixed { remaining: n }
            }
            BodyKind::Chunked => Framing::Chunked(ChunkedDecoder::new()),
        };

        Ok(Self {
            reader,
            framing,
            limit,
            received: 0,
        })
    }

    /// Bytes of decoded body delivered so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn is_complete(&self) -> bool {
        match &self.framing {
            Framing::Fixed { remaining } => *remaining == 0,
            Framing::Chunked(decoder) => decoder.is_done(),
        }
    }

    /// Returns the next run of body bytes, or `None` once the body is complete.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, ServeError> {
        let chunk = match &mut self.framing {
            Framing::Fixed { remaining } => {
                if *remaining == 0 {
                    return Ok(None);
                }
                if self.reader.buffered().is_empty() {
                    fill_body(&mut *self.reader).await?;
                }
                let want = usize::try_from(*remaining).unwrap_or(usize::MAX);
                let chunk = self.reader.take(want);
                *remaining -= chunk.len() as u64;
                chunk
            }
            Framing::Chunked(decoder) => match decoder.next_chunk(&mut *self.reader).await? {
                Some(chunk) => chunk,
                None => return Ok(None),
            },
        };

        self.received += chunk.len() as u64;
        if self.limit > 0 && self.received > self.limit {
            return Err(ServeError::PayloadTooLarge { limit: self.limit });
        }
        Ok(Some(chunk))
    }

    /// Reads the remaining body into memory, still bounded by the limit.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, ServeError> {
        let mut body = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    /// Reads and discards the rest of the body.
    pub async fn drain(&mut self) -> Result<(), ServeError> {
        while self.next_chunk().await?.is_some() {}
        Ok(())
    }
}

/// Pulls more body bytes into the reader; a closed, reset or stalled
/// connection means the body was cut short.
pub(crate) async fn fill_body<R: AsyncRead + Unpin>(
    reader: &mut ByteStreamReader<R>,
) -> Result<(), ServeError> {
    match reader.fill().await {
        Ok(0) => Err(ServeError::TruncatedBody),
        Ok(_) => Ok(()),
        Err(e) => {
            tracing::debug!(error = %e, "body read failed");
            Err(ServeError::TruncatedBody)
        }
    }
}
