use std::io;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

use crate::error::ServeError;
use crate::http::parser::{HeadParser, ParseError};
use crate::http::request::Request;

/// Size of each read issued against the underlying stream
const READ_CHUNK: usize = 8192;

/// Buffers raw bytes from a connection.
///
/// Reads never wait for more than one chunk of socket data: callers look at
/// what has arrived, consume what they can use, and ask for more only when
/// they need it. Whatever is left in the buffer after a request has been
/// handled is the start of the next request.
pub struct ByteStreamReader<R> {
    inner: R,
    buf: BytesMut,
    read_timeout: Duration,
    eof: bool,
}

impl<R: AsyncRead + Unpin> ByteStreamReader<R> {
    pub fn new(inner: R, read_timeout: Duration) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK),
            read_timeout,
            eof: false,
        }
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Takes up to `max` buffered bytes without touching the stream.
    pub fn take(&mut self, max: usize) -> Bytes {
        let n = max.min(self.buf.len());
        self.buf.split_to(n).freeze()
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Reads one more chunk from the stream into the buffer.
    ///
    /// Returns the number of bytes added; zero means the peer closed its
    /// side. A read that stalls past the configured timeout fails with
    /// `ErrorKind::TimedOut`.
    pub async fn fill(&mut self) -> io::Result<usize> {
        if self.eof {
            return Ok(0);
        }
        self.buf.reserve(READ_CHUNK);

        let n = timeout(self.read_timeout, self.inner.read_buf(&mut self.buf))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "client read timed out"))??;

        if n == 0 {
            self.eof = true;
        }
        Ok(n)
    }

    /// Reads a CRLF-terminated line, returning it without the terminator.
    ///
    /// `Ok(None)` means the stream ended before a full line arrived. Lines
    /// longer than `max` are rejected without buffering further.
    pub async fn read_line(&mut self, max: usize) -> Result<Option<Bytes>, ServeError> {
        let mut searched = 0;
        loop {
            if let Some(pos) = memchr::memchr(b'\n', &self.buf[searched..]) {
                let end = searched + pos;
                if end > max {
                    return Err(ServeError::MalformedRequest("line too long".to_string()));
                }
                if end == 0 || self.buf[end - 1] != b'\r' {
                    return Err(ServeError::MalformedRequest("bare LF in line".to_string()));
                }
                let mut line = self.buf.split_to(end + 1);
                line.truncate(end - 1);
                return Ok(Some(line.freeze()));
            }
            if self.buf.len() > max {
                return Err(ServeError::MalformedRequest("line too long".to_string()));
            }
            searched = self.buf.len();

            match self.fill().await {
                Ok(0) => return Ok(None),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Reads the next request head.
    ///
    /// `Ok(None)` is a clean end of the connection: the peer closed, or went
    /// idle, before sending any byte of a new request.
    pub async fn read_head(&mut self, parser: &mut HeadParser) -> Result<Option<Request>, ServeError> {
        loop {
            if !self.buf.is_empty() {
                match parser.parse(&self.buf) {
                    Ok((request, consumed)) => {
                        self.buf.advance(consumed);
                        return Ok(Some(request));
                    }
                    Err(ParseError::Incomplete) => {}
                    Err(e) => return Err(e.into()),
                }
            }

            let idle = self.buf.iter().all(|b| *b == b'\r' || *b == b'\n');
            match self.fill().await {
                Ok(0) if idle => return Ok(None),
                Ok(0) => {
                    return Err(ServeError::MalformedRequest(
                        "connection closed inside request head".to_string(),
                    ));
                }
                Ok(_) => {}
                Err(e) if idle && e.kind() == io::ErrorKind::TimedOut => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_line_strips_crlf_and_keeps_rest() {
        let data: &[u8] = b"5;ext=1\r\nhello";
        let mut reader = ByteStreamReader::new(data, Duration::from_secs(1));

        let line = reader.read_line(64).await.unwrap().unwrap();
        assert_eq!(&line[..], b"5;ext=1");
        assert_eq!(reader.buffered(), b"hello");
    }

    #[tokio::test]
    async fn read_line_reports_eof() {
        let data: &[u8] = b"partial";
        let mut reader = ByteStreamReader::new(data, Duration::from_secs(1));

        assert!(reader.read_line(64).await.unwrap().is_none());
    }
}
