use bytes::{Buf, Bytes, BytesMut};
use memchr::memmem;

use crate::http::headers::HeaderMap;
use crate::multipart::{MultipartError, MultipartLimits, PartHead};

/// Transport padding allowed between a delimiter and its CRLF.
const MAX_DELIMITER_PADDING: usize = 64;

#[derive(Debug)]
pub enum MultipartEvent {
    /// A part header block was parsed; payload events follow.
    PartBegin(PartHead),
    /// A run of payload bytes for the current part.
    PartData(Bytes),
    /// The current part's payload is complete.
    PartEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Skipping anything before the first delimiter.
    Preamble,
    /// Just past `--boundary`: either `--` (close) or CRLF (next part).
    DelimiterTail,
    Headers,
    Data,
    Done,
}

/// Incremental `multipart/form-data` decoder.
///
/// Bytes go in through [`feed`](Self::feed); events come out of
/// [`next_event`](Self::next_event) until it returns `Ok(None)`, which means
/// either more input is needed or the closing delimiter was seen
/// ([`is_done`](Self::is_done)). Payload is released as soon as it cannot be
/// the start of a delimiter, so part sizes are checked on the bytes that
/// have arrived, not on a buffered whole.
#[derive(Debug)]
pub struct MultipartDecoder {
    /// `--boundary`
    delimiter: Vec<u8>,
    /// `\r\n--boundary`
    part_delimiter: Vec<u8>,
    buf: BytesMut,
    state: State,
    limits: MultipartLimits,
    total: u64,
    part_size: u64,
    parts: usize,
}

impl MultipartDecoder {
    pub fn new(boundary: &str, limits: MultipartLimits) -> Self {
        let delimiter = [b"--".as_slice(), boundary.as_bytes()].concat();
        let part_delimiter = [b"\r\n".as_slice(), &delimiter].concat();

        Self {
            delimiter,
            part_delimiter,
            buf: BytesMut::new(),
            state: State::Preamble,
            limits,
            total: 0,
            part_size: 0,
            parts: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Appends body bytes. Input after the closing delimiter is ignored.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), MultipartError> {
        if self.state == State::Done {
            return Ok(());
        }

        self.total += data.len() as u64;
        let limit = self.limits.max_total_size;
        if limit > 0 && self.total > limit {
            return Err(MultipartError::BodyTooLarge { limit });
        }

        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Checks that the body ended cleanly, after the last byte has been fed.
    pub fn finish(&self) -> Result<(), MultipartError> {
        if self.is_done() {
            Ok(())
        } else {
            Err(MultipartError::Truncated)
        }
    }

    pub fn next_event(&mut self) -> Result<Option<MultipartEvent>, MultipartError> {
        loop {
            match self.state {
                State::Preamble => {
                    if !self.skip_preamble() {
                        return Ok(None);
                    }
                }
                State::DelimiterTail => {
                    if !self.delimiter_tail()? {
                        return Ok(None);
                    }
                }
                State::Headers => return self.part_headers(),
                State::Data => return self.part_data(),
                State::Done => return Ok(None),
            }
        }
    }

    /// Drops preamble bytes up to the first delimiter at the start of a line.
    fn skip_preamble(&mut self) -> bool {
        if self.buf.starts_with(&self.delimiter) {
            self.buf.advance(self.delimiter.len());
            self.state = State::DelimiterTail;
            return true;
        }

        match memmem::find(&self.buf, &self.part_delimiter) {
            Some(pos) => {
                self.buf.advance(pos + self.part_delimiter.len());
                self.state = State::DelimiterTail;
                true
            }
            None => {
                // keep a tail that could still grow into a delimiter
                let keep = self.part_delimiter.len() - 1;
                if self.buf.len() > keep && !self.delimiter.starts_with(&self.buf) {
                    let drop = self.buf.len() - keep;
                    self.buf.advance(drop);
                }
                false
            }
        }
    }

    fn delimiter_tail(&mut self) -> Result<bool, MultipartError> {
        if self.buf.len() < 2 {
            return Ok(false);
        }
        if self.buf.starts_with(b"--") {
            self.buf.clear();
            self.state = State::Done;
            return Ok(true);
        }

        let padding = self
            .buf
            .iter()
            .take_while(|b| **b == b' ' || **b == b'\t')
            .count();
        if padding > MAX_DELIMITER_PADDING {
            return Err(MultipartError::MalformedDelimiter);
        }
        if self.buf.len() < padding + 2 {
            return Ok(false);
        }
        if &self.buf[padding..padding + 2] != b"\r\n" {
            return Err(MultipartError::MalformedDelimiter);
        }
        self.buf.advance(padding + 2);

        self.parts += 1;
        if self.parts > self.limits.max_parts {
            return Err(MultipartError::TooManyParts(self.limits.max_parts));
        }
        self.state = State::Headers;
        Ok(true)
    }

    fn part_headers(&mut self) -> Result<Option<MultipartEvent>, MultipartError> {
        if self.buf.starts_with(b"\r\n") {
            // a part with no header lines at all cannot name itself
            return Err(MultipartError::MissingDisposition);
        }

        let end = match memmem::find(&self.buf, b"\r\n\r\n") {
            Some(end) => end,
            None => {
                if self.buf.len() > self.limits.max_header_size {
                    return Err(MultipartError::PartHeadersTooLarge(self.limits.max_header_size));
                }
                return Ok(None);
            }
        };
        if end > self.limits.max_header_size {
            return Err(MultipartError::PartHeadersTooLarge(self.limits.max_header_size));
        }

        let block = self.buf.split_to(end + 4);
        let head = PartHead::from_headers(parse_part_headers(&block[..end])?)?;

        self.part_size = 0;
        self.state = State::Data;
        Ok(Some(MultipartEvent::PartBegin(head)))
    }

    fn part_data(&mut self) -> Result<Option<MultipartEvent>, MultipartError> {
        let (available, at_delimiter) = match memmem::find(&self.buf, &self.part_delimiter) {
            Some(pos) => (pos, true),
            None => (
                self.buf.len().saturating_sub(self.part_delimiter.len() - 1),
                false,
            ),
        };

        if available > 0 {
            self.part_size += available as u64;
            let limit = self.limits.max_part_size;
            if limit > 0 && self.part_size > limit {
                return Err(MultipartError::PartTooLarge { limit });
            }
            let data = self.buf.split_to(available).freeze();
            return Ok(Some(MultipartEvent::PartData(data)));
        }

        if at_delimiter {
            self.buf.advance(self.part_delimiter.len());
            self.state = State::DelimiterTail;
            return Ok(Some(MultipartEvent::PartEnd));
        }
        Ok(None)
    }
}

fn parse_part_headers(block: &[u8]) -> Result<HeaderMap, MultipartError> {
    let text = std::str::from_utf8(block).map_err(|_| MultipartError::MalformedPartHeaders)?;

    let mut headers = HeaderMap::new();
    for line in text.split("\r\n") {
        let (name, value) = line
            .split_once(':')
            .ok_or(MultipartError::MalformedPartHeaders)?;
        let name = name.trim();
        if name.is_empty() || name.contains([' ', '\t', '\r', '\n']) {
            return Err(MultipartError::MalformedPartHeaders);
        }
        headers.append(name, value.trim());
    }
    Ok(headers)
}
