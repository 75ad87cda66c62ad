use thiserror::Error;

use crate::http::body::BodyKind;
use crate::http::headers::HeaderMap;
use crate::http::request::{Method, Request};

/// Upper bound on the whole header block, request line included.
pub const MAX_HEAD_SIZE: usize = 32 * 1024;
/// Upper bound on any single line of the header block.
pub const MAX_LINE_SIZE: usize = 8 * 1024;
/// Upper bound on the number of header fields.
pub const MAX_HEADERS: usize = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed request line")]
    InvalidRequest,
    #[error("unknown method token")]
    InvalidMethod,
    #[error("invalid request target")]
    InvalidTarget,
    #[error("unsupported HTTP version")]
    InvalidVersion,
    #[error("malformed header line")]
    InvalidHeader,
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("unsupported Transfer-Encoding")]
    UnsupportedTransferEncoding,
    #[error("both Content-Length and Transfer-Encoding present")]
    ConflictingFraming,
    #[error("header block too large")]
    HeadersTooLarge,
    /// Not an error: more bytes are needed before the head can be parsed.
    #[error("incomplete request head")]
    Incomplete,
}

/// Resumable scanner for a request head.
///
/// Bytes are handed over as the connection delivers them. The scanner
/// remembers how far it already searched for the blank line, so feeding a
/// head one byte at a time stays linear.
#[derive(Debug, Default)]
pub struct HeadParser {
    scanned: usize,
}

impl HeadParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to parse a head from the start of `buf`.
    ///
    /// Returns the request and the number of bytes it occupied, or
    /// `ParseError::Incomplete` when the blank line has not arrived yet.
    /// Nothing past the blank line is inspected; those bytes belong to the body.
    pub fn parse(&mut self, buf: &[u8]) -> Result<(Request, usize), ParseError> {
        // Leading empty lines before a request line are tolerated.
        let skip = leading_crlfs(buf);
        let head = &buf[skip..];

        let from = self.scanned.saturating_sub(skip).saturating_sub(3);
        match find_headers_end(head, from) {
            Some(end) => {
                self.scanned = 0;
                if end > MAX_HEAD_SIZE {
                    return Err(ParseError::HeadersTooLarge);
                }
                let request = parse_head_block(&head[..end])?;
                Ok((request, skip + end + 4))
            }
            None => {
                self.scanned = buf.len();
                check_partial_limits(buf)?;
                Err(ParseError::Incomplete)
            }
        }
    }
}

/// One-shot convenience wrapper around [`HeadParser`].
pub fn parse_request_head(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    HeadParser::new().parse(buf)
}

/// Decides how the body of `req` is framed.
///
/// Duplicate `Content-Length` values must agree, `Transfer-Encoding` may
/// only be `chunked`, and the two may not be combined.
pub fn body_kind(req: &Request) -> Result<BodyKind, ParseError> {
    let mut length: Option<u64> = None;
    for value in req.headers.get_all("Content-Length") {
        for item in value.split(',') {
            let parsed = parse_content_length(item.trim())?;
            match length {
                Some(existing) if existing != parsed => {
                    return Err(ParseError::InvalidContentLength);
                }
                _ => length = Some(parsed),
            }
        }
    }

    let mut chunked = false;
    for value in req.headers.get_all("Transfer-Encoding") {
        for coding in value.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            if !coding.eq_ignore_ascii_case("chunked") || chunked {
                return Err(ParseError::UnsupportedTransferEncoding);
            }
            chunked = true;
        }
    }

    match (chunked, length) {
        (true, Some(_)) => Err(ParseError::ConflictingFraming),
        (true, None) => Ok(BodyKind::Chunked),
        (false, Some(n)) => Ok(BodyKind::Fixed(n)),
        (false, None) => Ok(BodyKind::Fixed(0)),
    }
}

fn parse_content_length(value: &str) -> Result<u64, ParseError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidContentLength);
    }
    value.parse().map_err(|_| ParseError::InvalidContentLength)
}

fn parse_head_block(block: &[u8]) -> Result<Request, ParseError> {
    let text = std::str::from_utf8(block).map_err(|_| ParseError::InvalidRequest)?;
    let mut lines = text.split("\r\n");

    // Request line: exactly three tokens separated by single spaces
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    if request_line.len() > MAX_LINE_SIZE {
        return Err(ParseError::HeadersTooLarge);
    }
    let mut parts = request_line.split(' ');
    let (method_str, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v), None) if !m.is_empty() && !t.is_empty() && !v.is_empty() => {
            (m, t, v)
        }
        _ => return Err(ParseError::InvalidRequest),
    };
    if has_control_chars(request_line) {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;
    if version != "HTTP/1.1" && version != "HTTP/1.0" {
        return Err(ParseError::InvalidVersion);
    }
    let (path, query) = split_target(target)?;

    let mut headers = HeaderMap::new();
    for line in lines {
        if line.len() > MAX_LINE_SIZE || headers.len() >= MAX_HEADERS {
            return Err(ParseError::HeadersTooLarge);
        }
        // obs-fold is not accepted
        if line.starts_with(' ') || line.starts_with('\t') {
            return Err(ParseError::InvalidHeader);
        }

        let (name, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        if !is_token(name) {
            return Err(ParseError::InvalidHeader);
        }
        let value = value.trim_matches(|c| c == ' ' || c == '\t');
        if has_control_chars(value) {
            return Err(ParseError::InvalidHeader);
        }

        headers.append(name, value);
    }

    Ok(Request {
        method,
        target: target.to_string(),
        path,
        query,
        version: version.to_string(),
        headers,
    })
}

/// Splits a request target into a normalised path and a raw query string.
///
/// Both origin-form (`/a/b?x=1`) and absolute-form (`http://host/a`) are
/// accepted; dot segments are resolved so `/a/../b` becomes `/b`.
pub fn split_target(target: &str) -> Result<(String, String), ParseError> {
    if !target.starts_with('/') && !target.starts_with("http://") {
        return Err(ParseError::InvalidTarget);
    }
    if target.starts_with("//") {
        return Err(ParseError::InvalidTarget);
    }

    let base = url::Url::parse("http://localhost/").map_err(|_| ParseError::InvalidTarget)?;
    let url = base.join(target).map_err(|_| ParseError::InvalidTarget)?;

    Ok((url.path().to_string(), url.query().unwrap_or("").to_string()))
}

fn check_partial_limits(head: &[u8]) -> Result<(), ParseError> {
    if head.len() > MAX_HEAD_SIZE {
        return Err(ParseError::HeadersTooLarge);
    }
    let line_start = memchr::memmem::rfind(head, b"\r\n").map(|p| p + 2).unwrap_or(0);
    if head.len() - line_start > MAX_LINE_SIZE {
        return Err(ParseError::HeadersTooLarge);
    }
    Ok(())
}

fn leading_crlfs(buf: &[u8]) -> usize {
    let mut i = 0;
    while buf[i..].starts_with(b"\r\n") {
        i += 2;
    }
    i
}

fn find_headers_end(buf: &[u8], from: usize) -> Option<usize> {
    if from >= buf.len() {
        return None;
    }
    // A head without header fields ends at the first CRLF pair.
    memchr::memmem::find(&buf[from..], b"\r\n\r\n").map(|p| p + from)
}

fn is_token(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}

fn has_control_chars(s: &str) -> bool {
    s.bytes().any(|b| (b < 0x20 && b != b'\t') || b == 0x7f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";

        let (parsed, consumed) = parse_request_head(req).unwrap();

        assert_eq!(parsed.path, "/");
        assert_eq!(parsed.headers.get("Host").unwrap(), "example.com");
        assert_eq!(consumed, req.len());
    }

    #[test]
    fn resumes_across_split_reads() {
        let full = b"POST /upload HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc";
        let mut parser = HeadParser::new();

        for end in 1..full.len() - 3 {
            assert_eq!(parser.parse(&full[..end]).unwrap_err(), ParseError::Incomplete);
        }
        let (req, consumed) = parser.parse(full).unwrap();
        assert_eq!(req.method, Method::POST);
        assert_eq!(&full[consumed..], b"abc");
    }

    #[test]
    fn dot_segments_are_resolved() {
        let (path, query) = split_target("/static/../cgi-bin/env.py?a=1").unwrap();
        assert_eq!(path, "/cgi-bin/env.py");
        assert_eq!(query, "a=1");
    }
}
