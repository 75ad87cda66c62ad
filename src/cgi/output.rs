use memchr::memmem;

use crate::cgi::CgiError;
use crate::http::headers::HeaderMap;
use crate::http::response::{Response, ResponseBuilder, StatusCode};

/// Cap on the CGI header block.
const MAX_CGI_HEADERS: usize = 16 * 1024;

/// Parsed CGI response: document headers plus body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgiOutput {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl CgiOutput {
    /// Converts into a response, dropping the CGI-only `Status` field and
    /// fixing up a `Content-Length` that does not match the body.
    pub fn into_response(self) -> Response {
        let mut builder = ResponseBuilder::new(self.status);
        for (name, value) in self.headers.iter() {
            if name.eq_ignore_ascii_case("Status") {
                continue;
            }
            if name.eq_ignore_ascii_case("Content-Length")
                && value.trim().parse::<usize>().ok() != Some(self.body.len())
            {
                continue;
            }
            builder = builder.append_header(name, value);
        }
        builder.body(self.body).build()
    }
}

/// Splits raw script output at the first blank line.
///
/// Either `\r\n\r\n` or `\n\n` ends the header block. The block must hold
/// `Content-Type` (or `Location` for a redirect); `Status: 404 Not Found`
/// selects the response status.
pub fn parse_cgi_output(raw: &[u8]) -> Result<CgiOutput, CgiError> {
    let crlf = memmem::find(raw, b"\r\n\r\n").map(|p| (p, 4));
    let lf = memmem::find(raw, b"\n\n").map(|p| (p, 2));
    let (end, sep) = match (crlf, lf) {
        (Some(a), Some(b)) => {
            if a.0 <= b.0 {
                a
            } else {
                b
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => {
            return Err(CgiError::Protocol("header block never terminated".to_string()));
        }
    };
    if end > MAX_CGI_HEADERS {
        return Err(CgiError::Protocol("header block too large".to_string()));
    }

    let block = std::str::from_utf8(&raw[..end])
        .map_err(|_| CgiError::Protocol("header block is not UTF-8".to_string()))?;

    let mut headers = HeaderMap::new();
    for line in block.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| CgiError::Protocol(format!("malformed header line {:?}", line)))?;
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(CgiError::Protocol(format!("malformed header name {:?}", name)));
        }
        headers.append(name, value.trim());
    }

    let status = match headers.get("Status") {
        Some(value) => parse_status(value)?,
        None if headers.contains_key("Location") => StatusCode::Found,
        None => StatusCode::Ok,
    };
    if !headers.contains_key("Content-Type") && !headers.contains_key("Location") {
        return Err(CgiError::Protocol("missing Content-Type".to_string()));
    }

    Ok(CgiOutput {
        status,
        headers,
        body: raw[end + sep..].to_vec(),
    })
}

fn parse_status(value: &str) -> Result<StatusCode, CgiError> {
    let code = value
        .split_whitespace()
        .next()
        .and_then(|c| c.parse::<u16>().ok())
        .filter(|c| (100..600).contains(c))
        .ok_or_else(|| CgiError::Protocol(format!("invalid Status {:?}", value)))?;
    Ok(StatusCode::from_u16(code))
}
