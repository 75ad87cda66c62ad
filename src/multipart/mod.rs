//! `multipart/form-data` decoding (RFC 7578 over RFC 2046 §5.1).
//!
//! [`MultipartDecoder`] is fed body bytes as they arrive and produces a
//! stream of [`MultipartEvent`]s. It never holds more than one unfinished
//! header block or a delimiter-sized tail of payload, and it enforces its
//! [`MultipartLimits`] on the bytes it has seen so far.

mod decoder;

pub use decoder::{MultipartDecoder, MultipartEvent};

use thiserror::Error;

use crate::http::headers::HeaderMap;

/// Longest boundary RFC 2046 allows.
pub const MAX_BOUNDARY_LEN: usize = 70;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MultipartError {
    #[error("content type is not multipart/form-data")]
    NotMultipart,
    #[error("multipart content type has no boundary parameter")]
    MissingBoundary,
    #[error("invalid multipart boundary")]
    InvalidBoundary,
    #[error("malformed multipart delimiter line")]
    MalformedDelimiter,
    #[error("malformed part headers")]
    MalformedPartHeaders,
    #[error("part headers exceed {0} bytes")]
    PartHeadersTooLarge(usize),
    #[error("part has no form-data Content-Disposition")]
    MissingDisposition,
    #[error("part has no name")]
    MissingName,
    #[error("more than {0} parts")]
    TooManyParts(usize),
    #[error("part exceeds {limit} bytes")]
    PartTooLarge { limit: u64 },
    #[error("multipart body exceeds {limit} bytes")]
    BodyTooLarge { limit: u64 },
    #[error("multipart body ended before the closing delimiter")]
    Truncated,
}

/// Limits applied while decoding. Zero disables a size limit.
#[derive(Debug, Clone, Copy)]
pub struct MultipartLimits {
    pub max_part_size: u64,
    pub max_total_size: u64,
    pub max_parts: usize,
    pub max_header_size: usize,
}

impl MultipartLimits {
    /// Limits where both the whole body and any single part may use `max_body_size`.
    pub fn for_body(max_body_size: u64) -> Self {
        Self {
            max_part_size: max_body_size,
            max_total_size: max_body_size,
            ..Self::default()
        }
    }
}

impl Default for MultipartLimits {
    fn default() -> Self {
        Self {
            max_part_size: 0,
            max_total_size: 0,
            max_parts: 100,
            max_header_size: 8 * 1024,
        }
    }
}

/// Header block of one part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartHead {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub headers: HeaderMap,
}

impl PartHead {
    /// A part carrying a `filename` attribute is a file part; all others are fields.
    pub fn is_file(&self) -> bool {
        self.filename.is_some()
    }

    pub(crate) fn from_headers(headers: HeaderMap) -> Result<Self, MultipartError> {
        let disposition = headers
            .get("Content-Disposition")
            .ok_or(MultipartError::MissingDisposition)?;

        let (kind, params) = split_params(disposition);
        if !kind.eq_ignore_ascii_case("form-data") {
            return Err(MultipartError::MissingDisposition);
        }

        let mut name = None;
        let mut filename = None;
        for (key, value) in params {
            if key.eq_ignore_ascii_case("name") {
                name = Some(value);
            } else if key.eq_ignore_ascii_case("filename") {
                filename = Some(value);
            }
        }

        let name = name
            .filter(|n| !n.is_empty())
            .ok_or(MultipartError::MissingName)?;
        let content_type = headers.get("Content-Type").map(str::to_string);

        Ok(Self {
            name,
            filename,
            content_type,
            headers,
        })
    }
}

/// Extracts the boundary token from a request `Content-Type`.
///
/// The media type must be `multipart/form-data` and the `boundary`
/// parameter must be present, 1 to 70 characters long, and made only of
/// RFC 2046 boundary characters.
pub fn boundary_from_content_type(content_type: Option<&str>) -> Result<String, MultipartError> {
    let content_type = content_type.ok_or(MultipartError::NotMultipart)?;
    let (media_type, params) = split_params(content_type);
    if !media_type.eq_ignore_ascii_case("multipart/form-data") {
        return Err(MultipartError::NotMultipart);
    }

    let boundary = params
        .into_iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("boundary"))
        .map(|(_, v)| v)
        .ok_or(MultipartError::MissingBoundary)?;

    if boundary.is_empty()
        || boundary.len() > MAX_BOUNDARY_LEN
        || boundary.ends_with(' ')
        || !boundary.bytes().all(is_boundary_char)
    {
        return Err(MultipartError::InvalidBoundary);
    }
    Ok(boundary)
}

fn is_boundary_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"'()+_,-./:=? ".contains(&b)
}

/// Splits `value; key=value; key="quoted value"` into the leading value and
/// its parameters. Quoted values may contain `;` and backslash escapes.
pub(crate) fn split_params(header: &str) -> (String, Vec<(String, String)>) {
    let (head, rest) = match header.find(';') {
        Some(pos) => (&header[..pos], &header[pos + 1..]),
        None => (header, ""),
    };

    let mut params = Vec::new();
    let mut chars = rest.chars().peekable();
    loop {
        while chars.peek().is_some_and(|c| *c == ' ' || *c == '\t' || *c == ';') {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ';' {
                break;
            }
            key.push(c);
            chars.next();
        }

        let mut value = String::new();
        if chars.peek() == Some(&'=') {
            chars.next();
            if chars.peek() == Some(&'"') {
                chars.next();
                while let Some(c) = chars.next() {
                    match c {
                        '"' => break,
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        _ => value.push(c),
                    }
                }
                // skip anything between the closing quote and the next ';'
                while chars.peek().is_some_and(|c| *c != ';') {
                    chars.next();
                }
            } else {
                while let Some(&c) = chars.peek() {
                    if c == ';' {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
                value = value.trim().to_string();
            }
        }

        let key = key.trim();
        if !key.is_empty() {
            params.push((key.to_string(), value));
        }
    }

    (head.trim().to_string(), params)
}
