//! Request-level failures and their HTTP status mapping.
//!
//! Every error raised while parsing, decoding, routing or executing a
//! request ends up as a [`ServeError`]. Each one terminates the current
//! request only; the connection answers with [`ServeError::status`] and is
//! then closed.

use thiserror::Error;

use crate::cgi::CgiError;
use crate::http::parser::ParseError;
use crate::http::request::Method;
use crate::http::response::StatusCode;
use crate::multipart::MultipartError;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("request body ended before the declared length")]
    TruncatedBody,

    #[error("multipart body ended before the closing delimiter")]
    TruncatedMultipart,

    #[error("payload exceeds the configured limit of {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("path escapes the route root or targets a directory")]
    Forbidden,

    #[error("no such route or resource")]
    NotFound,

    #[error("method {method} not allowed")]
    MethodNotAllowed { method: Method, allow: Vec<Method> },

    #[error("CGI protocol error: {0}")]
    CgiProtocol(String),

    #[error("CGI script did not finish in time")]
    CgiTimeout,

    #[error("failed to run CGI script: {0}")]
    CgiSpawn(std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServeError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServeError::MalformedRequest(_)
            | ServeError::TruncatedBody
            | ServeError::TruncatedMultipart => StatusCode::BadRequest,
            ServeError::PayloadTooLarge { .. } => StatusCode::PayloadTooLarge,
            ServeError::Forbidden => StatusCode::Forbidden,
            ServeError::NotFound => StatusCode::NotFound,
            ServeError::MethodNotAllowed { .. } => StatusCode::MethodNotAllowed,
            ServeError::CgiProtocol(_) | ServeError::CgiTimeout => StatusCode::BadGateway,
            ServeError::CgiSpawn(_) | ServeError::Io(_) => StatusCode::InternalServerError,
        }
    }
}

impl From<ParseError> for ServeError {
    fn from(err: ParseError) -> Self {
        ServeError::MalformedRequest(err.to_string())
    }
}

impl From<MultipartError> for ServeError {
    fn from(err: MultipartError) -> Self {
        match err {
            MultipartError::PartTooLarge { limit } | MultipartError::BodyTooLarge { limit } => {
                ServeError::PayloadTooLarge { limit }
            }
            MultipartError::Truncated => ServeError::TruncatedMultipart,
            other => ServeError::MalformedRequest(other.to_string()),
        }
    }
}

impl From<CgiError> for ServeError {
    fn from(err: CgiError) -> Self {
        match err {
            CgiError::Spawn(e) => ServeError::CgiSpawn(e),
            CgiError::Timeout => ServeError::CgiTimeout,
            CgiError::Protocol(msg) => ServeError::CgiProtocol(msg),
            CgiError::Io(e) => ServeError::Io(e),
        }
    }
}
