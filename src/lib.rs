//! webserv - HTTP/1.1 server with multipart uploads and CGI
//!
//! Core library for request ingestion, routing, uploads and CGI execution.

pub mod cgi;
pub mod config;
pub mod error;
pub mod handlers;
pub mod http;
pub mod multipart;
pub mod router;
pub mod server;
pub mod upload;
