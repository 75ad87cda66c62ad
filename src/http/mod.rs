//! HTTP/1.1 protocol implementation.
//!
//! # Architecture
//!
//! - **`reader`**: buffers socket bytes; line reads and head reads
//! - **`parser`**: resumable request-head parser and body framing rules
//! - **`headers`**: ordered, case-insensitive header collection
//! - **`request`**: request head and method
//! - **`body`** / **`chunked`**: fixed-length and chunked body delivery with limits
//! - **`response`**: status codes and the response builder
//! - **`writer`**: serialises a response onto the stream
//! - **`mime`**: content type from file extension
//! - **`connection`**: the per-connection request/response state machine
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Parse the next request head
//!        └──────┬──────┘
//!               │ Head parsed          (bad head → Writing 4xx, Linger)
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Route, read body, run handler
//!        └──────┬───────────┘
//!               │ Response ready
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← Send response to client
//!        └──────┬───────────┘
//!               │ Response sent
//!               ├─ Keep-Alive → Reading (same connection)
//!               ├─ Close → Closed
//!               └─ Error → drain input briefly → Closed
//! ```
//!
//! # Example
//!
//! A connection only needs a byte stream, so a request can be pushed
//! through the whole pipeline without a socket:
//!
//! ```ignore
//! use std::sync::Arc;
//! use tokio::io::{AsyncReadExt, AsyncWriteExt};
//! use webserv::config::Config;
//! use webserv::http::connection::Connection;
//! use webserv::server::ServerState;
//!
//! let state = Arc::new(ServerState::new(Config::load("config.yaml")?));
//! let (mut client, server) = tokio::io::duplex(64 * 1024);
//! tokio::spawn(async move { Connection::new(server, state, None).run().await });
//!
//! client.write_all(b"DELETE /uploads/demo.txt HTTP/1.1\r\n\r\n").await?;
//! client.shutdown().await?;
//! let mut response = String::new();
//! client.read_to_string(&mut response).await?;
//! assert!(response.starts_with("HTTP/1.1 204"));
//! ```

pub mod body;
pub mod chunked;
pub mod connection;
pub mod headers;
pub mod mime;
pub mod parser;
pub mod reader;
pub mod request;
pub mod response;
pub mod writer;
