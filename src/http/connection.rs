use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};

use crate::cgi::CgiInvocation;
use crate::error::ServeError;
use crate::handlers::{delete_file, serve_static};
use crate::http::body::{BodyKind, BodyReader};
use crate::http::mime;
use crate::http::parser::{HeadParser, body_kind};
use crate::http::reader::ByteStreamReader;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::http::writer::ResponseWriter;
use crate::multipart::{MultipartDecoder, MultipartLimits, boundary_from_content_type};
use crate::router::{CgiTarget, Handler, RouteMatch, is_path_safe};
use crate::server::ServerState;
use crate::upload::UploadSink;

/// How long, and how much, unread input is drained before closing after an error.
const LINGER_TIME: Duration = Duration::from_secs(2);
const LINGER_MAX: usize = 1024 * 1024;

pub struct Connection<S> {
    reader: ByteStreamReader<S>,
    state: ConnectionState,
    ctx: Arc<ServerState>,
    peer: Option<SocketAddr>,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter, AfterWrite),
    Closed,
}

/// What happens to the connection once the response is out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterWrite {
    KeepAlive,
    Close,
    /// Close after draining what the client is still sending, so it gets to
    /// read the error response instead of a reset.
    Linger,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    pub fn new(stream: S, ctx: Arc<ServerState>, peer: Option<SocketAddr>) -> Self {
        let read_timeout = ctx.client_timeout();
        Self {
            reader: ByteStreamReader::new(stream, read_timeout),
            state: ConnectionState::Reading,
            ctx,
            peer,
        }
    }

    /// Serves requests one after another until the connection is closed.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            let state = std::mem::replace(&mut self.state, ConnectionState::Closed);
            self.state = match state {
                ConnectionState::Reading => {
                    let mut parser = HeadParser::new();
                    match self.reader.read_head(&mut parser).await {
                        Ok(Some(req)) => ConnectionState::Processing(req),
                        Ok(None) => ConnectionState::Closed,
                        Err(ServeError::Io(e)) => {
                            debug!(peer = ?self.peer, error = %e, "read failed, closing");
                            ConnectionState::Closed
                        }
                        Err(e) => {
                            warn!(peer = ?self.peer, error = %e, "rejecting request head");
                            let response = error_response(&self.ctx, &e).await;
                            let writer = ResponseWriter::new(&response, false, false);
                            ConnectionState::Writing(writer, AfterWrite::Linger)
                        }
                    }
                }

                ConnectionState::Processing(req) => {
                    let (response, after) = match self.handle(&req).await {
                        Ok(response) => {
                            let after = if req.keep_alive() {
                                AfterWrite::KeepAlive
                            } else {
                                AfterWrite::Close
                            };
                            (response, after)
                        }
                        Err(e) => {
                            let status = e.status();
                            if status.as_u16() >= 500 {
                                error!(method = %req.method, path = %req.path, error = %e, "request failed");
                            } else {
                                warn!(method = %req.method, path = %req.path, error = %e, "request rejected");
                            }
                            (error_response(&self.ctx, &e).await, AfterWrite::Linger)
                        }
                    };

                    info!(
                        peer = ?self.peer,
                        method = %req.method,
                        path = %req.path,
                        status = response.status.as_u16(),
                        "request"
                    );
                    let head_only = req.method == Method::HEAD;
                    let writer = ResponseWriter::new(&response, after == AfterWrite::KeepAlive, head_only);
                    ConnectionState::Writing(writer, after)
                }

                ConnectionState::Writing(mut writer, after) => {
                    writer.write_to_stream(self.reader.get_mut()).await?;

                    match after {
                        AfterWrite::KeepAlive => ConnectionState::Reading,
                        AfterWrite::Close => {
                            let _ = self.reader.get_mut().shutdown().await;
                            ConnectionState::Closed
                        }
                        AfterWrite::Linger => {
                            self.linger_close().await;
                            ConnectionState::Closed
                        }
                    }
                }

                ConnectionState::Closed => break,
            };
        }

        Ok(())
    }

    /// Routes the request, then reads its body the way the handler needs it.
    ///
    /// On success the body has been consumed completely, so the next
    /// request starts at the reader's current position.
    async fn handle(&mut self, req: &Request) -> Result<Response, ServeError> {
        let route = self.ctx.router.resolve(req.method, &req.path)?;
        let kind = body_kind(req)?;
        let limit = route.limits.max_body_size;
        let mut body = BodyReader::new(&mut self.reader, kind, limit)?;

        let RouteMatch { handler, root, .. } = route;
        match handler {
            Handler::Upload { dir } => upload(req, &mut body, &dir, limit).await,
            Handler::Cgi(target) => {
                let bytes = body.read_to_end().await?;
                let declared = kind != BodyKind::Fixed(0) || req.headers.contains_key("Content-Length");
                let content_length = declared.then_some(bytes.len() as u64);
                run_cgi(&self.ctx, self.peer, req, &target, &root, content_length, &bytes).await
            }
            Handler::Static { path, index } => {
                body.drain().await?;
                serve_static(&path, &root, index.as_deref()).await
            }
            Handler::Delete { path } => {
                body.drain().await?;
                delete_file(&path, &root).await
            }
        }
    }

    async fn linger_close(&mut self) {
        let stream = self.reader.get_mut();
        if let Err(e) = stream.shutdown().await {
            debug!(error = %e, "shutdown failed");
            return;
        }

        let deadline = Instant::now() + LINGER_TIME;
        let mut scratch = [0u8; 4096];
        let mut drained = self.reader.buffered().len();
        let stream = self.reader.get_mut();
        while drained < LINGER_MAX {
            match timeout_at(deadline, stream.read(&mut scratch)).await {
                Ok(Ok(n)) if n > 0 => drained += n,
                _ => break,
            }
        }
    }
}

async fn upload<R: AsyncRead + Unpin>(
    req: &Request,
    body: &mut BodyReader<'_, R>,
    dir: &std::path::Path,
    limit: u64,
) -> Result<Response, ServeError> {
    let boundary = boundary_from_content_type(req.content_type())?;
    let mut decoder = MultipartDecoder::new(&boundary, MultipartLimits::for_body(limit));
    let mut sink = UploadSink::new(dir).await?;

    if let Err(e) = pump_multipart(body, &mut decoder, &mut sink).await {
        sink.abort().await;
        return Err(e);
    }

    let result = sink.finish().await?;
    info!(parts = result.entries.len(), dir = %dir.display(), "upload stored");
    Ok(ResponseBuilder::new(StatusCode::Created)
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(result.summary().into_bytes())
        .build())
}

/// Moves body bytes through the decoder into the sink until the closing
/// delimiter, then discards any epilogue.
async fn pump_multipart<R: AsyncRead + Unpin>(
    body: &mut BodyReader<'_, R>,
    decoder: &mut MultipartDecoder,
    sink: &mut UploadSink,
) -> Result<(), ServeError> {
    loop {
        while let Some(event) = decoder.next_event()? {
            sink.handle(event).await?;
        }
        if decoder.is_done() {
            return body.drain().await;
        }

        match body.next_chunk().await {
            Ok(Some(chunk)) => decoder.feed(&chunk)?,
            Ok(None) => return Ok(decoder.finish()?),
            Err(ServeError::TruncatedBody) => return Err(ServeError::TruncatedMultipart),
            Err(e) => return Err(e),
        }
    }
}

async fn run_cgi(
    ctx: &ServerState,
    peer: Option<SocketAddr>,
    req: &Request,
    target: &CgiTarget,
    root: &std::path::Path,
    content_length: Option<u64>,
    body: &[u8],
) -> Result<Response, ServeError> {
    let meta = tokio::fs::metadata(&target.script)
        .await
        .map_err(|_| ServeError::NotFound)?;
    if !meta.is_file() {
        return Err(ServeError::NotFound);
    }
    if !is_path_safe(root, &target.script) {
        return Err(ServeError::Forbidden);
    }

    let invocation = CgiInvocation::new(target, req, &ctx.cgi_context(peer), content_length);
    let output = ctx.cgi.execute(&invocation, body).await?;
    Ok(output.into_response())
}

/// Error response for `err`, using the configured page for its status if readable.
async fn error_response(ctx: &ServerState, err: &ServeError) -> Response {
    let response = Response::from_error(err);
    let Some(page) = ctx.config.error_pages.get(&response.status.as_u16()) else {
        return response;
    };

    match tokio::fs::read(page).await {
        Ok(content) => response.with_page(content, mime::from_path(page)),
        Err(e) => {
            debug!(page = %page.display(), error = %e, "error page unreadable");
            response
        }
    }
}
