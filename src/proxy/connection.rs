//! One proxied client connection.
//!
//! # Responsibilities
//! - Own the client socket, the backend socket and both parser/handler pairs
//! - Feed every read into the matching parser, flush what the handlers produce
//! - Apply close, parse-error and idle policies
//!
//! # Data Flow
//! ```text
//!            ┌──────────────────────── ProxyConnection ─────────────────────────┐
//! client ───▶│ read → HttpParser(request)  → UpstreamProxyHandler   ─┬─▶ backend │
//!            │                                                      └─▶ client  │
//! client ◀───│ write ◀── DownstreamProxyHandler ← HttpParser(response) ← read ◀─┼── backend
//!            └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Design Decisions
//! - One task per connection; both directions are driven by one `select!`
//!   loop, so the shared chain never sees concurrent calls
//! - Client EOF half-closes the backend and keeps relaying responses
//! - Backend EOF ends the connection

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::filtering::HttpFilterChain;
use crate::http::message::HttpResponse;
use crate::http::parser::{HttpParser, ParseError};
use crate::lifecycle::Shutdown;
use crate::net::connection::ConnectionId;
use crate::observability::metrics;
use crate::proxy::handler::{DownstreamProxyHandler, Outbound, UpstreamProxyHandler};
use crate::resilience::timeouts::IdleDeadline;
use crate::resilience::Timeouts;

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Per-connection policy, fixed when the connection is accepted.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// `host:port` of the backend, also the rewritten `Host` value.
    pub downstream_host: String,
    pub timeouts: Timeouts,
    /// Status sent to the client when the backend is unreachable.
    pub error_status: u16,
    /// Status of the default rejection.
    pub rejection_status: u16,
    pub close_on_parse_error: bool,
    pub forward_body_after_reject: bool,
    pub max_head_bytes: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            downstream_host: "localhost:80".to_string(),
            timeouts: Timeouts::default(),
            error_status: 502,
            rejection_status: 400,
            close_on_parse_error: true,
            forward_body_after_reject: false,
            max_head_bytes: crate::http::parser::DEFAULT_MAX_HEAD_BYTES,
        }
    }
}

/// Which side sent the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Backend,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Client => "client",
            Side::Backend => "backend",
        }
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The backend closed its side.
    BackendClosed,
    /// The client closed and every outstanding response was relayed.
    ClientClosed,
    /// A message asked for `Connection: close`.
    ConnectionClose,
    /// Malformed HTTP with `close_on_parse_error` set.
    ParseError(Side, ParseError),
    IdleTimeout,
    Shutdown,
}

/// Both parser/handler pairs of one connection, without any I/O.
pub struct HttpRelay {
    request_parser: HttpParser,
    response_parser: HttpParser,
    upstream: UpstreamProxyHandler,
    downstream: DownstreamProxyHandler,
}

impl HttpRelay {
    pub fn new(chain: HttpFilterChain, settings: &ConnectionSettings) -> Self {
        let chain = Arc::new(Mutex::new(chain));
        let rejection = Arc::new(HttpResponse::empty(settings.rejection_status));
        Self {
            request_parser: HttpParser::request().with_max_head_bytes(settings.max_head_bytes),
            response_parser: HttpParser::response().with_max_head_bytes(settings.max_head_bytes),
            upstream: UpstreamProxyHandler::new(Arc::clone(&chain), settings.downstream_host.as_str())
                .with_forward_body_after_reject(settings.forward_body_after_reject)
                .with_default_rejection(Arc::clone(&rejection)),
            downstream: DownstreamProxyHandler::new(chain)
                .with_forward_body_after_reject(settings.forward_body_after_reject)
                .with_default_rejection(rejection),
        }
    }

    /// Feed bytes read from the client.
    pub fn client_bytes(&mut self, data: &[u8]) -> Result<(), ParseError> {
        let result = self.request_parser.execute(data, &mut self.upstream);
        for exchange in self.upstream.drain_exchanges() {
            self.downstream.enqueue(exchange);
        }
        result.map(|_| ())
    }

    /// Feed bytes read from the backend.
    pub fn backend_bytes(&mut self, data: &[u8]) -> Result<(), ParseError> {
        self.response_parser
            .execute(data, &mut self.downstream)
            .map(|_| ())
    }

    /// The client sent EOF.
    pub fn client_eof(&mut self) -> Result<(), ParseError> {
        self.request_parser.finish(&mut self.upstream)
    }

    /// The backend sent EOF; completes a close-delimited response.
    pub fn backend_eof(&mut self) -> Result<(), ParseError> {
        self.response_parser.finish(&mut self.downstream)
    }

    /// Discard the partial message from `side` after a parse error.
    pub fn recover(&mut self, side: Side) {
        match side {
            Side::Client => {
                self.request_parser.reset();
                self.upstream.reset();
            }
            Side::Backend => {
                self.response_parser.reset();
                self.downstream.reset();
            }
        }
    }

    /// Everything both handlers produced since the last call.
    pub fn take_output(&mut self) -> Outbound {
        let mut out = self.upstream.take_output();
        let responses = self.downstream.take_output();
        out.upstream.extend_from_slice(&responses.upstream);
        out.downstream.extend_from_slice(&responses.downstream);
        out
    }

    /// True when a completed exchange asked for the connection to end.
    pub fn should_close(&self) -> bool {
        (self.downstream.should_close() && self.response_parser.is_idle())
            || (self.upstream.should_close()
                && self.request_parser.is_idle()
                && !self.downstream.awaiting_response())
    }

    /// No message in flight in either direction.
    pub fn is_idle(&self) -> bool {
        self.request_parser.is_idle()
            && self.response_parser.is_idle()
            && !self.downstream.awaiting_response()
    }
}

/// A client connection paired with its backend connection.
pub struct ProxyConnection<C, B> {
    id: ConnectionId,
    client: C,
    backend: B,
    relay: HttpRelay,
    settings: ConnectionSettings,
}

impl<C, B> ProxyConnection<C, B>
where
    C: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        id: ConnectionId,
        client: C,
        backend: B,
        chain: HttpFilterChain,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            id,
            client,
            backend,
            relay: HttpRelay::new(chain, &settings),
            settings,
        }
    }

    /// Relay until either side ends the connection. Both sockets are
    /// dropped on return.
    pub async fn run(self, shutdown: Shutdown) -> std::io::Result<CloseReason> {
        let ProxyConnection {
            id,
            client,
            backend,
            mut relay,
            settings,
        } = self;

        let (mut client_rd, mut client_wr) = tokio::io::split(client);
        let (mut backend_rd, mut backend_wr) = tokio::io::split(backend);

        let mut client_buf = vec![0u8; READ_BUFFER_SIZE];
        let mut backend_buf = vec![0u8; READ_BUFFER_SIZE];
        let mut client_open = true;
        let mut draining = false;
        let mut idle = IdleDeadline::new(settings.timeouts.idle);

        loop {
            tokio::select! {
                read = client_rd.read(&mut client_buf), if client_open => {
                    let n = read?;
                    idle.touch();

                    if n == 0 {
                        client_open = false;
                        if let Err(e) = relay.client_eof() {
                            tracing::debug!(connection_id = %id, error = %e, "Client closed mid-request");
                        }
                        flush(&mut relay, &mut client_wr, &mut backend_wr).await?;
                        // half-close: the backend sees EOF but may still answer
                        backend_wr.shutdown().await?;
                        if relay.is_idle() {
                            return Ok(CloseReason::ClientClosed);
                        }
                        continue;
                    }

                    let result = relay.client_bytes(&client_buf[..n]);
                    flush(&mut relay, &mut client_wr, &mut backend_wr).await?;
                    if let Err(e) = result {
                        if let Some(reason) = parse_failure(id, &mut relay, &settings, Side::Client, e) {
                            return Ok(reason);
                        }
                    }
                }
                read = backend_rd.read(&mut backend_buf) => {
                    let n = read?;
                    idle.touch();

                    if n == 0 {
                        if let Err(e) = relay.backend_eof() {
                            tracing::debug!(connection_id = %id, error = %e, "Backend closed mid-response");
                        }
                        flush(&mut relay, &mut client_wr, &mut backend_wr).await?;
                        let _ = client_wr.shutdown().await;
                        return Ok(CloseReason::BackendClosed);
                    }

                    let result = relay.backend_bytes(&backend_buf[..n]);
                    flush(&mut relay, &mut client_wr, &mut backend_wr).await?;
                    if let Err(e) = result {
                        if let Some(reason) = parse_failure(id, &mut relay, &settings, Side::Backend, e) {
                            return Ok(reason);
                        }
                    }

                    if !client_open && relay.is_idle() {
                        let _ = client_wr.shutdown().await;
                        return Ok(CloseReason::ClientClosed);
                    }
                }
                _ = idle.expired() => {
                    return Ok(CloseReason::IdleTimeout);
                }
                _ = shutdown.wait(), if !draining => {
                    draining = true;
                    tracing::debug!(connection_id = %id, "Draining connection");
                }
            }

            if relay.should_close() {
                let _ = client_wr.shutdown().await;
                return Ok(CloseReason::ConnectionClose);
            }
            if draining && relay.is_idle() {
                let _ = client_wr.shutdown().await;
                return Ok(CloseReason::Shutdown);
            }
        }
    }
}

/// Log and count a parse error, then close or recover per policy.
fn parse_failure(
    id: ConnectionId,
    relay: &mut HttpRelay,
    settings: &ConnectionSettings,
    side: Side,
    error: ParseError,
) -> Option<CloseReason> {
    metrics::record_parse_error(side.as_str());
    tracing::warn!(
        connection_id = %id,
        side = side.as_str(),
        error = %error,
        "Malformed HTTP"
    );

    if settings.close_on_parse_error {
        Some(CloseReason::ParseError(side, error))
    } else {
        relay.recover(side);
        None
    }
}

async fn flush<C, B>(relay: &mut HttpRelay, client: &mut C, backend: &mut B) -> std::io::Result<()>
where
    C: AsyncWrite + Unpin,
    B: AsyncWrite + Unpin,
{
    let out = relay.take_output();
    if !out.downstream.is_empty() {
        backend.write_all(&out.downstream).await?;
        backend.flush().await?;
        metrics::record_bytes("downstream", out.downstream.len());
    }
    if !out.upstream.is_empty() {
        client.write_all(&out.upstream).await?;
        client.flush().await?;
        metrics::record_bytes("upstream", out.upstream.len());
    }
    Ok(())
}
