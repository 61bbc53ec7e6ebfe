//! Per-direction parser delegates.
//!
//! # Responsibilities
//! - Build the message head field by field from parser callbacks
//! - Rewrite `Host` on requests to the backend target
//! - Run the filter chain once per head and act on its decision
//! - Re-frame chunked bodies as they stream through
//!
//! # Data Flow
//! ```text
//! client bytes  → HttpParser(request)  → UpstreamProxyHandler
//!     pass/consume → request head + body  → Outbound::downstream (backend)
//!                  → Exchange::Forwarded  ─┐
//!     reject       → Exchange::Rejected   ─┤
//!                                          ▼
//! backend bytes → HttpParser(response) → DownstreamProxyHandler
//!     pass/consume → response head + body → Outbound::upstream (client)
//!     reject       → rejection head       → Outbound::upstream (client)
//!     queued rejections → written once every earlier response is out
//! ```
//!
//! # Design Decisions
//! - Handlers never touch sockets; they append to an `Outbound` buffer the
//!   connection flushes after every read
//! - A rejected message's body is dropped unless the policy says otherwise
//! - The parser's framing decision is final: a body is re-chunked only when
//!   the parser reads it as chunked
//! - Client-bound output stays in request order, so a rejection waits
//!   behind responses the backend still owes for earlier requests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use crate::filtering::{FilterAction, HttpFilterChain};
use crate::http::message::{HttpRequest, HttpResponse};
use crate::http::parser::{is_chunked, BodyFraming, HeadersComplete, ParserDelegate};
use crate::http::wire;
use crate::observability::metrics;

/// Filter chain shared by both directions of one connection.
pub type SharedChain = Arc<Mutex<HttpFilterChain>>;

/// Bytes produced by a handler, per destination socket.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Bytes for the client socket.
    pub upstream: Vec<u8>,
    /// Bytes for the backend socket.
    pub downstream: Vec<u8>,
}

impl Outbound {
    /// Move the buffered bytes out, leaving this buffer empty.
    pub fn take(&mut self) -> Outbound {
        std::mem::take(self)
    }

    pub fn is_empty(&self) -> bool {
        self.upstream.is_empty() && self.downstream.is_empty()
    }
}

/// One client request, as the response direction must account for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange {
    /// Sent to the backend with this method; a response is owed.
    Forwarded(String),
    /// Answered by the filter chain.
    Rejected(Arc<HttpResponse>),
}

/// Body relay state shared by both handlers.
#[derive(Debug, Default)]
struct BodyState {
    transfer_encoding_chunked: bool,
    suppressed: bool,
}

impl BodyState {
    fn frame(&mut self, framing: BodyFraming) {
        self.transfer_encoding_chunked = framing == BodyFraming::Chunked;
    }

    fn write(&self, sink: &mut Vec<u8>, bytes: &[u8]) {
        if self.suppressed {
            return;
        }
        if self.transfer_encoding_chunked {
            wire::write_chunk(sink, bytes);
        } else {
            sink.extend_from_slice(bytes);
        }
    }

    fn finish(&self, sink: &mut Vec<u8>) {
        if self.transfer_encoding_chunked && !self.suppressed {
            wire::write_last_chunk(sink);
        }
    }
}

fn requests_close(value: &str) -> bool {
    value
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case("close"))
}

/// The response to send for `action`; the shared default rejection is
/// swapped for the connection's configured one.
fn rejection_for(action: &FilterAction, configured: Option<&Arc<HttpResponse>>) -> Option<Arc<HttpResponse>> {
    let response = action.response()?;
    match configured {
        Some(configured) if action.is_default_reject() => Some(Arc::clone(configured)),
        _ => Some(Arc::clone(response)),
    }
}

fn run_chain<F>(chain: &SharedChain, run: F) -> FilterAction
where
    F: FnOnce(&mut HttpFilterChain) -> FilterAction,
{
    let mut chain = chain.lock().unwrap_or_else(PoisonError::into_inner);
    run(&mut chain)
}

/// Delegate for the request direction (client → backend).
pub struct UpstreamProxyHandler {
    request: HttpRequest,
    chain: SharedChain,
    downstream_host: String,
    current_header_field: String,
    body: BodyState,
    connection_close: bool,
    should_close: bool,
    forward_body_after_reject: bool,
    default_rejection: Option<Arc<HttpResponse>>,
    exchanges: VecDeque<Exchange>,
    out: Outbound,
}

impl UpstreamProxyHandler {
    /// `downstream_host` is the `host:port` written into every forwarded
    /// `Host` header.
    pub fn new(chain: SharedChain, downstream_host: impl Into<String>) -> Self {
        Self {
            request: HttpRequest::new(),
            chain,
            downstream_host: downstream_host.into(),
            current_header_field: String::new(),
            body: BodyState::default(),
            connection_close: false,
            should_close: false,
            forward_body_after_reject: false,
            default_rejection: None,
            exchanges: VecDeque::new(),
            out: Outbound::default(),
        }
    }

    pub fn with_forward_body_after_reject(mut self, forward: bool) -> Self {
        self.forward_body_after_reject = forward;
        self
    }

    /// Send `response` wherever the chain returns the default rejection.
    pub fn with_default_rejection(mut self, response: Arc<HttpResponse>) -> Self {
        self.default_rejection = Some(response);
        self
    }

    /// True once a rejected request asked for `Connection: close`; no
    /// backend response will follow, so the connection can end after the
    /// rejection is written.
    pub fn should_close(&self) -> bool {
        self.should_close
    }

    /// The head currently being built.
    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    /// Bytes produced since the last call.
    pub fn take_output(&mut self) -> Outbound {
        self.out.take()
    }

    /// Requests completed since the last call, in arrival order.
    pub fn drain_exchanges(&mut self) -> impl Iterator<Item = Exchange> + '_ {
        self.exchanges.drain(..)
    }

    /// Drop the partially built message after a parse error.
    pub fn reset(&mut self) {
        self.request = HttpRequest::new();
        self.current_header_field.clear();
        self.body = BodyState::default();
        self.connection_close = false;
    }
}

impl ParserDelegate for UpstreamProxyHandler {
    fn on_req_method(&mut self, method: &str) {
        self.request.method = method.to_string();
    }

    fn on_req_path(&mut self, url: &str) {
        self.request.url = url.to_string();
    }

    fn on_http_version(&mut self, major: u8, minor: u8) {
        self.request.version = format!("{major}.{minor}");
    }

    fn on_header_field(&mut self, field: &str) {
        self.current_header_field.clear();
        self.current_header_field.push_str(field);
    }

    fn on_header_value(&mut self, value: &str) {
        let field = self.current_header_field.as_str();

        if field.eq_ignore_ascii_case("host") {
            let header = self.request.headers.header(field);
            header.values.clear();
            header.push_value(self.downstream_host.as_str());
            return;
        }

        if field.eq_ignore_ascii_case("transfer-encoding") {
            self.body.transfer_encoding_chunked = is_chunked(value);
        } else if field.eq_ignore_ascii_case("connection") && requests_close(value) {
            self.connection_close = true;
        }
        self.request.headers.header(field).push_value(value);
    }

    fn on_headers_complete(&mut self) -> HeadersComplete {
        let action = run_chain(&self.chain, |chain| chain.on_request(&mut self.request));
        metrics::record_filter_action("request", action.kind());

        match rejection_for(&action, self.default_rejection.as_ref()) {
            Some(rejection) => {
                tracing::debug!(
                    method = %self.request.method,
                    url = %self.request.url,
                    status = %rejection.status,
                    "Request rejected by filter chain"
                );
                self.exchanges.push_back(Exchange::Rejected(rejection));
                self.body.suppressed = !self.forward_body_after_reject;
                if self.connection_close {
                    self.should_close = true;
                }
            }
            None => {
                wire::write_request_head(&mut self.out.downstream, &self.request);
                self.exchanges.push_back(Exchange::Forwarded(self.request.method.clone()));
            }
        }

        HeadersComplete::ReadBody
    }

    fn on_body_framing(&mut self, framing: BodyFraming) {
        self.body.frame(framing);
    }

    fn on_body(&mut self, bytes: &[u8]) {
        self.body.write(&mut self.out.downstream, bytes);
    }

    fn on_message_complete(&mut self) {
        self.body.finish(&mut self.out.downstream);
        self.reset();
    }
}

/// Delegate for the response direction (backend → client).
pub struct DownstreamProxyHandler {
    response: HttpResponse,
    chain: SharedChain,
    current_header_field: String,
    body: BodyState,
    should_close: bool,
    forward_body_after_reject: bool,
    default_rejection: Option<Arc<HttpResponse>>,
    pending: VecDeque<Exchange>,
    responding: bool,
    out: Outbound,
}

impl DownstreamProxyHandler {
    pub fn new(chain: SharedChain) -> Self {
        Self {
            response: HttpResponse::new(),
            chain,
            current_header_field: String::new(),
            body: BodyState::default(),
            should_close: false,
            forward_body_after_reject: false,
            default_rejection: None,
            pending: VecDeque::new(),
            responding: false,
            out: Outbound::default(),
        }
    }

    pub fn with_forward_body_after_reject(mut self, forward: bool) -> Self {
        self.forward_body_after_reject = forward;
        self
    }

    pub fn with_default_rejection(mut self, response: Arc<HttpResponse>) -> Self {
        self.default_rejection = Some(response);
        self
    }

    /// Record that a request with `method` went to the backend, so its
    /// response can be matched (HEAD responses carry no body).
    pub fn expect_response(&mut self, method: String) {
        self.enqueue(Exchange::Forwarded(method));
    }

    /// Queue a rejection for the client. It is written at once when no
    /// response is owed, else right after the last earlier response.
    pub fn queue_rejection(&mut self, rejection: Arc<HttpResponse>) {
        self.enqueue(Exchange::Rejected(rejection));
    }

    pub fn enqueue(&mut self, exchange: Exchange) {
        self.pending.push_back(exchange);
        self.release_rejections();
    }

    /// True while a response is owed or a rejection waits behind one.
    pub fn awaiting_response(&self) -> bool {
        self.responding || !self.pending.is_empty()
    }

    /// True once a relayed response carried `Connection: close`.
    pub fn should_close(&self) -> bool {
        self.should_close
    }

    pub fn response(&self) -> &HttpResponse {
        &self.response
    }

    pub fn take_output(&mut self) -> Outbound {
        self.out.take()
    }

    pub fn reset(&mut self) {
        self.response = HttpResponse::new();
        self.current_header_field.clear();
        self.body = BodyState::default();
        self.responding = false;
    }

    fn release_rejections(&mut self) {
        if self.responding {
            return;
        }
        while matches!(self.pending.front(), Some(Exchange::Rejected(_))) {
            if let Some(Exchange::Rejected(rejection)) = self.pending.pop_front() {
                wire::write_response_head(&mut self.out.upstream, &rejection);
            }
        }
    }
}

impl ParserDelegate for DownstreamProxyHandler {
    fn on_http_version(&mut self, major: u8, minor: u8) {
        self.response.version = format!("{major}.{minor}");
    }

    fn on_status(&mut self, status: u16) {
        self.response.set_status(status);
    }

    fn on_header_field(&mut self, field: &str) {
        self.current_header_field.clear();
        self.current_header_field.push_str(field);
    }

    fn on_header_value(&mut self, value: &str) {
        let field = self.current_header_field.as_str();

        if field.eq_ignore_ascii_case("transfer-encoding") {
            self.body.transfer_encoding_chunked = is_chunked(value);
        } else if field.eq_ignore_ascii_case("connection") && requests_close(value) {
            self.should_close = true;
        }
        self.response.headers.header(field).push_value(value);
    }

    fn on_headers_complete(&mut self) -> HeadersComplete {
        // interim responses precede the final one for the same request
        let interim = self.response.status_code().is_some_and(|code| code < 200);
        let head_request = match self.pending.front() {
            Some(Exchange::Forwarded(method)) if !interim => {
                let head = method.eq_ignore_ascii_case("HEAD");
                self.pending.pop_front();
                head
            }
            _ => false,
        };
        if !interim {
            self.responding = true;
        }

        let action = run_chain(&self.chain, |chain| chain.on_response(&mut self.response));
        metrics::record_filter_action("response", action.kind());

        match rejection_for(&action, self.default_rejection.as_ref()) {
            Some(rejection) => {
                tracing::debug!(
                    backend_status = %self.response.status,
                    status = %rejection.status,
                    "Response rejected by filter chain"
                );
                wire::write_response_head(&mut self.out.upstream, &rejection);
                self.body.suppressed = !self.forward_body_after_reject;
            }
            None => wire::write_response_head(&mut self.out.upstream, &self.response),
        }

        if head_request {
            HeadersComplete::SkipBody
        } else {
            HeadersComplete::ReadBody
        }
    }

    fn on_body_framing(&mut self, framing: BodyFraming) {
        self.body.frame(framing);
    }

    fn on_body(&mut self, bytes: &[u8]) {
        self.body.write(&mut self.out.upstream, bytes);
    }

    fn on_message_complete(&mut self) {
        self.body.finish(&mut self.out.upstream);
        self.reset();
        self.release_rejections();
    }
}
