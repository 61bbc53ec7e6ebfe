//! Streaming HTTP/1.x parser.
//!
//! # Responsibilities
//! - Turn arbitrarily split byte reads into ordered delegate callbacks
//! - Decide body framing (chunked, content-length, close-delimited, none)
//! - Hand body bytes through without buffering them
//!
//! # Design Decisions
//! - Head lines are buffered until their LF arrives; body bytes are passed
//!   to the delegate as slices of the caller's buffer
//! - Chunked bodies are de-chunked: `on_body` only ever sees payload
//! - After message-complete the parser starts over, so one parser serves
//!   every message on a keep-alive connection
//! - Once an error is returned the parser stays failed until `reset`

use thiserror::Error;

/// Default cap on the size of a message head.
pub const DEFAULT_MAX_HEAD_BYTES: usize = 80 * 1024;

/// Which side of the exchange the parser reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    Request,
    Response,
}

/// Returned by `on_headers_complete` to steer body parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadersComplete {
    /// Frame the body from the headers as usual.
    ReadBody,
    /// The message has no body regardless of its headers (HEAD responses).
    SkipBody,
}

/// Body delimitation chosen once the head is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body follows the head.
    Empty,
    /// Chunked transfer coding; `on_body` sees de-chunked payload.
    Chunked,
    /// Exactly this many bytes.
    Length(u64),
    /// Everything until the peer closes.
    UntilEof,
}

/// Receiver of parser events. Every callback defaults to a no-op.
pub trait ParserDelegate {
    fn on_req_method(&mut self, _method: &str) {}

    fn on_req_path(&mut self, _url: &str) {}

    fn on_http_version(&mut self, _major: u8, _minor: u8) {}

    fn on_status(&mut self, _status: u16) {}

    fn on_header_field(&mut self, _field: &str) {}

    fn on_header_value(&mut self, _value: &str) {}

    fn on_headers_complete(&mut self) -> HeadersComplete {
        HeadersComplete::ReadBody
    }

    /// Fired right after `on_headers_complete`, before any body bytes.
    fn on_body_framing(&mut self, _framing: BodyFraming) {}

    fn on_body(&mut self, _bytes: &[u8]) {}

    fn on_message_complete(&mut self) {}
}

/// Malformed or truncated input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid request method")]
    InvalidMethod,
    #[error("invalid request target")]
    InvalidUrl,
    #[error("invalid HTTP version")]
    InvalidVersion,
    #[error("invalid status code")]
    InvalidStatus,
    #[error("invalid header line")]
    InvalidHeader,
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("invalid chunk framing")]
    InvalidChunk,
    #[error("message head exceeds {0} bytes")]
    HeadTooLarge(usize),
    #[error("stream ended in the middle of a message")]
    UnexpectedEof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    StartLine,
    HeaderLine,
    FixedBody { remaining: u64 },
    ChunkSize,
    ChunkData { remaining: u64 },
    ChunkDataEnd,
    Trailer,
    UntilEof,
    Failed,
}

/// Framing facts collected while headers stream past.
#[derive(Debug, Default)]
struct Framing {
    content_length: Option<u64>,
    chunked: bool,
    status: u16,
}

/// Incremental parser for one direction of a connection.
#[derive(Debug)]
pub struct HttpParser {
    kind: ParserKind,
    state: State,
    line: Vec<u8>,
    head_bytes: usize,
    max_head_bytes: usize,
    framing: Framing,
    error: Option<ParseError>,
}

impl HttpParser {
    pub fn new(kind: ParserKind) -> Self {
        Self {
            kind,
            state: State::StartLine,
            line: Vec::new(),
            head_bytes: 0,
            max_head_bytes: DEFAULT_MAX_HEAD_BYTES,
            framing: Framing::default(),
            error: None,
        }
    }

    /// Parser for client-to-proxy bytes.
    pub fn request() -> Self {
        Self::new(ParserKind::Request)
    }

    /// Parser for backend-to-proxy bytes.
    pub fn response() -> Self {
        Self::new(ParserKind::Response)
    }

    pub fn with_max_head_bytes(mut self, max_head_bytes: usize) -> Self {
        self.max_head_bytes = max_head_bytes;
        self
    }

    pub fn kind(&self) -> ParserKind {
        self.kind
    }

    /// True between messages with nothing buffered.
    pub fn is_idle(&self) -> bool {
        self.state == State::StartLine && self.line.is_empty()
    }

    /// Drop all in-progress state, including a previous failure.
    pub fn reset(&mut self) {
        self.state = State::StartLine;
        self.line.clear();
        self.head_bytes = 0;
        self.framing = Framing::default();
        self.error = None;
    }

    /// Feed `data`, firing callbacks on `delegate`. Returns bytes consumed.
    pub fn execute<D: ParserDelegate>(
        &mut self,
        data: &[u8],
        delegate: &mut D,
    ) -> Result<usize, ParseError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        match self.run(data, delegate) {
            Ok(()) => Ok(data.len()),
            Err(err) => {
                self.state = State::Failed;
                self.error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Signal end of stream. Completes close-delimited bodies.
    pub fn finish<D: ParserDelegate>(&mut self, delegate: &mut D) -> Result<(), ParseError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        match self.state {
            State::UntilEof => {
                self.complete(delegate);
                Ok(())
            }
            State::StartLine if self.line.iter().all(|b| matches!(b, b'\r' | b'\n')) => Ok(()),
            _ => {
                self.state = State::Failed;
                self.error = Some(ParseError::UnexpectedEof);
                Err(ParseError::UnexpectedEof)
            }
        }
    }

    fn run<D: ParserDelegate>(&mut self, data: &[u8], delegate: &mut D) -> Result<(), ParseError> {
        let mut pos = 0;

        while pos < data.len() {
            match self.state {
                State::StartLine => {
                    let Some(line) = self.take_line(data, &mut pos, true)? else {
                        break;
                    };
                    // stray CRLFs between messages are tolerated
                    if line.is_empty() {
                        self.head_bytes = 0;
                        continue;
                    }
                    match self.kind {
                        ParserKind::Request => parse_request_line(&line, delegate)?,
                        ParserKind::Response => {
                            self.framing.status = parse_status_line(&line, delegate)?;
                        }
                    }
                    self.state = State::HeaderLine;
                }
                State::HeaderLine => {
                    let Some(line) = self.take_line(data, &mut pos, true)? else {
                        break;
                    };
                    if line.is_empty() {
                        self.headers_complete(delegate);
                    } else {
                        self.header_line(&line, delegate)?;
                    }
                }
                State::FixedBody { remaining } => {
                    let take = available(data, pos, remaining);
                    delegate.on_body(&data[pos..pos + take]);
                    pos += take;
                    let remaining = remaining - take as u64;
                    if remaining == 0 {
                        self.complete(delegate);
                    } else {
                        self.state = State::FixedBody { remaining };
                    }
                }
                State::ChunkSize => {
                    let Some(line) = self.take_line(data, &mut pos, false)? else {
                        break;
                    };
                    let size = parse_chunk_size(&line)?;
                    self.state = if size == 0 {
                        State::Trailer
                    } else {
                        State::ChunkData { remaining: size }
                    };
                }
                State::ChunkData { remaining } => {
                    let take = available(data, pos, remaining);
                    delegate.on_body(&data[pos..pos + take]);
                    pos += take;
                    let remaining = remaining - take as u64;
                    self.state = if remaining == 0 {
                        State::ChunkDataEnd
                    } else {
                        State::ChunkData { remaining }
                    };
                }
                State::ChunkDataEnd => {
                    let Some(line) = self.take_line(data, &mut pos, false)? else {
                        break;
                    };
                    if !line.is_empty() {
                        return Err(ParseError::InvalidChunk);
                    }
                    self.state = State::ChunkSize;
                }
                State::Trailer => {
                    let Some(line) = self.take_line(data, &mut pos, false)? else {
                        break;
                    };
                    if line.is_empty() {
                        self.complete(delegate);
                    }
                }
                State::UntilEof => {
                    delegate.on_body(&data[pos..]);
                    pos = data.len();
                }
                State::Failed => {
                    return Err(self.error.clone().unwrap_or(ParseError::UnexpectedEof));
                }
            }
        }

        Ok(())
    }

    /// Accumulate up to the next LF. Returns the line without CRLF once complete.
    fn take_line(
        &mut self,
        data: &[u8],
        pos: &mut usize,
        counts_toward_head: bool,
    ) -> Result<Option<Vec<u8>>, ParseError> {
        let rest = &data[*pos..];
        let (chunk, found) = match rest.iter().position(|&b| b == b'\n') {
            Some(index) => (&rest[..=index], true),
            None => (rest, false),
        };
        *pos += chunk.len();

        if counts_toward_head {
            self.head_bytes += chunk.len();
            if self.head_bytes > self.max_head_bytes {
                return Err(ParseError::HeadTooLarge(self.max_head_bytes));
            }
        }
        self.line.extend_from_slice(chunk);
        if self.line.len() > self.max_head_bytes {
            return Err(ParseError::HeadTooLarge(self.max_head_bytes));
        }
        if !found {
            return Ok(None);
        }

        let mut line = std::mem::take(&mut self.line);
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    fn header_line<D: ParserDelegate>(&mut self, line: &[u8], delegate: &mut D) -> Result<(), ParseError> {
        // obsolete line folding is not supported
        if matches!(line.first(), Some(b' ' | b'\t')) {
            return Err(ParseError::InvalidHeader);
        }

        let colon = line.iter().position(|&b| b == b':').ok_or(ParseError::InvalidHeader)?;
        let name = &line[..colon];
        if name.is_empty() || !name.iter().all(|&b| is_token(b)) {
            return Err(ParseError::InvalidHeader);
        }
        let name = String::from_utf8_lossy(name);
        let value = String::from_utf8_lossy(&line[colon + 1..]);
        let value = value.trim_matches(|c| c == ' ' || c == '\t');

        if name.eq_ignore_ascii_case("content-length") {
            let length = value
                .parse::<u64>()
                .map_err(|_| ParseError::InvalidContentLength)?;
            match self.framing.content_length {
                Some(existing) if existing != length => {
                    return Err(ParseError::InvalidContentLength);
                }
                _ => self.framing.content_length = Some(length),
            }
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            self.framing.chunked = is_chunked(value);
        }

        delegate.on_header_field(&name);
        delegate.on_header_value(value);
        Ok(())
    }

    fn headers_complete<D: ParserDelegate>(&mut self, delegate: &mut D) {
        let hint = delegate.on_headers_complete();
        self.head_bytes = 0;

        let status = self.framing.status;
        let bodiless_status =
            self.kind == ParserKind::Response && ((100..200).contains(&status) || status == 204 || status == 304);

        let framing = if hint == HeadersComplete::SkipBody || bodiless_status {
            BodyFraming::Empty
        } else if self.framing.chunked {
            BodyFraming::Chunked
        } else if let Some(length) = self.framing.content_length {
            if length == 0 {
                BodyFraming::Empty
            } else {
                BodyFraming::Length(length)
            }
        } else if self.kind == ParserKind::Response {
            BodyFraming::UntilEof
        } else {
            BodyFraming::Empty
        };

        delegate.on_body_framing(framing);
        match framing {
            BodyFraming::Empty => self.complete(delegate),
            BodyFraming::Chunked => self.state = State::ChunkSize,
            BodyFraming::Length(remaining) => self.state = State::FixedBody { remaining },
            BodyFraming::UntilEof => self.state = State::UntilEof,
        }
    }

    fn complete<D: ParserDelegate>(&mut self, delegate: &mut D) {
        delegate.on_message_complete();
        self.state = State::StartLine;
        self.head_bytes = 0;
        self.framing = Framing::default();
    }
}

fn available(data: &[u8], pos: usize, remaining: u64) -> usize {
    let left = data.len() - pos;
    usize::try_from(remaining).map_or(left, |remaining| remaining.min(left))
}

fn parse_request_line<D: ParserDelegate>(line: &[u8], delegate: &mut D) -> Result<(), ParseError> {
    let line = String::from_utf8_lossy(line);
    let (method, rest) = line.split_once(' ').ok_or(ParseError::InvalidMethod)?;
    if method.is_empty() || !method.bytes().all(is_token) {
        return Err(ParseError::InvalidMethod);
    }
    let (url, version) = rest.rsplit_once(' ').ok_or(ParseError::InvalidVersion)?;
    if url.is_empty() || url.contains(' ') {
        return Err(ParseError::InvalidUrl);
    }
    let (major, minor) = parse_version(version)?;

    delegate.on_req_method(method);
    delegate.on_req_path(url);
    delegate.on_http_version(major, minor);
    Ok(())
}

fn parse_status_line<D: ParserDelegate>(line: &[u8], delegate: &mut D) -> Result<u16, ParseError> {
    let line = String::from_utf8_lossy(line);
    let (version, rest) = line.split_once(' ').ok_or(ParseError::InvalidStatus)?;
    let (major, minor) = parse_version(version)?;
    let code = rest.split_once(' ').map_or(rest, |(code, _reason)| code);
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidStatus);
    }
    let status: u16 = code.parse().map_err(|_| ParseError::InvalidStatus)?;
    if status < 100 {
        return Err(ParseError::InvalidStatus);
    }

    delegate.on_http_version(major, minor);
    delegate.on_status(status);
    Ok(status)
}

fn parse_version(version: &str) -> Result<(u8, u8), ParseError> {
    let digits = version.strip_prefix("HTTP/").ok_or(ParseError::InvalidVersion)?;
    match digits.as_bytes() {
        [major, b'.', minor] if major.is_ascii_digit() && minor.is_ascii_digit() => {
            Ok((major - b'0', minor - b'0'))
        }
        _ => Err(ParseError::InvalidVersion),
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ParseError> {
    let line = String::from_utf8_lossy(line);
    let size = line.split(';').next().unwrap_or_default().trim();
    if size.is_empty() || size.len() > 16 {
        return Err(ParseError::InvalidChunk);
    }
    u64::from_str_radix(size, 16).map_err(|_| ParseError::InvalidChunk)
}

/// True if the final transfer coding is `chunked`.
pub fn is_chunked(value: &str) -> bool {
    value
        .rsplit(',')
        .next()
        .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"))
}

fn is_token(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}
