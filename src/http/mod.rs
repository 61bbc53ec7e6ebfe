//! HTTP/1.x message handling.
//!
//! # Data Flow
//! ```text
//! raw socket bytes
//!     → parser.rs (incremental tokenizer, delegate callbacks)
//!     → message.rs (request / response head built field by field)
//!     → [filter chain inspects the head]
//!     → wire.rs (head re-serialized, body re-framed)
//!     → peer socket
//! ```

pub mod message;
pub mod parser;
pub mod wire;

pub use message::{HttpHeader, HttpHeaders, HttpRequest, HttpResponse};
pub use parser::{BodyFraming, HeadersComplete, HttpParser, ParseError, ParserDelegate, ParserKind};
