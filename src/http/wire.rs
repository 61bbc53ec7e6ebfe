//! HTTP/1.x head serialization and chunk framing.
//!
//! Heads are written into a byte sink (`Vec<u8>`) that the connection
//! flushes to the socket after each read.

use crate::http::message::{HttpHeaders, HttpRequest, HttpResponse};

const CRLF: &[u8] = b"\r\n";
const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Write every non-empty header as `Name: v0, v1\r\n`, then the blank line.
pub fn write_headers(sink: &mut Vec<u8>, headers: &HttpHeaders) {
    for header in headers.iter() {
        let Some((first, rest)) = header.values.split_first() else {
            continue;
        };

        sink.extend_from_slice(header.name.as_bytes());
        sink.extend_from_slice(b": ");
        sink.extend_from_slice(first.as_bytes());
        for value in rest {
            sink.extend_from_slice(b", ");
            sink.extend_from_slice(value.as_bytes());
        }
        sink.extend_from_slice(CRLF);
    }
    sink.extend_from_slice(CRLF);
}

/// `<METHOD> <URL> HTTP/<version>\r\n` followed by the headers.
pub fn write_request_head(sink: &mut Vec<u8>, request: &HttpRequest) {
    sink.extend_from_slice(request.method.as_bytes());
    sink.push(b' ');
    sink.extend_from_slice(request.url.as_bytes());
    sink.extend_from_slice(b" HTTP/");
    sink.extend_from_slice(request.version.as_bytes());
    sink.extend_from_slice(CRLF);
    write_headers(sink, &request.headers);
}

/// `HTTP/<version> <status> -\r\n` followed by the headers.
///
/// The reason phrase is always a literal `-`.
pub fn write_response_head(sink: &mut Vec<u8>, response: &HttpResponse) {
    sink.extend_from_slice(b"HTTP/");
    sink.extend_from_slice(response.version.as_bytes());
    sink.push(b' ');
    sink.extend_from_slice(response.status.as_bytes());
    sink.extend_from_slice(b" -\r\n");
    write_headers(sink, &response.headers);
}

/// Frame `payload` as one chunk: `<hex len>\r\n<payload>\r\n`.
pub fn write_chunk(sink: &mut Vec<u8>, payload: &[u8]) {
    if payload.is_empty() {
        // a zero-length chunk would terminate the body early
        return;
    }
    sink.extend_from_slice(format!("{:x}", payload.len()).as_bytes());
    sink.extend_from_slice(CRLF);
    sink.extend_from_slice(payload);
    sink.extend_from_slice(CRLF);
}

/// The terminating `0\r\n\r\n` chunk.
pub fn write_last_chunk(sink: &mut Vec<u8>) {
    sink.extend_from_slice(LAST_CHUNK);
}
