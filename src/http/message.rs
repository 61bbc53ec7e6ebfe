//! In-memory HTTP message heads.
//!
//! # Responsibilities
//! - Hold the request line / status line and headers of one message
//! - Keep headers in arrival order with case-insensitive lookup
//! - Never hold body bytes; bodies stay on the wire
//!
//! # Design Decisions
//! - Headers are a `Vec` scanned linearly: heads are small and emission
//!   order must match arrival order
//! - The first spelling of a header name is kept as its display name

/// A single header: display name plus every value seen for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpHeader {
    pub name: String,
    pub values: Vec<String>,
}

impl HttpHeader {
    /// Create an empty header with the given display name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
        }
    }

    /// Append a value.
    pub fn push_value(&mut self, value: impl Into<String>) {
        self.values.push(value.into());
    }

    pub fn first_value(&self) -> Option<&str> {
        self.values.first().map(String::as_str)
    }

    /// A header with no values is skipped on serialization.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True if `name` matches this header, ignoring ASCII case.
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Ordered, case-insensitive header map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpHeaders {
    entries: Vec<HttpHeader>,
}

impl HttpHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the header named `name`, creating an empty one at the end if absent.
    pub fn header(&mut self, name: &str) -> &mut HttpHeader {
        let index = match self.position(name) {
            Some(index) => index,
            None => {
                self.entries.push(HttpHeader::new(name));
                self.entries.len() - 1
            }
        };
        &mut self.entries[index]
    }

    pub fn get(&self, name: &str) -> Option<&HttpHeader> {
        self.entries.iter().find(|h| h.is_named(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut HttpHeader> {
        self.entries.iter_mut().find(|h| h.is_named(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Remove and return the header named `name`.
    pub fn remove(&mut self, name: &str) -> Option<HttpHeader> {
        self.position(name).map(|index| self.entries.remove(index))
    }

    /// Iterate in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &HttpHeader> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|h| h.is_named(name))
    }
}

/// Request head: method, request-target, version and headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    /// Protocol version without the `HTTP/` prefix, e.g. `"1.1"`.
    pub version: String,
    pub headers: HttpHeaders,
}

impl HttpRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for `self.headers.header(name)`.
    pub fn header(&mut self, name: &str) -> &mut HttpHeader {
        self.headers.header(name)
    }
}

/// Response head: status code, version and headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code as it goes on the wire.
    pub status: String,
    pub version: String,
    pub headers: HttpHeaders,
}

impl HttpResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// An HTTP/1.1 response with the given numeric status and no headers.
    pub fn with_status(status: u16) -> Self {
        Self {
            status: status.to_string(),
            version: "1.1".to_string(),
            headers: HttpHeaders::new(),
        }
    }

    /// An HTTP/1.1 response with `Content-Length: 0`, used for rejections.
    pub fn empty(status: u16) -> Self {
        let mut response = Self::with_status(status);
        response.header("Content-Length").push_value("0");
        response
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status.to_string();
    }

    /// Numeric status, if the wire string is a valid code.
    pub fn status_code(&self) -> Option<u16> {
        self.status.parse().ok()
    }

    pub fn header(&mut self, name: &str) -> &mut HttpHeader {
        self.headers.header(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_ignores_case() {
        let mut headers = HttpHeaders::new();
        headers.header("Content-Type").push_value("text/plain");

        assert!(headers.contains("content-type"));
        assert_eq!(
            headers.get("CONTENT-TYPE").and_then(HttpHeader::first_value),
            Some("text/plain")
        );
    }

    #[test]
    fn repeated_header_keeps_first_spelling_and_appends() {
        let mut headers = HttpHeaders::new();
        headers.header("X-Test").push_value("a");
        headers.header("x-test").push_value("b");

        assert_eq!(headers.len(), 1);
        let header = headers.get("X-TEST").unwrap();
        assert_eq!(header.name, "X-Test");
        assert_eq!(header.values, vec!["a", "b"]);
    }

    #[test]
    fn iteration_follows_arrival_order() {
        let mut headers = HttpHeaders::new();
        headers.header("B").push_value("1");
        headers.header("A").push_value("2");
        headers.header("C").push_value("3");
        headers.header("a").push_value("4");

        let names: Vec<_> = headers.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["B", "A", "C"]);
    }

    #[test]
    fn remove_drops_header() {
        let mut headers = HttpHeaders::new();
        headers.header("Host").push_value("x");
        assert!(headers.remove("HOST").is_some());
        assert!(headers.is_empty());
        assert!(headers.remove("host").is_none());
    }

    #[test]
    fn empty_response_carries_zero_content_length() {
        let response = HttpResponse::empty(400);
        assert_eq!(response.status, "400");
        assert_eq!(response.status_code(), Some(400));
        assert_eq!(response.version, "1.1");
        assert_eq!(
            response.headers.get("content-length").and_then(HttpHeader::first_value),
            Some("0")
        );
    }
}
