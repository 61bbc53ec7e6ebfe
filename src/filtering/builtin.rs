//! Built-in filter kinds selectable from `[pipeline.filters.<alias>]`.
//!
//! | kind | effect |
//! |---|---|
//! | `add_header` | add (or overwrite) a header |
//! | `remove_header` | drop headers by name |
//! | `deny_methods` | reject requests by method |
//! | `deny_path_prefix` | reject requests by URL prefix |
//! | `require_header` | reject requests missing a header |
//! | `request_id` | stamp a UUID request id, echoed on the response |
//! | `access_log` | log request line and response status |

use std::sync::Arc;

use serde::Deserialize;

use crate::filtering::action::{reject, FilterAction};
use crate::filtering::chain::{FilterResult, HttpFilter};
use crate::filtering::registry::{parse_options, FilterFactory, FilterRegistry, RegistryError};
use crate::http::message::{HttpHeaders, HttpRequest, HttpResponse};

/// Register every built-in kind.
pub fn register_all(registry: &mut FilterRegistry) {
    registry.register("add_header", |options| {
        let options: AddHeaderOptions = parse_options("add_header", options)?;
        Ok(factory(move || AddHeader::new(options.clone())))
    });
    registry.register("remove_header", |options| {
        let options: RemoveHeaderOptions = parse_options("remove_header", options)?;
        Ok(factory(move || RemoveHeader {
            names: options.names.clone(),
        }))
    });
    registry.register("deny_methods", |options| {
        let options: DenyMethodsOptions = parse_options("deny_methods", options)?;
        let rejection = rejection("deny_methods", options.status)?;
        Ok(factory(move || DenyMethods {
            methods: options.methods.clone(),
            rejection: Arc::clone(&rejection),
        }))
    });
    registry.register("deny_path_prefix", |options| {
        let options: DenyPathPrefixOptions = parse_options("deny_path_prefix", options)?;
        let rejection = rejection("deny_path_prefix", options.status)?;
        Ok(factory(move || DenyPathPrefix {
            prefixes: options.prefixes.clone(),
            rejection: Arc::clone(&rejection),
        }))
    });
    registry.register("require_header", |options| {
        let options: RequireHeaderOptions = parse_options("require_header", options)?;
        let rejection = rejection("require_header", options.status)?;
        Ok(factory(move || RequireHeader {
            name: options.name.clone(),
            rejection: Arc::clone(&rejection),
        }))
    });
    registry.register("request_id", |options| {
        let options: RequestIdOptions = parse_options("request_id", options)?;
        Ok(factory(move || RequestId {
            header: options.header.clone(),
            current: None,
        }))
    });
    registry.register("access_log", |options| {
        let _: AccessLogOptions = parse_options("access_log", options)?;
        Ok(factory(AccessLog::default))
    });
}

fn factory<F, T>(make: F) -> FilterFactory
where
    F: Fn() -> T + Send + Sync + 'static,
    T: HttpFilter + 'static,
{
    Arc::new(move || Box::new(make()) as Box<dyn HttpFilter>)
}

/// Build the shared rejection response for a filter, checking the status.
fn rejection(kind: &str, status: u16) -> Result<Arc<HttpResponse>, RegistryError> {
    if !(100..=599).contains(&status) {
        return Err(RegistryError::InvalidOptions {
            kind: kind.to_string(),
            message: format!("status {status} is not a valid HTTP status"),
        });
    }
    Ok(Arc::new(HttpResponse::empty(status)))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct AddHeaderOptions {
    name: String,
    value: String,
    #[serde(default)]
    overwrite: bool,
}

/// Adds a header value to every message it sees.
#[derive(Debug)]
pub struct AddHeader {
    options: AddHeaderOptions,
}

impl AddHeader {
    fn new(options: AddHeaderOptions) -> Self {
        Self { options }
    }

    fn apply(&self, headers: &mut HttpHeaders) {
        if self.options.overwrite {
            headers.remove(&self.options.name);
        }
        headers
            .header(&self.options.name)
            .push_value(self.options.value.clone());
    }
}

impl HttpFilter for AddHeader {
    fn name(&self) -> &str {
        "add_header"
    }

    fn on_request(&mut self, request: &mut HttpRequest) -> FilterResult {
        self.apply(&mut request.headers);
        Ok(None)
    }

    fn on_response(&mut self, response: &mut HttpResponse) -> FilterResult {
        self.apply(&mut response.headers);
        Ok(None)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RemoveHeaderOptions {
    names: Vec<String>,
}

/// Drops the named headers.
#[derive(Debug)]
pub struct RemoveHeader {
    names: Vec<String>,
}

impl RemoveHeader {
    fn apply(&self, headers: &mut HttpHeaders) {
        for name in &self.names {
            headers.remove(name);
        }
    }
}

impl HttpFilter for RemoveHeader {
    fn name(&self) -> &str {
        "remove_header"
    }

    fn on_request(&mut self, request: &mut HttpRequest) -> FilterResult {
        self.apply(&mut request.headers);
        Ok(None)
    }

    fn on_response(&mut self, response: &mut HttpResponse) -> FilterResult {
        self.apply(&mut response.headers);
        Ok(None)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct DenyMethodsOptions {
    methods: Vec<String>,
    #[serde(default = "default_deny_methods_status")]
    status: u16,
}

fn default_deny_methods_status() -> u16 {
    405
}

/// Rejects requests whose method is listed.
#[derive(Debug)]
pub struct DenyMethods {
    methods: Vec<String>,
    rejection: Arc<HttpResponse>,
}

impl HttpFilter for DenyMethods {
    fn name(&self) -> &str {
        "deny_methods"
    }

    fn on_request(&mut self, request: &mut HttpRequest) -> FilterResult {
        if self.methods.iter().any(|m| m.eq_ignore_ascii_case(&request.method)) {
            tracing::debug!(method = %request.method, url = %request.url, "Method denied");
            return Ok(Some(reject(Some(Arc::clone(&self.rejection)))));
        }
        Ok(None)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct DenyPathPrefixOptions {
    prefixes: Vec<String>,
    #[serde(default = "default_deny_path_status")]
    status: u16,
}

fn default_deny_path_status() -> u16 {
    403
}

/// Rejects requests whose target starts with a listed prefix (case-sensitive).
#[derive(Debug)]
pub struct DenyPathPrefix {
    prefixes: Vec<String>,
    rejection: Arc<HttpResponse>,
}

impl HttpFilter for DenyPathPrefix {
    fn name(&self) -> &str {
        "deny_path_prefix"
    }

    fn on_request(&mut self, request: &mut HttpRequest) -> FilterResult {
        if self.prefixes.iter().any(|p| request.url.starts_with(p.as_str())) {
            tracing::debug!(url = %request.url, "Path denied");
            return Ok(Some(reject(Some(Arc::clone(&self.rejection)))));
        }
        Ok(None)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RequireHeaderOptions {
    name: String,
    #[serde(default = "default_require_header_status")]
    status: u16,
}

fn default_require_header_status() -> u16 {
    401
}

/// Rejects requests that lack a header (or carry it with no value).
#[derive(Debug)]
pub struct RequireHeader {
    name: String,
    rejection: Arc<HttpResponse>,
}

impl HttpFilter for RequireHeader {
    fn name(&self) -> &str {
        "require_header"
    }

    fn on_request(&mut self, request: &mut HttpRequest) -> FilterResult {
        let present = request
            .headers
            .get(&self.name)
            .is_some_and(|h| h.values.iter().any(|v| !v.is_empty()));
        if present {
            Ok(None)
        } else {
            Ok(Some(reject(Some(Arc::clone(&self.rejection)))))
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RequestIdOptions {
    #[serde(default = "default_request_id_header")]
    header: String,
}

fn default_request_id_header() -> String {
    "X-Request-ID".to_string()
}

/// Ensures every request carries an id and echoes it on the response
/// when the same instance sees both (`use_singletons`).
#[derive(Debug)]
pub struct RequestId {
    header: String,
    current: Option<String>,
}

impl HttpFilter for RequestId {
    fn name(&self) -> &str {
        "request_id"
    }

    fn on_request(&mut self, request: &mut HttpRequest) -> FilterResult {
        let existing = request
            .headers
            .get(&self.header)
            .and_then(|h| h.first_value())
            .map(str::to_owned);
        let id = match existing {
            Some(id) => id,
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                request.header(&self.header).push_value(id.clone());
                id
            }
        };
        self.current = Some(id);
        Ok(None)
    }

    fn on_response(&mut self, response: &mut HttpResponse) -> FilterResult {
        if let Some(id) = self.current.take() {
            if !response.headers.contains(&self.header) {
                response.header(&self.header).push_value(id);
            }
        }
        Ok(None)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct AccessLogOptions {}

/// Logs each request line and, when it also sees responses, their status.
#[derive(Debug, Default)]
pub struct AccessLog {
    pending: Option<(String, String)>,
}

impl HttpFilter for AccessLog {
    fn name(&self) -> &str {
        "access_log"
    }

    fn on_request(&mut self, request: &mut HttpRequest) -> FilterResult {
        tracing::info!(method = %request.method, url = %request.url, version = %request.version, "Request");
        self.pending = Some((request.method.clone(), request.url.clone()));
        Ok(None)
    }

    fn on_response(&mut self, response: &mut HttpResponse) -> FilterResult {
        match self.pending.take() {
            Some((method, url)) => {
                tracing::info!(method = %method, url = %url, status = %response.status, "Response");
            }
            None => tracing::info!(status = %response.status, "Response"),
        }
        Ok(None)
    }
}

/// Used by tests and embedders that want a fixed decision.
impl HttpFilter for FilterAction {
    fn name(&self) -> &str {
        "fixed_action"
    }

    fn on_request(&mut self, _request: &mut HttpRequest) -> FilterResult {
        Ok(Some(self.clone()))
    }

    fn on_response(&mut self, _response: &mut HttpResponse) -> FilterResult {
        Ok(Some(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filtering::action::consume;

    fn build(kind: &str, options: &str) -> Result<Box<dyn HttpFilter>, RegistryError> {
        let registry = FilterRegistry::with_builtins();
        let table: toml::Table = toml::from_str(options).unwrap();
        registry.resolve(kind, &table).map(|factory| factory())
    }

    fn request(method: &str, url: &str) -> HttpRequest {
        let mut request = HttpRequest::new();
        request.method = method.into();
        request.url = url.into();
        request.version = "1.1".into();
        request
    }

    #[test]
    fn add_header_overwrites_when_asked() {
        let mut filter = build("add_header", "name = \"Via\"\nvalue = \"proxy\"\noverwrite = true").unwrap();
        let mut req = request("GET", "/");
        req.header("via").push_value("old");

        filter.on_request(&mut req).unwrap();
        let via = req.headers.get("Via").unwrap();
        assert_eq!(via.values, vec!["proxy"]);
    }

    #[test]
    fn add_header_appends_by_default() {
        let mut filter = build("add_header", "name = \"Via\"\nvalue = \"proxy\"").unwrap();
        let mut req = request("GET", "/");
        req.header("Via").push_value("old");

        filter.on_request(&mut req).unwrap();
        assert_eq!(req.headers.get("via").unwrap().values, vec!["old", "proxy"]);
    }

    #[test]
    fn remove_header_strips_response_headers() {
        let mut filter = build("remove_header", "names = [\"Server\", \"x-powered-by\"]").unwrap();
        let mut response = HttpResponse::with_status(200);
        response.header("Server").push_value("nginx");
        response.header("X-Powered-By").push_value("php");
        response.header("Date").push_value("today");

        filter.on_response(&mut response).unwrap();
        assert_eq!(response.headers.len(), 1);
        assert!(response.headers.contains("date"));
    }

    #[test]
    fn deny_methods_rejects_with_configured_status() {
        let mut filter = build("deny_methods", "methods = [\"TRACE\"]\nstatus = 501").unwrap();

        let action = filter.on_request(&mut request("trace", "/")).unwrap().unwrap();
        assert_eq!(action.response().unwrap().status, "501");
        assert!(filter.on_request(&mut request("GET", "/")).unwrap().is_none());
    }

    #[test]
    fn deny_path_prefix_rejects_matching_targets() {
        let mut filter = build("deny_path_prefix", "prefixes = [\"/admin\"]").unwrap();

        let action = filter.on_request(&mut request("GET", "/admin/users")).unwrap().unwrap();
        assert_eq!(action.response().unwrap().status, "403");
        assert!(filter.on_request(&mut request("GET", "/Admin")).unwrap().is_none());
    }

    #[test]
    fn require_header_rejects_when_missing() {
        let mut filter = build("require_header", "name = \"Authorization\"").unwrap();

        let action = filter.on_request(&mut request("GET", "/")).unwrap().unwrap();
        assert_eq!(action.response().unwrap().status, "401");

        let mut authorized = request("GET", "/");
        authorized.header("authorization").push_value("Bearer t");
        assert!(filter.on_request(&mut authorized).unwrap().is_none());
    }

    #[test]
    fn request_id_keeps_existing_id() {
        let mut filter = build("request_id", "").unwrap();
        let mut req = request("GET", "/");
        req.header("x-request-id").push_value("abc");

        filter.on_request(&mut req).unwrap();
        assert_eq!(req.headers.get("X-Request-ID").unwrap().values, vec!["abc"]);

        let mut response = HttpResponse::with_status(200);
        filter.on_response(&mut response).unwrap();
        assert_eq!(
            response.headers.get("X-Request-ID").and_then(|h| h.first_value()),
            Some("abc")
        );
    }

    #[test]
    fn bad_options_are_reported() {
        assert!(matches!(
            build("deny_methods", "methods = [\"GET\"]\nstatus = 42"),
            Err(RegistryError::InvalidOptions { .. })
        ));
        assert!(matches!(
            build("add_header", "name = \"X\""),
            Err(RegistryError::InvalidOptions { .. })
        ));
        assert!(matches!(
            build("access_log", "verbose = true"),
            Err(RegistryError::InvalidOptions { .. })
        ));
    }

    #[test]
    fn fixed_action_filter_returns_its_action() {
        let mut filter = consume();
        let action = filter.on_request(&mut request("GET", "/")).unwrap().unwrap();
        assert!(action.is_consuming());
    }
}
