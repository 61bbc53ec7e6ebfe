//! Filter trait and the short-circuiting chain that runs it.
//!
//! # Responsibilities
//! - Define the `HttpFilter` extension point
//! - Run filters in order for the request stage and the response stage
//! - Turn filter failures into the default rejection
//!
//! # Design Decisions
//! - A chain is built per connection, so filters may keep mutable state
//!   without synchronization
//! - One filter instance may sit in both stages (`reuse_*`), which lets it
//!   carry state from a request to its response
//! - Failures travel through `FilterError`, never through panics

use thiserror::Error;

use crate::filtering::action::{pass_event, reject, FilterAction};
use crate::http::message::{HttpRequest, HttpResponse};

/// Error raised by a filter hook.
#[derive(Debug, Error)]
#[error("filter {filter} failed: {message}")]
pub struct FilterError {
    pub filter: String,
    pub message: String,
}

impl FilterError {
    pub fn new(filter: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            message: message.into(),
        }
    }
}

/// What a hook returns: no opinion (`Ok(None)`), an action, or a failure.
pub type FilterResult = Result<Option<FilterAction>, FilterError>;

/// Interception logic invoked once per message head.
pub trait HttpFilter: Send {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn on_request(&mut self, _request: &mut HttpRequest) -> FilterResult {
        Ok(None)
    }

    fn on_response(&mut self, _response: &mut HttpResponse) -> FilterResult {
        Ok(None)
    }
}

/// Handle to a filter already held by a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterSlot(usize);

/// Ordered filter pipeline for one connection.
#[derive(Default)]
pub struct HttpFilterChain {
    filters: Vec<Box<dyn HttpFilter>>,
    request_stage: Vec<usize>,
    response_stage: Vec<usize>,
}

impl HttpFilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter that sees both requests and responses.
    pub fn add_filter(&mut self, filter: impl HttpFilter + 'static) -> FilterSlot {
        let slot = self.insert(Box::new(filter));
        self.request_stage.push(slot.0);
        self.response_stage.push(slot.0);
        slot
    }

    /// Append a filter to the request (upstream) stage only.
    pub fn add_upstream_filter(&mut self, filter: Box<dyn HttpFilter>) -> FilterSlot {
        let slot = self.insert(filter);
        self.request_stage.push(slot.0);
        slot
    }

    /// Append a filter to the response (downstream) stage only.
    pub fn add_downstream_filter(&mut self, filter: Box<dyn HttpFilter>) -> FilterSlot {
        let slot = self.insert(filter);
        self.response_stage.push(slot.0);
        slot
    }

    /// Append an existing filter instance to the request stage.
    pub fn reuse_upstream(&mut self, slot: FilterSlot) {
        self.request_stage.push(slot.0);
    }

    /// Append an existing filter instance to the response stage.
    pub fn reuse_downstream(&mut self, slot: FilterSlot) {
        self.response_stage.push(slot.0);
    }

    /// Number of distinct filter instances.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run the request stage.
    pub fn on_request(&mut self, request: &mut HttpRequest) -> FilterAction {
        let mut last_action = pass_event();

        for &index in &self.request_stage {
            let filter = &mut self.filters[index];
            let outcome = filter.on_request(request);
            if let Some(action) = resolve(filter.name(), outcome) {
                last_action = action;
                if last_action.is_consuming() || last_action.is_rejecting() {
                    break;
                }
            }
        }

        last_action
    }

    /// Run the response stage.
    pub fn on_response(&mut self, response: &mut HttpResponse) -> FilterAction {
        let mut last_action = pass_event();

        for &index in &self.response_stage {
            let filter = &mut self.filters[index];
            let outcome = filter.on_response(response);
            if let Some(action) = resolve(filter.name(), outcome) {
                last_action = action;
                if last_action.is_consuming() || last_action.is_rejecting() {
                    break;
                }
            }
        }

        last_action
    }

    fn insert(&mut self, filter: Box<dyn HttpFilter>) -> FilterSlot {
        self.filters.push(filter);
        FilterSlot(self.filters.len() - 1)
    }
}

impl std::fmt::Debug for HttpFilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFilterChain")
            .field("filters", &self.filters.iter().map(|x| x.name()).collect::<Vec<_>>())
            .field("request_stage", &self.request_stage)
            .field("response_stage", &self.response_stage)
            .finish()
    }
}

/// A failed hook counts as the default rejection.
fn resolve(name: &str, outcome: FilterResult) -> Option<FilterAction> {
    match outcome {
        Ok(action) => action,
        Err(err) => {
            tracing::warn!(filter = %name, error = %err, "Filter failed, rejecting");
            Some(reject(None))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::filtering::action::consume;

    /// Returns a fixed outcome and counts invocations.
    struct Scripted {
        calls: Arc<AtomicUsize>,
        outcome: fn() -> FilterResult,
    }

    impl Scripted {
        fn new(outcome: fn() -> FilterResult) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    calls: Arc::clone(&calls),
                    outcome,
                },
                calls,
            )
        }
    }

    impl HttpFilter for Scripted {
        fn on_request(&mut self, _request: &mut HttpRequest) -> FilterResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }

        fn on_response(&mut self, _response: &mut HttpResponse) -> FilterResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    /// Remembers the request method and stamps it on the response.
    #[derive(Default)]
    struct Correlator {
        method: Option<String>,
    }

    impl HttpFilter for Correlator {
        fn on_request(&mut self, request: &mut HttpRequest) -> FilterResult {
            self.method = Some(request.method.clone());
            Ok(None)
        }

        fn on_response(&mut self, response: &mut HttpResponse) -> FilterResult {
            if let Some(method) = &self.method {
                response.header("X-Request-Method").push_value(method.clone());
            }
            Ok(None)
        }
    }

    #[test]
    fn empty_chain_passes() {
        let mut chain = HttpFilterChain::new();
        assert_eq!(chain.on_request(&mut HttpRequest::new()).kind(), pass_event().kind());
        assert_eq!(chain.on_response(&mut HttpResponse::new()).kind(), pass_event().kind());
    }

    #[test]
    fn reject_short_circuits_and_preserves_response() {
        let custom = Arc::new(HttpResponse::empty(403));
        let mut chain = HttpFilterChain::new();

        let (first, first_calls) = Scripted::new(|| Ok(None));
        let (second, second_calls) = Scripted::new(|| Ok(Some(pass_event())));
        chain.add_filter(first);
        chain.add_filter(second);

        struct RejectWith(Arc<HttpResponse>);
        impl HttpFilter for RejectWith {
            fn on_request(&mut self, _request: &mut HttpRequest) -> FilterResult {
                Ok(Some(reject(Some(Arc::clone(&self.0)))))
            }
        }
        chain.add_filter(RejectWith(Arc::clone(&custom)));

        let (after, after_calls) = Scripted::new(|| Ok(None));
        chain.add_filter(after);

        let action = chain.on_request(&mut HttpRequest::new());
        assert!(action.is_rejecting());
        assert!(Arc::ptr_eq(action.response().unwrap(), &custom));
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
        assert_eq!(after_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failing_filter_becomes_default_reject() {
        let mut chain = HttpFilterChain::new();
        let (failing, _) = Scripted::new(|| Err(FilterError::new("boom", "exploded")));
        let (after, after_calls) = Scripted::new(|| Ok(None));
        chain.add_filter(failing);
        chain.add_filter(after);

        let action = chain.on_response(&mut HttpResponse::new());
        assert!(action.is_rejecting());
        assert!(action.is_default_reject());
        assert_eq!(action.response().unwrap().status, "400");
        assert_eq!(after_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn consume_stops_chain_without_rejecting() {
        let mut chain = HttpFilterChain::new();
        let (consumer, _) = Scripted::new(|| Ok(Some(consume())));
        let (after, after_calls) = Scripted::new(|| Ok(None));
        chain.add_filter(consumer);
        chain.add_filter(after);

        let action = chain.on_request(&mut HttpRequest::new());
        assert!(action.is_consuming());
        assert!(!action.is_rejecting());
        assert_eq!(after_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stages_run_independently() {
        let mut chain = HttpFilterChain::new();
        let (upstream, upstream_calls) = Scripted::new(|| Ok(None));
        let (downstream, downstream_calls) = Scripted::new(|| Ok(None));
        chain.add_upstream_filter(Box::new(upstream));
        chain.add_downstream_filter(Box::new(downstream));

        chain.on_request(&mut HttpRequest::new());
        assert_eq!(upstream_calls.load(Ordering::SeqCst), 1);
        assert_eq!(downstream_calls.load(Ordering::SeqCst), 0);

        chain.on_response(&mut HttpResponse::new());
        assert_eq!(upstream_calls.load(Ordering::SeqCst), 1);
        assert_eq!(downstream_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reused_instance_carries_state_to_response() {
        let mut chain = HttpFilterChain::new();
        let slot = chain.add_upstream_filter(Box::new(Correlator::default()));
        chain.reuse_downstream(slot);
        assert_eq!(chain.len(), 1);

        let mut request = HttpRequest::new();
        request.method = "PUT".into();
        chain.on_request(&mut request);

        let mut response = HttpResponse::new();
        chain.on_response(&mut response);
        assert_eq!(
            response.headers.get("x-request-method").and_then(|h| h.first_value()),
            Some("PUT")
        );
    }
}
