//! Filter actions.
//!
//! A filter answers every head it inspects with an action: let the next
//! filter see it, stop the chain but keep proxying, or reject.

use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::http::message::HttpResponse;

/// The canned response carried by the default rejection.
static DEFAULT_REJECT_RESPONSE: LazyLock<Arc<HttpResponse>> =
    LazyLock::new(|| Arc::new(HttpResponse::empty(400)));

/// Discriminant of a [`FilterAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    NextFilter,
    Consume,
    Reject,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::NextFilter => "next_filter",
            ActionKind::Consume => "consume",
            ActionKind::Reject => "reject",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision returned by a filter.
///
/// Rejections share their response through an `Arc`, so the default
/// rejection never allocates and the payload cannot be mutated.
#[derive(Debug, Clone)]
pub enum FilterAction {
    /// No opinion; later filters still run.
    NextFilter,
    /// Stop the chain; the message is still proxied.
    Consume,
    /// Stop the chain; the carried response goes back to the client instead.
    Reject(Arc<HttpResponse>),
}

impl FilterAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            FilterAction::NextFilter => ActionKind::NextFilter,
            FilterAction::Consume => ActionKind::Consume,
            FilterAction::Reject(_) => ActionKind::Reject,
        }
    }

    pub fn is_consuming(&self) -> bool {
        matches!(self, FilterAction::Consume)
    }

    pub fn is_rejecting(&self) -> bool {
        matches!(self, FilterAction::Reject(_))
    }

    /// The rejection response, if this is a rejection.
    pub fn response(&self) -> Option<&Arc<HttpResponse>> {
        match self {
            FilterAction::Reject(response) => Some(response),
            _ => None,
        }
    }

    /// True if this is the default rejection sharing the canned response.
    pub fn is_default_reject(&self) -> bool {
        self.response()
            .is_some_and(|response| Arc::ptr_eq(response, &DEFAULT_REJECT_RESPONSE))
    }
}

/// Pass the event to the next filter.
pub fn pass_event() -> FilterAction {
    FilterAction::NextFilter
}

/// Halt the chain but let the message through the proxy.
pub fn consume() -> FilterAction {
    FilterAction::Consume
}

/// Reject the exchange, answering the client with `response` or the
/// default `400` with `Content-Length: 0`.
pub fn reject(response: Option<Arc<HttpResponse>>) -> FilterAction {
    FilterAction::Reject(response.unwrap_or_else(|| Arc::clone(&DEFAULT_REJECT_RESPONSE)))
}

/// Reject with an empty-bodied response of the given status.
pub fn reject_with_status(status: u16) -> FilterAction {
    reject(Some(Arc::new(HttpResponse::empty(status))))
}
