//! HTTP intercepting reverse proxy library.
//!
//! Terminates client connections, opens one backend connection per client,
//! and relays HTTP/1.x in both directions while a per-connection filter
//! chain inspects, rewrites, or rejects every message head.

// Core subsystems
pub mod config;
pub mod filtering;
pub mod http;
pub mod net;
pub mod proxy;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::ProxyConfig;
pub use filtering::{FilterAction, HttpFilter, HttpFilterChain};
pub use lifecycle::Shutdown;
pub use proxy::ProxyServer;
