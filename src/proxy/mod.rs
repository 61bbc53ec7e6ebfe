//! Proxy engine.
//!
//! # Data Flow
//! ```text
//! server.rs: accept client → connect backend (timeout) → fresh filter chain
//!     → connection.rs: ProxyConnection relays both sockets
//!         → handler.rs: per-direction parser delegates run the chain
//!           at head-complete and re-frame bodies
//! ```
//!
//! # Design Decisions
//! - Exactly one backend connection per client connection, no pooling
//! - A rejection always answers the client; the backend never sees it

pub mod connection;
pub mod handler;
pub mod server;

pub use connection::{CloseReason, ConnectionSettings, HttpRelay, ProxyConnection, Side};
pub use handler::{DownstreamProxyHandler, Exchange, Outbound, SharedChain, UpstreamProxyHandler};
pub use server::{ProxyServer, RuntimeState, ServerError};
