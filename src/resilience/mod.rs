//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted client connection:
//!     → timeouts.rs (bounded backend connect)
//!     → On failure: error response to the client, connection closed
//!     → While relaying: idle deadline closes quiet connections
//! ```
//!
//! # Design Decisions
//! - Every backend connect has a deadline
//! - No retries: one backend connection per client connection

pub mod timeouts;

pub use timeouts::{connect_with_timeout, ConnectError, IdleDeadline, Timeouts};
