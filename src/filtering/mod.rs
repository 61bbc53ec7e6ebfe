//! Interception policy subsystem.
//!
//! # Data Flow
//! ```text
//! Message head complete (request or response)
//!     → chain.rs (run request or response stage in order)
//!     → each HttpFilter returns Ok(None) | Ok(Some(action)) | Err
//!     → action.rs (NextFilter / Consume / Reject)
//!     → proxy handler forwards the head or answers the client
//!
//! At startup:
//!     [pipeline] config → registry.rs (kind → factory) → ChainFactory
//!     → one fresh HttpFilterChain per accepted connection
//! ```
//!
//! # Design Decisions
//! - Filters are synchronous and must not block
//! - A failing filter is a rejection, never a dropped connection
//! - Rejections never reach the backend; they answer the client

pub mod action;
pub mod builtin;
pub mod chain;
pub mod registry;

pub use action::{consume, pass_event, reject, reject_with_status, ActionKind, FilterAction};
pub use chain::{FilterError, FilterResult, FilterSlot, HttpFilter, HttpFilterChain};
pub use registry::{ChainConstructor, ChainFactory, FilterRegistry, RegistryError};
