//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Connections, handlers and the accept loop produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters and gauges via the metrics facade)
//!
//! Consumers:
//!     → stdout and/or a log file
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Log fields carry `connection_id` so both directions of one
//!   connection can be correlated
//! - Metrics are cheap when no exporter is installed

pub mod logging;
pub mod metrics;
