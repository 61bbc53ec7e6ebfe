//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, filter options resolved)
//!     → ProxyConfig (validated, immutable)
//!     → ProxyServer builds its runtime state from it
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of the server's runtime state
//!     → new connections observe the new pipeline and target
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{FilterConfig, HostPort, PipelineConfig, ProxyConfig};
pub use validation::ValidationError;
pub use watcher::ConfigWatcher;
