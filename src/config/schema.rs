//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the filtering proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener and runtime settings.
    pub core: CoreConfig,

    /// Where requests are proxied to.
    pub routing: RoutingConfig,

    /// Filter aliases and their stage order.
    pub pipeline: PipelineConfig,

    /// Responses the proxy synthesizes itself.
    pub templates: TemplatesConfig,

    /// Decisions for malformed input and rejected bodies.
    pub policy: PolicyConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Parser limits.
    pub limits: LimitsConfig,

    /// Log output settings.
    pub logging: LoggingConfig,

    /// Metrics exporter settings.
    pub observability: ObservabilityConfig,
}

/// Listener and runtime configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Runtime worker threads (0 = one per CPU).
    pub workers: usize,

    /// Maximum concurrent client connections (backpressure).
    pub max_connections: usize,

    /// Extra plugin directories. Accepted and logged; filters are resolved
    /// from the built-in registry.
    pub plugin_paths: Vec<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            workers: 0,
            max_connections: 10_000,
            plugin_paths: Vec::new(),
        }
    }
}

/// Downstream target configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Backend hosts as `host[:port]` (port defaults to 80). Only the first
    /// entry is used.
    pub upstream_hosts: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            upstream_hosts: vec!["localhost:80".to_string()],
        }
    }
}

/// Filter pipeline configuration.
///
/// ```toml
/// [pipeline]
/// upstream = ["auth", "tag"]
/// downstream = ["tag"]
///
/// [pipeline.filters.auth]
/// kind = "require_header"
/// name = "Authorization"
///
/// [pipeline.filters.tag]
/// kind = "add_header"
/// name = "Via"
/// value = "filter-proxy"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// Share one filter instance between the stages when an alias appears
    /// in both `upstream` and `downstream`.
    pub use_singletons: bool,

    /// Aliases receiving request (client-originated) events, in order.
    pub upstream: Vec<String>,

    /// Aliases receiving response (backend-originated) events, in order.
    pub downstream: Vec<String>,

    /// Alias definitions.
    pub filters: BTreeMap<String, FilterConfig>,
}

/// One filter alias: its kind plus kind-specific options.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FilterConfig {
    /// Registered filter kind (e.g. "add_header").
    pub kind: String,

    /// Remaining keys, handed to the kind's builder.
    #[serde(flatten)]
    pub options: toml::Table,
}

/// Templates for proxy-generated responses.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TemplatesConfig {
    /// Status sent to the client when the backend cannot be reached.
    pub error_status: u16,
    /// Status sent for a rejection that carries no response of its own,
    /// including filter failures.
    pub rejection_status: u16,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            error_status: 502,
            rejection_status: 400,
        }
    }
}

/// Connection policies.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Close the connection when either side sends malformed HTTP.
    /// When false the parser is reset and the rest of that read is dropped.
    pub close_on_parse_error: bool,

    /// Keep relaying the body of a message whose head was rejected.
    pub forward_body_after_reject: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            close_on_parse_error: true,
            forward_body_after_reject: false,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Backend connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Idle connection timeout in seconds (0 disables).
    pub idle_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            idle_secs: 60,
        }
    }
}

/// Parser limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest accepted message head in bytes.
    pub max_head_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_head_bytes: crate::http::parser::DEFAULT_MAX_HEAD_BYTES,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write logs to stdout.
    pub console: bool,

    /// Also append logs to this file.
    pub logfile: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    pub verbosity: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            console: true,
            logfile: None,
            verbosity: "warn".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// A resolved `host:port` backend target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    /// Parse `host[:port]`, defaulting the port to 80.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let (host, port) = match value.split_once(':') {
            Some((host, port)) => (host, port.parse().ok()?),
            None => (value, 80),
        };
        if host.is_empty() || host.contains(':') {
            return None;
        }
        Some(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl std::fmt::Display for HostPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl RoutingConfig {
    /// The downstream target: the first valid upstream host.
    pub fn target(&self) -> Option<HostPort> {
        self.upstream_hosts.first().and_then(|host| HostPort::parse(host))
    }
}
