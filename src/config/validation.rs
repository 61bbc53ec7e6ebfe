//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (pipeline aliases reference defined filters)
//! - Validate value ranges (status codes, connection limits, addresses)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Filter options are checked by resolving them through the registry, so
//!   a config that validates also builds

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{HostPort, ProxyConfig};
use crate::filtering::registry::{FilterRegistry, RegistryError};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("core.bind_address `{0}` is not a socket address")]
    BindAddress(String),
    #[error("core.max_connections must be greater than zero")]
    ZeroConnections,
    #[error("routing.upstream_hosts is empty")]
    NoUpstreamHost,
    #[error("routing.upstream_hosts entry `{0}` is not host[:port]")]
    UpstreamHost(String),
    #[error("pipeline.filters.{alias}: {source}")]
    Filter {
        alias: String,
        #[source]
        source: RegistryError,
    },
    #[error("pipeline.{stage} references undefined filter `{alias}`")]
    UndefinedAlias { stage: &'static str, alias: String },
    #[error("{field} status {status} is outside 100..=599")]
    Status { field: &'static str, status: u16 },
    #[error("observability.metrics_address `{0}` is not a socket address")]
    MetricsAddress(String),
}

/// Validate against the built-in filter kinds.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    validate_config_with(config, &FilterRegistry::with_builtins())
}

/// Validate against a caller-supplied registry.
pub fn validate_config_with(
    config: &ProxyConfig,
    registry: &FilterRegistry,
) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.core.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.core.bind_address.clone()));
    }
    if config.core.max_connections == 0 {
        errors.push(ValidationError::ZeroConnections);
    }

    if config.routing.upstream_hosts.is_empty() {
        errors.push(ValidationError::NoUpstreamHost);
    }
    for host in &config.routing.upstream_hosts {
        if HostPort::parse(host).is_none() {
            errors.push(ValidationError::UpstreamHost(host.clone()));
        }
    }

    for (alias, filter) in &config.pipeline.filters {
        if let Err(source) = registry.resolve(&filter.kind, &filter.options) {
            errors.push(ValidationError::Filter {
                alias: alias.clone(),
                source,
            });
        }
    }
    for (stage, aliases) in [
        ("upstream", &config.pipeline.upstream),
        ("downstream", &config.pipeline.downstream),
    ] {
        for alias in aliases {
            if !config.pipeline.filters.contains_key(alias) {
                errors.push(ValidationError::UndefinedAlias {
                    stage,
                    alias: alias.clone(),
                });
            }
        }
    }

    let statuses = [
        ("templates.error_status", config.templates.error_status),
        ("templates.rejection_status", config.templates.rejection_status),
    ];
    for (field, status) in statuses {
        if !(100..=599).contains(&status) {
            errors.push(ValidationError::Status { field, status });
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
