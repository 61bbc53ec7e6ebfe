//! Filter lookup by kind and per-connection chain construction.
//!
//! # Data Flow
//! ```text
//! [pipeline.filters.<alias>] kind + options
//!     → FilterRegistry::resolve (options parsed once, at startup)
//!     → FilterFactory per alias
//!     → ChainFactory (upstream / downstream alias order)
//!     → ChainFactory::build() per accepted connection
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::config::schema::PipelineConfig;
use crate::filtering::builtin;
use crate::filtering::chain::{FilterSlot, HttpFilter, HttpFilterChain};

/// Creates a fresh filter instance.
pub type FilterFactory = Arc<dyn Fn() -> Box<dyn HttpFilter> + Send + Sync>;

/// Turns a filter's configuration options into a factory.
pub type FilterBuilder =
    Arc<dyn Fn(&toml::Table) -> Result<FilterFactory, RegistryError> + Send + Sync>;

/// Creates a fresh chain for each accepted connection.
pub type ChainConstructor = Arc<dyn Fn() -> HttpFilterChain + Send + Sync>;

/// Errors resolving configured filters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("unknown filter kind `{0}`")]
    UnknownKind(String),
    #[error("invalid options for filter kind `{kind}`: {message}")]
    InvalidOptions { kind: String, message: String },
    #[error("pipeline references undefined filter alias `{0}`")]
    UnknownAlias(String),
}

/// Maps filter kind names to builders.
#[derive(Clone, Default)]
pub struct FilterRegistry {
    builders: HashMap<String, FilterBuilder>,
}

impl FilterRegistry {
    /// A registry with no kinds.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in filter kind.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    /// Register (or replace) a kind.
    pub fn register<F>(&mut self, kind: impl Into<String>, builder: F)
    where
        F: Fn(&toml::Table) -> Result<FilterFactory, RegistryError> + Send + Sync + 'static,
    {
        self.builders.insert(kind.into(), Arc::new(builder));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.builders.contains_key(kind)
    }

    /// Registered kind names, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<_> = self.builders.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn resolve(&self, kind: &str, options: &toml::Table) -> Result<FilterFactory, RegistryError> {
        let builder = self
            .builders
            .get(kind)
            .ok_or_else(|| RegistryError::UnknownKind(kind.to_string()))?;
        builder(options)
    }
}

impl std::fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Deserialize a kind's options table into its typed options.
pub fn parse_options<T>(kind: &str, options: &toml::Table) -> Result<T, RegistryError>
where
    T: serde::de::DeserializeOwned,
{
    toml::Value::Table(options.clone())
        .try_into()
        .map_err(|e: toml::de::Error| RegistryError::InvalidOptions {
            kind: kind.to_string(),
            message: e.message().to_string(),
        })
}

/// Resolved pipeline: which filter factories run in which stage.
#[derive(Clone, Default)]
pub struct ChainFactory {
    upstream: Vec<(String, FilterFactory)>,
    downstream: Vec<(String, FilterFactory)>,
    use_singletons: bool,
}

impl ChainFactory {
    /// Factory producing empty chains.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Resolve every alias referenced by the pipeline.
    pub fn from_pipeline(pipeline: &PipelineConfig, registry: &FilterRegistry) -> Result<Self, RegistryError> {
        let mut resolved: HashMap<&str, FilterFactory> = HashMap::new();
        for (alias, filter) in &pipeline.filters {
            resolved.insert(alias.as_str(), registry.resolve(&filter.kind, &filter.options)?);
        }

        let stage = |aliases: &[String]| -> Result<Vec<(String, FilterFactory)>, RegistryError> {
            aliases
                .iter()
                .map(|alias| {
                    resolved
                        .get(alias.as_str())
                        .map(|factory| (alias.clone(), Arc::clone(factory)))
                        .ok_or_else(|| RegistryError::UnknownAlias(alias.clone()))
                })
                .collect()
        };

        Ok(Self {
            upstream: stage(&pipeline.upstream)?,
            downstream: stage(&pipeline.downstream)?,
            use_singletons: pipeline.use_singletons,
        })
    }

    /// Build a chain with fresh filter instances.
    ///
    /// With `use_singletons`, an alias listed in both stages shares one
    /// instance across the request and the response.
    pub fn build(&self) -> HttpFilterChain {
        let mut chain = HttpFilterChain::new();
        let mut slots: HashMap<&str, FilterSlot> = HashMap::new();

        for (alias, factory) in &self.upstream {
            match slots.get(alias.as_str()).copied() {
                Some(slot) if self.use_singletons => chain.reuse_upstream(slot),
                _ => {
                    let slot = chain.add_upstream_filter(factory());
                    slots.insert(alias.as_str(), slot);
                }
            }
        }

        for (alias, factory) in &self.downstream {
            match slots.get(alias.as_str()).copied() {
                Some(slot) if self.use_singletons => chain.reuse_downstream(slot),
                _ => {
                    let slot = chain.add_downstream_filter(factory());
                    slots.insert(alias.as_str(), slot);
                }
            }
        }

        chain
    }

    /// Wrap as the constructor handed to the server.
    pub fn into_constructor(self) -> ChainConstructor {
        Arc::new(move || self.build())
    }

    pub fn upstream_aliases(&self) -> impl Iterator<Item = &str> {
        self.upstream.iter().map(|(alias, _)| alias.as_str())
    }

    pub fn downstream_aliases(&self) -> impl Iterator<Item = &str> {
        self.downstream.iter().map(|(alias, _)| alias.as_str())
    }
}
