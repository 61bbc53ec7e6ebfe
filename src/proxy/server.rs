//! Accept loop: one backend connection and one filter chain per client.
//!
//! # Responsibilities
//! - Accept client connections through the bounded `Listener`
//! - Open the backend connection (with timeout) for each client
//! - Answer the client with the error template when the backend is unreachable
//! - Swap in new runtime state when the configuration changes
//! - Drain live connections on shutdown
//!
//! # Design Decisions
//! - Runtime state lives in an `ArcSwap`; each connection takes a snapshot
//!   when accepted and keeps it for its whole life
//! - Connection failures are logged and contained in their task

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::config::schema::ProxyConfig;
use crate::filtering::registry::{ChainConstructor, ChainFactory, FilterRegistry, RegistryError};
use crate::http::message::HttpResponse;
use crate::http::wire;
use crate::lifecycle::Shutdown;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::observability::metrics;
use crate::proxy::connection::{ConnectionSettings, ProxyConnection};
use crate::resilience::timeouts::{connect_with_timeout, Timeouts};

/// How long shutdown waits for live connections.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// How long an error response waits for the client to finish sending.
const LINGER_TIMEOUT: Duration = Duration::from_millis(500);

/// Errors building runtime state from configuration.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("routing.upstream_hosts has no usable host")]
    NoTarget,
    #[error(transparent)]
    Pipeline(#[from] RegistryError),
}

/// Everything a new connection needs, swapped as a unit on reload.
pub struct RuntimeState {
    pub settings: ConnectionSettings,
    pub chains: ChainConstructor,
}

impl RuntimeState {
    pub fn from_config(config: &ProxyConfig, registry: &FilterRegistry) -> Result<Self, ServerError> {
        let target = config.routing.target().ok_or(ServerError::NoTarget)?;
        if config.routing.upstream_hosts.len() > 1 {
            tracing::warn!(
                downstream = %target,
                ignored = config.routing.upstream_hosts.len() - 1,
                "Only the first upstream host is used"
            );
        }

        let chains = ChainFactory::from_pipeline(&config.pipeline, registry)?;
        tracing::info!(
            downstream = %target,
            upstream_filters = ?chains.upstream_aliases().collect::<Vec<_>>(),
            downstream_filters = ?chains.downstream_aliases().collect::<Vec<_>>(),
            use_singletons = config.pipeline.use_singletons,
            "Filter pipeline resolved"
        );

        Ok(Self {
            settings: ConnectionSettings {
                downstream_host: target.to_string(),
                timeouts: Timeouts::from(&config.timeouts),
                error_status: config.templates.error_status,
                rejection_status: config.templates.rejection_status,
                close_on_parse_error: config.policy.close_on_parse_error,
                forward_body_after_reject: config.policy.forward_body_after_reject,
                max_head_bytes: config.limits.max_head_bytes,
            },
            chains: chains.into_constructor(),
        })
    }
}

/// The listener component of the proxy.
pub struct ProxyServer {
    state: ArcSwap<RuntimeState>,
    registry: FilterRegistry,
    tracker: ConnectionTracker,
}

impl ProxyServer {
    /// Build from configuration using the built-in filter kinds.
    pub fn new(config: &ProxyConfig) -> Result<Self, ServerError> {
        Self::with_registry(config, FilterRegistry::with_builtins())
    }

    /// Build from configuration, resolving filters through `registry`.
    pub fn with_registry(config: &ProxyConfig, registry: FilterRegistry) -> Result<Self, ServerError> {
        let state = RuntimeState::from_config(config, &registry)?;
        Ok(Self {
            state: ArcSwap::from_pointee(state),
            registry,
            tracker: ConnectionTracker::new(),
        })
    }

    /// Build from an explicit chain constructor, bypassing configuration.
    pub fn from_parts(settings: ConnectionSettings, chains: ChainConstructor) -> Self {
        Self {
            state: ArcSwap::from_pointee(RuntimeState { settings, chains }),
            registry: FilterRegistry::with_builtins(),
            tracker: ConnectionTracker::new(),
        }
    }

    /// Replace the runtime state. Live connections keep their snapshot.
    pub fn reload(&self, config: &ProxyConfig) -> Result<(), ServerError> {
        let state = RuntimeState::from_config(config, &self.registry)?;
        self.state.store(Arc::new(state));
        tracing::info!("Configuration reloaded");
        Ok(())
    }

    /// Current `host:port` target.
    pub fn downstream_host(&self) -> String {
        self.state.load().settings.downstream_host.clone()
    }

    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Accept until `shutdown` fires, then wait for live connections.
    pub async fn run(
        self,
        listener: Listener,
        mut config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        shutdown: Shutdown,
    ) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(
            address = %addr,
            downstream = %self.downstream_host(),
            "Proxy server starting"
        );

        let mut updates_open = true;

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr, permit)) => self.spawn_connection(stream, peer_addr, permit, &shutdown),
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                update = config_updates.recv(), if updates_open => match update {
                    Some(config) => {
                        if let Err(e) = self.reload(&config) {
                            tracing::error!(error = %e, "Rejected configuration update");
                        }
                    }
                    None => updates_open = false,
                },
                _ = shutdown.wait() => break,
            }
        }

        tracing::info!(
            active_connections = self.tracker.active_count(),
            "Stopped accepting, draining connections"
        );
        if !self.tracker.wait_idle(DRAIN_TIMEOUT).await {
            tracing::warn!(
                active_connections = self.tracker.active_count(),
                "Drain timeout elapsed with live connections"
            );
        }

        tracing::info!("Proxy server stopped");
        Ok(())
    }

    fn spawn_connection(
        &self,
        client: TcpStream,
        peer_addr: SocketAddr,
        permit: ConnectionPermit,
        shutdown: &Shutdown,
    ) {
        let state = self.state.load_full();
        let guard = self.tracker.track(peer_addr);
        let shutdown = shutdown.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let id = guard.id();
            let settings = &state.settings;
            let _ = client.set_nodelay(true);

            let backend = match connect_with_timeout(&settings.downstream_host, settings.timeouts.connect).await {
                Ok(backend) => backend,
                Err(e) => {
                    metrics::record_backend_failure();
                    tracing::warn!(
                        connection_id = %id,
                        peer_addr = %peer_addr,
                        error = %e,
                        "Backend connect failed"
                    );
                    send_error(client, settings.error_status).await;
                    return;
                }
            };
            let _ = backend.set_nodelay(true);

            tracing::debug!(
                connection_id = %id,
                peer_addr = %peer_addr,
                downstream = %settings.downstream_host,
                "Connection established"
            );

            let chain = (state.chains)();
            let connection = ProxyConnection::new(id, client, backend, chain, settings.clone());
            match connection.run(shutdown).await {
                Ok(reason) => tracing::debug!(connection_id = %id, reason = ?reason, "Connection closed"),
                Err(e) => tracing::debug!(connection_id = %id, error = %e, "Connection aborted"),
            }
            drop(guard);
        });
    }
}

/// Write the error template (`Content-Length: 0`) and close.
///
/// Unread request bytes are drained for a moment after the FIN so the
/// close does not turn into a reset that discards the response.
async fn send_error(mut client: TcpStream, status: u16) {
    let mut head = Vec::new();
    wire::write_response_head(&mut head, &HttpResponse::empty(status));
    if client.write_all(&head).await.is_err() {
        return;
    }
    let _ = client.shutdown().await;

    let mut sink = [0u8; 1024];
    let _ = tokio::time::timeout(LINGER_TIMEOUT, async {
        while let Ok(n) = client.read(&mut sink).await {
            if n == 0 {
                break;
            }
        }
    })
    .await;
}
