//! Connection Registry - Bounded Stream Ownership
//!
//! The `ConnectionRegistry` owns every registered stream, keyed by a logical
//! id (a run id, a dashboard panel, ...). It guarantees:
//!
//! - at most one connection per id: registering an id again closes and
//!   forgets the previous connection first
//! - at most `max_connections` live entries: further requests are refused
//!   with `RegistryError::CapacityReached` before anything is created
//! - entries remove themselves when their connection closes
//!
//! # Architecture
//!
//! ```text
//!                    ConnectionRegistry
//!          ┌────────────────────────────────────────┐
//!          │ HashMap<String, StreamConnection>      │
//!          │   - wrapped in Arc<RwLock<>>           │
//!          └───────────┬─────────────────┬──────────┘
//!                      │                 │
//!              ┌───────▼──────┐   ┌──────▼───────┐
//!              │  "run-41"    │   │  "alerts"    │
//!              │  RunStream   │   │  Connection  │
//!              └──────────────┘   └──────────────┘
//! ```
//!
//! # Thread Safety
//!
//! The capacity check, replacement and insert happen under one write guard,
//! so concurrent callers can never push the map past its ceiling. The lock is
//! never held while a close hook runs.
//!
//! # Shared Instance
//!
//! Code should receive a `ConnectionRegistry` by reference. For the outermost
//! composition root there is a process-wide instance behind `shared()`,
//! optionally seeded once with `init_shared()`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use thiserror::Error;

use crate::config::RelayConfig;
use crate::connection::{
    ConnectionId, ConnectionState, StreamConnection, StreamEvents, StreamOptions,
};
use crate::run_stream::{run_stream_url, RunStream, RunStreamEvents};
use crate::transport::{HttpSseTransport, SseTransport};

/// Default ceiling on registered connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// Default base URL for run streams
pub const DEFAULT_RUN_STREAM_BASE_URL: &str = "http://localhost:8080/api/stream";

/// Errors returned by the registry
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The registry is full; close something first
    #[error("Maximum connections reached ({max})")]
    CapacityReached {
        /// The configured ceiling
        max: usize,
    },
}

/// Registry configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Ceiling on registered connections
    pub max_connections: usize,
    /// Base URL; run streams live at `{base}/runs/{run_id}`
    pub run_stream_base_url: String,
    /// Options for connections created without explicit options
    pub default_options: StreamOptions,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            run_stream_base_url: DEFAULT_RUN_STREAM_BASE_URL.to_string(),
            default_options: StreamOptions::default(),
        }
    }
}

impl RegistryConfig {
    /// Create with a custom ceiling
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Create with a custom run stream base URL
    #[must_use]
    pub fn with_run_stream_base_url(mut self, base: impl Into<String>) -> Self {
        self.run_stream_base_url = base.into();
        self
    }

    /// Create with custom default options
    #[must_use]
    pub fn with_default_options(mut self, options: StreamOptions) -> Self {
        self.default_options = options;
        self
    }

    /// Load from environment variables (see `RelayConfig::from_env`)
    #[must_use]
    pub fn from_env() -> Self {
        RelayConfig::from_env().registry
    }
}

/// Point-in-time view of the registry
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistrySummary {
    /// Registered connections
    pub total: usize,
    /// Configured ceiling
    pub max_connections: usize,
    /// Connections in `Connected`
    pub connected: usize,
    /// Connections in `Connecting`
    pub connecting: usize,
    /// Connections in `Error` (usually waiting to reconnect)
    pub errored: usize,
    /// Connections in `Disconnected` (gave up or not yet started)
    pub disconnected: usize,
}

impl fmt::Display for RegistrySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} streams ({} connected, {} connecting, {} error, {} disconnected)",
            self.total,
            self.max_connections,
            self.connected,
            self.connecting,
            self.errored,
            self.disconnected
        )
    }
}

struct RegistryInner {
    config: RegistryConfig,
    transport: Arc<dyn SseTransport>,
    entries: RwLock<HashMap<String, StreamConnection>>,
}

/// Bounded, id-keyed owner of stream connections
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new(config: RegistryConfig, transport: Arc<dyn SseTransport>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                transport,
                entries: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Registry configuration
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Create, register and connect a stream under `id`
    ///
    /// An existing connection under `id` is closed and replaced. `None`
    /// options fall back to the registry defaults.
    ///
    /// # Errors
    ///
    /// `RegistryError::CapacityReached` when the registry is full. Nothing is
    /// created or closed in that case.
    pub fn create_connection(
        &self,
        id: impl Into<String>,
        url: impl Into<String>,
        options: Option<StreamOptions>,
    ) -> Result<(StreamConnection, StreamEvents), RegistryError> {
        let id = id.into();
        let options = options.unwrap_or_else(|| self.inner.config.default_options.clone());
        let transport = Arc::clone(&self.inner.transport);
        let url = url.into();

        let (connection, events) =
            self.admit(&id, move || StreamConnection::new(url, options, transport))?;
        connection.connect();
        Ok((connection, events))
    }

    /// Create, register and connect the stream for one run
    ///
    /// Keyed by `run_id`, addressed at `{run_stream_base_url}/runs/{run_id}`.
    ///
    /// # Errors
    ///
    /// `RegistryError::CapacityReached` when the registry is full.
    pub fn create_run_stream(
        &self,
        run_id: impl Into<String>,
        options: Option<StreamOptions>,
    ) -> Result<(RunStream, RunStreamEvents), RegistryError> {
        let run_id = run_id.into();
        let options = options.unwrap_or_else(|| self.inner.config.default_options.clone());
        let transport = Arc::clone(&self.inner.transport);
        let url = run_stream_url(&self.inner.config.run_stream_base_url, &run_id);

        let (connection, events) =
            self.admit(&run_id, move || StreamConnection::new(url, options, transport))?;
        let (stream, run_events) = RunStream::wrap(run_id, connection, events);
        stream.connect();
        Ok((stream, run_events))
    }

    /// Look up the connection registered under `id`
    #[must_use]
    pub fn get_connection(&self, id: &str) -> Option<StreamConnection> {
        self.inner.entries.read().get(id).cloned()
    }

    /// Close and remove the connection under `id`
    ///
    /// Returns true if there was one.
    pub fn close_connection(&self, id: &str) -> bool {
        let removed = self.inner.entries.write().remove(id);
        match removed {
            Some(connection) => {
                connection.clear_close_hooks();
                connection.close();
                tracing::info!(stream_id = %id, "Connection removed");
                true
            }
            None => false,
        }
    }

    /// Close every connection and empty the registry
    ///
    /// Meant for process shutdown.
    pub fn close_all(&self) {
        let drained: Vec<(String, StreamConnection)> =
            self.inner.entries.write().drain().collect();
        let count = drained.len();

        for (_, connection) in drained {
            connection.clear_close_hooks();
            connection.close();
        }

        tracing::info!(count, "All connections closed");
    }

    /// Number of registered connections
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.entries.read().len()
    }

    /// Registered ids, sorted
    #[must_use]
    pub fn connection_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.entries.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Per-state counts of registered connections
    #[must_use]
    pub fn summary(&self) -> RegistrySummary {
        let entries = self.inner.entries.read();
        let mut summary = RegistrySummary {
            total: entries.len(),
            max_connections: self.inner.config.max_connections,
            ..RegistrySummary::default()
        };

        for connection in entries.values() {
            match connection.state() {
                ConnectionState::Connected => summary.connected += 1,
                ConnectionState::Connecting => summary.connecting += 1,
                ConnectionState::Error => summary.errored += 1,
                ConnectionState::Disconnected => summary.disconnected += 1,
                ConnectionState::Closed => {}
            }
        }
        summary
    }

    /// Capacity check, replacement and insert under one write guard
    fn admit(
        &self,
        id: &str,
        build: impl FnOnce() -> (StreamConnection, StreamEvents),
    ) -> Result<(StreamConnection, StreamEvents), RegistryError> {
        let mut entries = self.inner.entries.write();

        let max = self.inner.config.max_connections;
        if entries.len() >= max {
            tracing::warn!(
                stream_id = %id,
                max_connections = max,
                "Maximum connections reached, refusing stream"
            );
            return Err(RegistryError::CapacityReached { max });
        }

        if let Some(previous) = entries.remove(id) {
            tracing::info!(
                stream_id = %id,
                connection_id = %previous.id(),
                "Replacing existing connection"
            );
            previous.clear_close_hooks();
            previous.close();
        }

        let (connection, events) = build();
        let registry = Arc::downgrade(&self.inner);
        let key = id.to_string();
        let instance = connection.id();
        connection.add_close_hook(move || Self::remove_instance(&registry, &key, instance));

        entries.insert(id.to_string(), connection.clone());

        tracing::info!(
            stream_id = %id,
            connection_id = %instance,
            url = %connection.url(),
            total = entries.len(),
            "Connection registered"
        );

        Ok((connection, events))
    }

    /// Forget `key` if it still maps to `instance`
    fn remove_instance(registry: &Weak<RegistryInner>, key: &str, instance: ConnectionId) {
        let Some(inner) = registry.upgrade() else {
            return;
        };
        let mut entries = inner.entries.write();
        if entries.get(key).is_some_and(|c| c.id() == instance) {
            entries.remove(key);
            tracing::debug!(stream_id = %key, "Closed connection unregistered");
        }
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("max_connections", &self.inner.config.max_connections)
            .field("transport", &self.inner.transport.name())
            .field("connections", &self.connection_count())
            .finish()
    }
}

// =============================================================================
// Process-wide instance
// =============================================================================

static SHARED: OnceCell<ConnectionRegistry> = OnceCell::new();

/// The process-wide registry
///
/// Built on first use from environment variables with an HTTP transport,
/// unless `init_shared` seeded it earlier. Lives until process exit.
pub fn shared() -> &'static ConnectionRegistry {
    SHARED.get_or_init(|| {
        let config = RelayConfig::from_env();
        tracing::debug!(
            max_connections = config.registry.max_connections,
            "Creating shared connection registry"
        );
        let transport = HttpSseTransport::new().with_bearer_token(config.bearer_token.clone());
        ConnectionRegistry::new(config.registry, Arc::new(transport))
    })
}

/// Seed the process-wide registry
///
/// # Errors
///
/// Gives the registry back if the shared instance already exists; there is
/// no re-initialization.
pub fn init_shared(
    registry: ConnectionRegistry,
) -> Result<&'static ConnectionRegistry, ConnectionRegistry> {
    SHARED.set(registry)?;
    Ok(shared())
}
