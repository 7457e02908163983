//! Relay Core - Reconnecting Event Streams for the Agent Platform Console
//!
//! This crate holds the real-time part of the admin console: Server-Sent
//! Event connections that survive network loss, a decoder for agent run
//! streams, and a bounded registry that owns every live stream.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      ConnectionRegistry                        │
//! │        id → StreamConnection, ceiling, replace-on-reuse        │
//! └───────────────┬───────────────────────────────┬───────────────┘
//!                 │                               │
//!        ┌────────▼────────┐             ┌────────▼────────┐
//!        │    RunStream    │             │StreamConnection │
//!        │ status / event /│             │  Envelope per   │
//!        │ complete / error│             │     frame       │
//!        └────────┬────────┘             └────────┬────────┘
//!                 └───────────────┬───────────────┘
//!                        ┌────────▼────────┐
//!                        │  SseTransport   │
//!                        │ HTTP/in-process │
//!                        └─────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`StreamConnection`]: one reconnecting SSE connection and its state machine
//! - [`RunStream`]: a connection that decodes the agent run protocol
//! - [`ConnectionRegistry`]: bounded owner of named connections
//! - [`SseTransport`]: the seam to the network (or to an in-process server)
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use relay_core::{ConnectionRegistry, HttpSseTransport, RegistryConfig, RunStreamEvent};
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = ConnectionRegistry::new(
//!         RegistryConfig::from_env(),
//!         Arc::new(HttpSseTransport::from_env()),
//!     );
//!
//!     let (_stream, mut events) = registry.create_run_stream("run-42", None).unwrap();
//!     while let Some(event) = events.recv().await {
//!         if let RunStreamEvent::Complete(run) = event {
//!             println!("finished: {:?}", run);
//!         }
//!     }
//! }
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod connection;
pub mod envelope;
pub mod registry;
pub mod run_stream;
pub mod transport;

// Re-exports for convenience
pub use config::{load_config, load_config_from_path, ConfigError, ConfigSource, RelayConfig};
pub use connection::{
    ConnectionId, ConnectionState, ListenerId, StreamConnection, StreamError, StreamEvent,
    StreamEvents, StreamOptions, StreamStats,
};
pub use envelope::{Envelope, RunEvent, RunSnapshot, RunStreamEnvelope};
pub use registry::{
    init_shared, shared, ConnectionRegistry, RegistryConfig, RegistryError, RegistrySummary,
};
pub use run_stream::{run_stream_url, RunStream, RunStreamEvent, RunStreamEvents};
pub use transport::{
    HttpSseTransport, InProcessTransport, OpenRequest, OpenRequests, PendingOpen,
    SessionController, SseFrame, SseTransport, TransportError,
};
