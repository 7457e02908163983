//! Stream Connections
//!
//! One reconnecting SSE connection per logical stream:
//! - `options`: retry and timeout policy
//! - `state`: the connection state machine
//! - `error`: errors surfaced on the event channel
//! - `stream`: `StreamConnection` itself

pub mod error;
pub mod options;
pub mod state;
pub mod stream;

pub use error::StreamError;
pub use options::StreamOptions;
pub use state::ConnectionState;
pub use stream::{
    ConnectionId, ListenerId, StreamConnection, StreamEvent, StreamEvents, StreamStats,
};
