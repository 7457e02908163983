//! Transport Traits
//!
//! The seam between a `StreamConnection` and whatever actually produces SSE
//! frames. A transport only knows how to open one session; retry, backoff and
//! the connection state machine live above it.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use super::sse::SseFrame;

/// Item delivered on a session's frame channel
pub type FrameResult = Result<SseFrame, TransportError>;

/// Receiving half of an open transport session
///
/// The channel closing without an error means the server ended the stream.
pub type FrameReceiver = mpsc::Receiver<FrameResult>;

/// Errors raised by a transport
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The session could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The server answered with a non-success status
    #[error("Server responded with HTTP {status}")]
    HttpStatus {
        /// HTTP status code
        status: u16,
    },

    /// The server closed the stream
    #[error("Stream ended by server")]
    StreamEnded,

    /// Reading the stream body failed
    #[error("Stream read failed: {0}")]
    Io(String),

    /// The target URL could not be used
    #[error("Invalid stream URL: {0}")]
    InvalidUrl(String),
}

/// Parameters for opening one transport session
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OpenRequest {
    /// Absolute URL of the event stream
    pub url: String,
    /// Whether credentials (bearer token, cookies) should accompany the request
    pub with_credentials: bool,
    /// Last event id delivered on a previous session, sent as `Last-Event-ID`
    pub last_event_id: Option<String>,
}

/// A source of SSE sessions
///
/// `open` resolves once the server has confirmed the stream (the "open"
/// event); frames then arrive on the returned channel. Implementations must
/// not retry on their own.
#[async_trait]
pub trait SseTransport: Send + Sync {
    /// Human-readable transport name for logs
    fn name(&self) -> &'static str;

    /// Open a new session
    async fn open(&self, request: &OpenRequest) -> Result<FrameReceiver, TransportError>;
}
