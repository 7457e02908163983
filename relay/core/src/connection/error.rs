//! Stream Errors
//!
//! Everything a consumer can see go wrong on a connection. These travel on
//! the event channel; none of them is ever raised from `connect`,
//! `disconnect` or `close`.

use std::time::Duration;

use thiserror::Error;

use crate::transport::TransportError;

/// Errors reported on a stream's event channel
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    /// The transport failed to open or dropped the session
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// No open confirmation within the connect timeout
    #[error("No open confirmation within {timeout:?}")]
    ConnectTimeout {
        /// The configured timeout
        timeout: Duration,
    },

    /// A frame's data was not valid JSON (non-fatal)
    #[error("Failed to parse event data: {reason}")]
    Parse {
        /// The raw frame data, for diagnostics
        raw: String,
        /// Parser message
        reason: String,
    },

    /// The reconnect budget is spent; the connection is now disconnected
    #[error("Gave up reconnecting after {attempts} attempts")]
    RetriesExhausted {
        /// Attempts made
        attempts: u32,
    },

    /// The run stream reported an application-level error (terminal)
    #[error("Run failed: {message}")]
    Run {
        /// Message sent by the server
        message: String,
    },
}

impl StreamError {
    /// Check if this error is a per-message parse failure
    #[must_use]
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }

    /// Check if this error will be followed by a reconnect attempt
    /// (given a remaining budget)
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::ConnectTimeout { .. })
    }
}
