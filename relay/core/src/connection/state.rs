//! Connection State Machine
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──open──▶ Connected
//!      ▲                          │                    │
//!      │                        error                error
//!      │                          ▼                    │
//!      └──── budget spent ──── Error ◀─────────────────┘
//!                                 │
//!                                 └── backoff timer ──▶ Connecting
//!
//! close() or run completion, from any state ──▶ Closed (terminal)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a `StreamConnection`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No transport; the initial state, and the state after giving up on retries
    #[default]
    Disconnected,
    /// Transport requested, not yet confirmed
    Connecting,
    /// Transport confirmed open
    Connected,
    /// Transport reported a failure
    Error,
    /// Permanently closed; no further transitions
    Closed,
}

impl ConnectionState {
    /// Check if this is the terminal state
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Closed
    }

    /// Lowercase name, as used on the wire and in logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
