//! Wire Envelopes
//!
//! `Envelope` is what a `StreamConnection` makes of one frame: the SSE event
//! type, the frame's JSON data and its id. Run streams carry a second layer,
//! `RunStreamEnvelope`, inside the envelope's `data`.
//!
//! # Run Stream Protocol
//!
//! ```text
//! {"type":"status",   "run":   {...}}   zero or more
//! {"type":"event",    "event": {...}}   zero or more
//! {"type":"complete", "run":   {...}}   terminal
//! {"type":"error",    "error": "..."}   terminal
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One decoded frame
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T = Value> {
    /// SSE event type (`"message"` when the frame named none)
    #[serde(rename = "type")]
    pub event_type: String,
    /// Frame data
    pub data: T,
    /// Frame id, if the server assigned one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Snapshot of a run, passed through untouched
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunSnapshot(pub Value);

/// A sub-event emitted during a run, passed through untouched
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunEvent(pub Value);

/// Payload of a run stream frame
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RunStreamEnvelope {
    /// Progress snapshot
    Status {
        /// Current run state
        #[serde(default)]
        run: Option<RunSnapshot>,
    },
    /// Sub-event (tool call, token, step...)
    Event {
        /// The event payload
        #[serde(default)]
        event: Option<RunEvent>,
    },
    /// The run finished successfully
    Complete {
        /// Final run state
        #[serde(default)]
        run: Option<RunSnapshot>,
    },
    /// The run failed
    Error {
        /// Server-provided message
        #[serde(default)]
        error: Option<String>,
    },
    /// A type this client does not know
    #[serde(other)]
    Unknown,
}

impl RunStreamEnvelope {
    /// Check if this envelope ends the run
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}
