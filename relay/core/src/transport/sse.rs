//! Server-Sent Events Framing
//!
//! `text/event-stream` parsing is done by `eventsource-stream`; this module
//! maps its events onto `SseFrame` and bounds how much a frame that never
//! terminates may buffer.
//!
//! # Frame Format
//!
//! ```text
//! : comment lines start with a colon and are ignored
//! event: status
//! id: 42
//! data: {"type":"status","run":{...}}
//! data: continuation lines are joined with '\n'
//! <blank line dispatches the frame>
//! ```
//!
//! A frame without any `data` line is discarded, but its `id` still becomes
//! the last event id. `retry:` hints are ignored: reconnect timing belongs to
//! `StreamOptions`.

use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};

use super::traits::{FrameResult, TransportError};

/// Maximum number of bytes buffered without a frame boundary (1 MiB)
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Event type used when a frame carries no `event:` field
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// A single decoded SSE frame
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseFrame {
    /// Value of the `event:` field, if present
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`
    pub data: String,
    /// Last event id in effect when this frame was dispatched
    pub id: Option<String>,
}

impl SseFrame {
    /// Create a frame carrying only data
    #[must_use]
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    /// Set the event type
    #[must_use]
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Set the event id
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// The effective event type (`"message"` when no `event:` field was sent)
    #[must_use]
    pub fn event_type(&self) -> &str {
        self.event.as_deref().unwrap_or(DEFAULT_EVENT_TYPE)
    }
}

impl From<Event> for SseFrame {
    fn from(event: Event) -> Self {
        Self {
            event: Some(event.event).filter(|e| !e.is_empty() && e != DEFAULT_EVENT_TYPE),
            data: event.data,
            id: Some(event.id).filter(|id| !id.is_empty()),
        }
    }
}

/// Check if a chunk contains a blank line (a frame boundary)
fn has_frame_boundary(chunk: &[u8]) -> bool {
    chunk.windows(2).any(|w| w == b"\n\n" || w == b"\r\r")
        || chunk.windows(4).any(|w| w == b"\r\n\r\n")
}

/// Decode a `text/event-stream` body into frames
///
/// Yields `TransportError::Io` when the body fails, when it is not valid
/// SSE, or when more than `MAX_FRAME_BYTES` arrive without a frame boundary.
/// The guard is approximate to one chunk.
pub fn decode_frames<S, B, E>(body: S) -> BoxStream<'static, FrameResult>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let mut pending = 0usize;

    body.map(move |chunk| -> Result<B, TransportError> {
        let chunk = chunk.map_err(|e| TransportError::Io(e.to_string()))?;
        let bytes = chunk.as_ref();

        pending = if has_frame_boundary(bytes) {
            bytes.len()
        } else {
            pending + bytes.len()
        };
        if pending > MAX_FRAME_BYTES {
            return Err(TransportError::Io(format!(
                "SSE frame exceeds {MAX_FRAME_BYTES} bytes without a boundary"
            )));
        }
        Ok(chunk)
    })
    .eventsource()
    .map(|item| match item {
        Ok(event) => Ok(SseFrame::from(event)),
        Err(EventStreamError::Transport(e)) => Err(e),
        Err(e) => Err(TransportError::Io(e.to_string())),
    })
    .boxed()
}
