//! Transport Layer for Event Streams
//!
//! Provides the mechanisms that actually deliver SSE frames:
//! - `HttpSseTransport`: `text/event-stream` over HTTP via reqwest
//! - `InProcessTransport`: channel-backed sessions for embedding and tests
//!
//! # Design Philosophy
//!
//! A transport opens exactly one session per call and reports failure by
//! returning an error or ending its frame channel. Reconnection policy,
//! timeouts and state tracking belong to `StreamConnection`, so every
//! transport gets identical recovery behaviour.

pub mod http;
pub mod in_process;
pub mod sse;
pub mod traits;

// Re-exports for convenience
pub use http::HttpSseTransport;
pub use in_process::{InProcessTransport, OpenRequests, PendingOpen, SessionController};
pub use sse::{decode_frames, SseFrame, DEFAULT_EVENT_TYPE, MAX_FRAME_BYTES};
pub use traits::{FrameReceiver, FrameResult, OpenRequest, SseTransport, TransportError};
