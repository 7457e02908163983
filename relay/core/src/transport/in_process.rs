//! In-Process Transport
//!
//! Channel-based SSE sessions for embedded use and tests. Every `open` call
//! surfaces as a `PendingOpen` on the `OpenRequests` side, which decides
//! whether the session opens, fails, or never answers at all.
//!
//! # Usage
//!
//! ```ignore
//! let (transport, mut requests) = InProcessTransport::new_pair();
//!
//! // Hand `transport` to a StreamConnection, then play the server:
//! let pending = requests.next().await.unwrap();
//! let session = pending.accept();
//! session.send_data(r#"{"type":"status","run":{}}"#).await;
//! ```

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::sse::SseFrame;
use super::traits::{FrameReceiver, FrameResult, OpenRequest, SseTransport, TransportError};

/// Default capacity of each session's frame channel
const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Client half: implements `SseTransport`
#[derive(Clone, Debug)]
pub struct InProcessTransport {
    /// Channel carrying open requests to the server half
    pending_tx: mpsc::UnboundedSender<PendingOpen>,
    /// Capacity of the frame channel for accepted sessions
    capacity: usize,
}

/// Server half: receives open requests
#[derive(Debug)]
pub struct OpenRequests {
    pending_rx: mpsc::UnboundedReceiver<PendingOpen>,
}

/// An open request awaiting a decision
#[derive(Debug)]
pub struct PendingOpen {
    request: OpenRequest,
    reply: oneshot::Sender<Result<FrameReceiver, TransportError>>,
    capacity: usize,
}

/// Server-side handle for an accepted session
#[derive(Clone, Debug)]
pub struct SessionController {
    frames: mpsc::Sender<FrameResult>,
}

impl InProcessTransport {
    /// Create a new in-process transport pair
    ///
    /// Returns:
    /// - `InProcessTransport`: give this to connections
    /// - `OpenRequests`: answer open requests here
    #[must_use]
    pub fn new_pair() -> (Self, OpenRequests) {
        Self::new_pair_with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create with custom frame channel capacity
    #[must_use]
    pub fn new_pair_with_capacity(capacity: usize) -> (Self, OpenRequests) {
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        let transport = Self {
            pending_tx,
            capacity: capacity.max(1),
        };
        (transport, OpenRequests { pending_rx })
    }
}

#[async_trait]
impl SseTransport for InProcessTransport {
    fn name(&self) -> &'static str {
        "in-process"
    }

    async fn open(&self, request: &OpenRequest) -> Result<FrameReceiver, TransportError> {
        let (reply, reply_rx) = oneshot::channel();
        let pending = PendingOpen {
            request: request.clone(),
            reply,
            capacity: self.capacity,
        };

        self.pending_tx.send(pending).map_err(|_| {
            TransportError::ConnectionFailed("In-process server dropped".to_string())
        })?;

        reply_rx.await.map_err(|_| {
            TransportError::ConnectionFailed("Open request abandoned".to_string())
        })?
    }
}

impl OpenRequests {
    /// Wait for the next open request
    ///
    /// Returns `None` once every `InProcessTransport` clone is dropped.
    pub async fn next(&mut self) -> Option<PendingOpen> {
        self.pending_rx.recv().await
    }

    /// Take an open request if one is already waiting
    pub fn try_next(&mut self) -> Option<PendingOpen> {
        self.pending_rx.try_recv().ok()
    }
}

impl PendingOpen {
    /// The request as issued by the connection
    #[must_use]
    pub fn request(&self) -> &OpenRequest {
        &self.request
    }

    /// Confirm the session and get a handle to feed it frames
    #[must_use]
    pub fn accept(self) -> SessionController {
        let (frames, rx) = mpsc::channel(self.capacity);
        let _ = self.reply.send(Ok(rx));
        SessionController { frames }
    }

    /// Fail the open with the given error
    pub fn refuse(self, error: TransportError) {
        let _ = self.reply.send(Err(error));
    }
}

impl SessionController {
    /// Deliver a frame; returns false if the client side is gone
    pub async fn send_frame(&self, frame: SseFrame) -> bool {
        self.frames.send(Ok(frame)).await.is_ok()
    }

    /// Deliver an unnamed frame with the given data
    pub async fn send_data(&self, data: impl Into<String>) -> bool {
        self.send_frame(SseFrame::data(data)).await
    }

    /// Report a transport failure and end the session
    pub async fn fail(self, error: TransportError) {
        let _ = self.frames.send(Err(error)).await;
    }

    /// End the session cleanly (server closed the stream)
    pub fn end(self) {
        drop(self);
    }
}
