//! Run Streams
//!
//! A `RunStream` is a `StreamConnection` pointed at one agent run's event
//! endpoint, with the run protocol decoded into typed events. `complete` and
//! `error` envelopes are terminal: the connection closes on the session task
//! as soon as one is delivered, so neither a following end of stream nor a
//! reconnect can be observed. Only the closing state changes follow.

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::mpsc;

use crate::connection::{
    ConnectionState, StreamConnection, StreamError, StreamEvent, StreamEvents, StreamOptions,
};
use crate::envelope::{Envelope, RunEvent, RunSnapshot, RunStreamEnvelope};
use crate::transport::SseTransport;

/// Message used when an `error` envelope carries none
pub const DEFAULT_RUN_ERROR: &str = "Run stream error";

/// Build the stream URL for a run: `{base}/runs/{run_id}`
///
/// The run id is used verbatim and must already be URL-safe.
#[must_use]
pub fn run_stream_url(base: &str, run_id: &str) -> String {
    format!("{}/runs/{}", base.trim_end_matches('/'), run_id)
}

/// Typed outcome of a run stream
#[derive(Clone, Debug, PartialEq)]
pub enum RunStreamEvent {
    /// The underlying connection opened
    Opened,
    /// Progress snapshot
    Status(RunSnapshot),
    /// Run sub-event
    Event(RunEvent),
    /// Final snapshot; the stream closes next
    Complete(RunSnapshot),
    /// Transport, parse or run failure. `StreamError::Run` is terminal.
    Error(StreamError),
    /// The underlying connection changed state
    StateChanged(ConnectionState),
    /// The stream is closed; nothing follows
    Closed,
}

/// Receiving side of a run stream's events
#[derive(Debug)]
pub struct RunStreamEvents {
    rx: mpsc::UnboundedReceiver<RunStreamEvent>,
}

impl RunStreamEvents {
    /// Wait for the next event
    ///
    /// Returns `None` once the stream is closed and drained.
    pub async fn recv(&mut self) -> Option<RunStreamEvent> {
        self.rx.recv().await
    }

    /// Take an event if one is already queued
    pub fn try_recv(&mut self) -> Option<RunStreamEvent> {
        self.rx.try_recv().ok()
    }
}

/// Event stream for a single agent run
#[derive(Clone, Debug)]
pub struct RunStream {
    run_id: String,
    connection: StreamConnection,
}

impl RunStream {
    /// Create a run stream against `{endpoint}/runs/{run_id}`
    ///
    /// Like `StreamConnection::new`, nothing is opened until `connect()`.
    /// Must be called within a tokio runtime (the decoder is a spawned task).
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        endpoint: &str,
        options: StreamOptions,
        transport: Arc<dyn SseTransport>,
    ) -> (Self, RunStreamEvents) {
        let run_id = run_id.into();
        let (connection, events) =
            StreamConnection::new(run_stream_url(endpoint, &run_id), options, transport);
        Self::wrap(run_id, connection, events)
    }

    /// Attach the run decoder to an existing connection
    pub(crate) fn wrap(
        run_id: String,
        connection: StreamConnection,
        events: StreamEvents,
    ) -> (Self, RunStreamEvents) {
        let (tx, rx) = mpsc::unbounded_channel();

        connection.close_after(|envelope| {
            RunStreamEnvelope::deserialize(&envelope.data).is_ok_and(|run| run.is_terminal())
        });

        let decoder = RunDecoder {
            run_id: run_id.clone(),
            connection: connection.clone(),
            tx,
            finished: false,
        };
        tokio::spawn(decoder.run(events));

        (Self { run_id, connection }, RunStreamEvents { rx })
    }

    /// The run this stream follows
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// The underlying connection
    #[must_use]
    pub fn connection(&self) -> &StreamConnection {
        &self.connection
    }

    /// Start streaming (see `StreamConnection::connect`)
    pub fn connect(&self) {
        self.connection.connect();
    }

    /// Close the stream for good
    pub fn close(&self) {
        self.connection.close();
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }
}

struct RunDecoder {
    run_id: String,
    connection: StreamConnection,
    tx: mpsc::UnboundedSender<RunStreamEvent>,
    /// Set once a terminal envelope has been dispatched
    finished: bool,
}

impl RunDecoder {
    async fn run(mut self, mut events: StreamEvents) {
        while let Some(event) = events.recv().await {
            match event {
                StreamEvent::StateChanged(state)
                    if !self.finished
                        || matches!(
                            state,
                            ConnectionState::Disconnected | ConnectionState::Closed
                        ) =>
                {
                    self.send(RunStreamEvent::StateChanged(state));
                }
                // Only closing transitions follow a terminal envelope
                StreamEvent::StateChanged(_) => {}
                StreamEvent::Closed => {
                    self.send(RunStreamEvent::Closed);
                    break;
                }
                _ if self.finished => {}
                StreamEvent::Opened => self.send(RunStreamEvent::Opened),
                StreamEvent::Error(err) => self.send(RunStreamEvent::Error(err)),
                StreamEvent::Message(envelope) => self.dispatch(envelope),
            }
        }
        tracing::debug!(run_id = %self.run_id, "Run decoder finished");
    }

    fn dispatch(&mut self, envelope: Envelope) {
        let raw = envelope.data.to_string();
        let decoded = match serde_json::from_value::<RunStreamEnvelope>(envelope.data) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(run_id = %self.run_id, error = %e, "Malformed run envelope");
                self.send(RunStreamEvent::Error(StreamError::Parse {
                    raw,
                    reason: e.to_string(),
                }));
                return;
            }
        };

        match decoded {
            RunStreamEnvelope::Status { run } => {
                if let Some(run) = run {
                    self.send(RunStreamEvent::Status(run));
                }
            }
            RunStreamEnvelope::Event { event } => {
                if let Some(event) = event {
                    self.send(RunStreamEvent::Event(event));
                }
            }
            RunStreamEnvelope::Complete { run } => {
                tracing::info!(run_id = %self.run_id, "Run completed");
                if let Some(run) = run {
                    self.send(RunStreamEvent::Complete(run));
                }
                self.finish();
            }
            RunStreamEnvelope::Error { error } => {
                let message = error.unwrap_or_else(|| DEFAULT_RUN_ERROR.to_string());
                tracing::warn!(run_id = %self.run_id, error = %message, "Run failed");
                self.send(RunStreamEvent::Error(StreamError::Run { message }));
                self.finish();
            }
            RunStreamEnvelope::Unknown => {
                tracing::debug!(run_id = %self.run_id, raw = %raw, "Ignoring unknown run envelope");
            }
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.connection.close();
    }

    fn send(&self, event: RunStreamEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{InProcessTransport, OpenRequests, SessionController};
    use serde_json::json;

    async fn open_run(run_id: &str) -> (RunStream, RunStreamEvents, SessionController, OpenRequests) {
        let (transport, mut requests) = InProcessTransport::new_pair();
        let (stream, mut events) = RunStream::new(
            run_id,
            "http://relay.test/api/stream/",
            StreamOptions::default(),
            Arc::new(transport),
        );
        stream.connect();

        let pending = requests.next().await.unwrap();
        assert_eq!(
            pending.request().url,
            format!("http://relay.test/api/stream/runs/{run_id}")
        );
        let session = pending.accept();

        while let Some(event) = events.recv().await {
            if event == RunStreamEvent::Opened {
                break;
            }
        }
        (stream, events, session, requests)
    }

    async fn drain(events: &mut RunStreamEvents) -> Vec<RunStreamEvent> {
        let mut all = Vec::new();
        while let Some(event) = events.recv().await {
            all.push(event);
        }
        all
    }

    #[test]
    fn test_run_stream_url() {
        assert_eq!(
            run_stream_url("http://host/api/stream", "run-1"),
            "http://host/api/stream/runs/run-1"
        );
        assert_eq!(run_stream_url("http://host/", "x"), "http://host/runs/x");
    }

    #[tokio::test]
    async fn test_status_and_event_dispatch() {
        let (stream, mut events, session, _requests) = open_run("run-7").await;

        session
            .send_data(json!({"type": "status", "run": {"state": "running"}}).to_string())
            .await;
        session.send_data(json!({"type": "status"}).to_string()).await;
        session
            .send_data(json!({"type": "event", "event": {"kind": "tool"}}).to_string())
            .await;

        assert_eq!(
            events.recv().await,
            Some(RunStreamEvent::Status(RunSnapshot(json!({"state": "running"}))))
        );
        // The status without `run` was skipped
        assert_eq!(
            events.recv().await,
            Some(RunStreamEvent::Event(RunEvent(json!({"kind": "tool"}))))
        );
        assert_eq!(stream.state(), ConnectionState::Connected);
        stream.close();
    }

    #[tokio::test]
    async fn test_error_envelope_is_terminal() {
        let (stream, mut events, session, mut requests) = open_run("run-8").await;

        session.send_data(json!({"type": "error"}).to_string()).await;
        session
            .send_data(json!({"type": "status", "run": {}}).to_string())
            .await;

        let all = drain(&mut events).await;
        assert_eq!(
            all.first(),
            Some(&RunStreamEvent::Error(StreamError::Run {
                message: DEFAULT_RUN_ERROR.to_string()
            }))
        );
        assert_eq!(all.last(), Some(&RunStreamEvent::Closed));
        assert!(!all.iter().any(|e| matches!(e, RunStreamEvent::Status(_))));
        assert_eq!(stream.state(), ConnectionState::Closed);

        // Closed streams never reconnect
        assert!(requests.try_next().is_none());
    }

    #[tokio::test]
    async fn test_complete_without_run_still_closes() {
        let (stream, mut events, session, _requests) = open_run("run-9").await;

        session.send_data(json!({"type": "complete"}).to_string()).await;

        let all = drain(&mut events).await;
        assert!(!all.iter().any(|e| matches!(e, RunStreamEvent::Complete(_))));
        assert_eq!(all.last(), Some(&RunStreamEvent::Closed));
        assert!(stream.connection().is_closed());
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_envelopes_non_fatal() {
        let (stream, mut events, session, _requests) = open_run("run-10").await;

        session.send_data(r#"{"no_type":true}"#).await;
        session.send_data(r#"{"type":"heartbeat"}"#).await;
        session
            .send_data(json!({"type": "event", "event": 1}).to_string())
            .await;

        assert!(matches!(
            events.recv().await,
            Some(RunStreamEvent::Error(StreamError::Parse { .. }))
        ));
        assert_eq!(
            events.recv().await,
            Some(RunStreamEvent::Event(RunEvent(json!(1))))
        );
        assert_eq!(stream.state(), ConnectionState::Connected);
        stream.close();
    }
}
