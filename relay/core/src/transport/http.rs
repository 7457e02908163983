//! HTTP Transport
//!
//! Opens `text/event-stream` responses with reqwest and decodes the body with
//! `decode_frames`. The request resolves (the session "opens") once the
//! response headers arrive with a success status.
//!
//! The body is pumped by a spawned task that stops as soon as the session's
//! receiver is dropped, so disconnecting releases the HTTP connection even on
//! an idle stream.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio::sync::mpsc;

use super::sse::decode_frames;
use super::traits::{FrameReceiver, OpenRequest, SseTransport, TransportError};

/// Header carrying the last delivered event id on reconnect
pub const LAST_EVENT_ID_HEADER: &str = "Last-Event-ID";

/// Capacity of the per-session frame channel
const CHANNEL_CAPACITY: usize = 100;

/// SSE transport over HTTP
#[derive(Clone, Debug)]
pub struct HttpSseTransport {
    /// HTTP client (shared connection pool)
    http_client: reqwest::Client,
    /// Bearer token sent when a request asks for credentials
    bearer_token: Option<String>,
}

impl Default for HttpSseTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpSseTransport {
    /// Create a transport with a fresh HTTP client
    ///
    /// No overall request timeout is set: event streams are long-lived and
    /// the connect deadline is enforced by the connection.
    #[must_use]
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    /// Create a transport around an existing client
    #[must_use]
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            bearer_token: None,
        }
    }

    /// Create a transport from environment variables
    ///
    /// - `RELAY_BEARER_TOKEN`: token attached when credentials are requested
    #[must_use]
    pub fn from_env() -> Self {
        Self::new().with_bearer_token(std::env::var("RELAY_BEARER_TOKEN").ok())
    }

    /// Set the bearer token used for credentialed requests
    #[must_use]
    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token.filter(|t| !t.is_empty());
        self
    }
}

#[async_trait]
impl SseTransport for HttpSseTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn open(&self, request: &OpenRequest) -> Result<FrameReceiver, TransportError> {
        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {e}", request.url)))?;

        let mut builder = self
            .http_client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");

        if let Some(ref last_event_id) = request.last_event_id {
            builder = builder.header(LAST_EVENT_ID_HEADER, last_event_id);
        }

        if request.with_credentials {
            if let Some(ref token) = self.bearer_token {
                builder = builder.bearer_auth(token);
            }
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::HttpStatus {
                status: response.status().as_u16(),
            });
        }

        tracing::debug!(url = %request.url, "Event stream response received");

        let mut frames = decode_frames(response.bytes_stream());
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let url = request.url.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tx.closed() => {
                        tracing::debug!(url = %url, "Session dropped, releasing event stream");
                        return;
                    }
                    item = frames.next() => match item {
                        Some(Ok(frame)) => {
                            if tx.send(Ok(frame)).await.is_err() {
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                        None => break,
                    },
                }
            }

            tracing::debug!(url = %url, "Event stream body ended");
        });

        Ok(rx)
    }
}
