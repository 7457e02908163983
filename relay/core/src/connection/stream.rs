//! Reconnecting Stream Connection
//!
//! A `StreamConnection` owns at most one live transport session to a single
//! URL. It drives the connection state machine, applies the connect timeout,
//! retries transport failures with exponential backoff and turns raw frames
//! into JSON envelopes.
//!
//! # Event Delivery
//!
//! Outcomes are delivered in order on the `StreamEvents` channel returned by
//! `StreamConnection::new`:
//!
//! ```text
//! StateChanged(connecting) → StateChanged(connected) → Opened → Message* →
//!     StateChanged(error) → Error → ... → StateChanged(closed) → Closed → (end)
//! ```
//!
//! Within one connect cycle `Opened` always precedes `Message`. `Closed` is
//! sent at most once and the channel ends right after it.
//!
//! # Concurrency
//!
//! `connect`, `disconnect` and `close` never block on the network: they
//! spawn onto the current tokio runtime and return. Every asynchronous
//! callback re-checks the closed flag and the session generation under the
//! connection lock, so a late open racing a timeout, or a frame racing
//! `close()`, cannot move the state machine after the fact.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::error::StreamError;
use super::options::StreamOptions;
use super::state::ConnectionState;
use crate::envelope::Envelope;
use crate::transport::{FrameReceiver, OpenRequest, SseFrame, SseTransport, TransportError};

/// Unique identifier of one `StreamConnection` instance
///
/// Distinguishes a replaced connection from its successor when both are
/// registered under the same logical id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create a new unique connection ID
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Handle returned by `add_event_listener`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Outcome delivered on a connection's event channel
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// The transport confirmed the session
    Opened,
    /// A frame carrying JSON data arrived
    Message(Envelope),
    /// Something went wrong; see `StreamError` for whether it is fatal
    Error(StreamError),
    /// The connection moved to a new state
    StateChanged(ConnectionState),
    /// The connection is permanently closed; nothing follows
    Closed,
}

/// Receiving side of a connection's events
#[derive(Debug)]
pub struct StreamEvents {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
}

impl StreamEvents {
    /// Wait for the next event
    ///
    /// Returns `None` after `Closed` has been delivered.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Take an event if one is already queued
    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        self.rx.try_recv().ok()
    }
}

/// Per-connection counters
#[derive(Clone, Debug, Default)]
pub struct StreamStats {
    /// Frames that parsed into an envelope
    pub messages_received: u64,
    /// Frames whose data was not valid JSON
    pub parse_errors: u64,
    /// Reconnects scheduled over the connection's lifetime
    pub reconnect_attempts: u64,
    /// Id of the last delivered frame; sent as `Last-Event-ID` on reconnect
    pub last_event_id: Option<String>,
    /// When the current session opened
    pub opened_at: Option<Instant>,
}

type Listener = Arc<dyn Fn(&SseFrame) + Send + Sync>;
type ListenerMap = HashMap<String, Vec<(ListenerId, Listener)>>;
type CloseHook = Box<dyn FnOnce() + Send>;
type TerminalCheck = Box<dyn Fn(&Envelope) -> bool + Send + Sync>;

/// The transport session currently owned by the connection
struct LiveSession {
    task: JoinHandle<()>,
    listeners: Arc<Mutex<ListenerMap>>,
}

impl LiveSession {
    /// Drop the session; listeners registered on it are discarded
    fn release(self, abort: bool) {
        self.listeners.lock().clear();
        if abort {
            self.task.abort();
        }
    }
}

struct Shared {
    state: ConnectionState,
    closed: bool,
    reconnect_attempts: u32,
    /// Bumped whenever a session is started or torn down; callbacks carrying
    /// an older generation are stale and ignored
    generation: u64,
    live: Option<LiveSession>,
    reconnect_timer: Option<JoinHandle<()>>,
    stats: StreamStats,
    close_hooks: Vec<CloseHook>,
    /// Decides on the session task whether a delivered envelope ends the stream
    terminal_check: Option<TerminalCheck>,
    events: Option<mpsc::UnboundedSender<StreamEvent>>,
}

struct Inner {
    id: ConnectionId,
    url: String,
    options: StreamOptions,
    transport: Arc<dyn SseTransport>,
    shared: Mutex<Shared>,
}

/// A reconnecting SSE connection
///
/// Cheap to clone; all clones drive the same connection. A connection that is
/// never closed keeps its session task alive, so call `close()` when done.
#[derive(Clone)]
pub struct StreamConnection {
    inner: Arc<Inner>,
}

impl StreamConnection {
    /// Create a connection in the `Disconnected` state
    ///
    /// Nothing happens on the network until `connect()` is called.
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        options: StreamOptions,
        transport: Arc<dyn SseTransport>,
    ) -> (Self, StreamEvents) {
        let (tx, rx) = mpsc::unbounded_channel();

        let inner = Inner {
            id: ConnectionId::new(),
            url: url.into(),
            options,
            transport,
            shared: Mutex::new(Shared {
                state: ConnectionState::Disconnected,
                closed: false,
                reconnect_attempts: 0,
                generation: 0,
                live: None,
                reconnect_timer: None,
                stats: StreamStats::default(),
                close_hooks: Vec::new(),
                terminal_check: None,
                events: Some(tx),
            }),
        };

        (
            Self {
                inner: Arc::new(inner),
            },
            StreamEvents { rx },
        )
    }

    /// Start a transport session
    ///
    /// No-op if the connection is closed or already owns a session. Cancels
    /// any pending reconnect timer. Must be called within a tokio runtime.
    pub fn connect(&self) {
        let mut shared = self.inner.shared.lock();
        self.inner.connect_locked(&mut shared);
    }

    /// Drop the current session and any pending reconnect
    ///
    /// Idempotent. The connection can be connected again afterwards.
    pub fn disconnect(&self) {
        let mut shared = self.inner.shared.lock();
        self.inner.disconnect_locked(&mut shared);
    }

    /// Close the connection for good
    ///
    /// Emits `Closed` exactly once and ends the event channel. Every later
    /// `connect()` is a no-op.
    pub fn close(&self) {
        let hooks = self.inner.close_locked(&mut self.inner.shared.lock());
        if let Some(hooks) = hooks {
            self.inner.finish_close(hooks);
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    /// Check if the transport session is open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Check if `close()` has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.shared.lock().closed
    }

    /// Register a raw frame listener on the live session
    ///
    /// The listener sees every frame whose event type matches, before JSON
    /// parsing, and runs on the session task so it must not block.
    ///
    /// Listeners belong to the session, not the connection: they are
    /// discarded on every reconnect, and registering while no session exists
    /// does nothing and returns `None`. Re-register on `StreamEvent::Opened`.
    pub fn add_event_listener<F>(&self, event_type: impl Into<String>, listener: F) -> Option<ListenerId>
    where
        F: Fn(&SseFrame) + Send + Sync + 'static,
    {
        let shared = self.inner.shared.lock();
        let Some(ref live) = shared.live else {
            tracing::debug!(connection_id = %self.inner.id, "No live session, listener ignored");
            return None;
        };

        let id = ListenerId::next();
        live.listeners
            .lock()
            .entry(event_type.into())
            .or_default()
            .push((id, Arc::new(listener)));
        Some(id)
    }

    /// Remove a listener from the live session
    ///
    /// Returns false if there is no live session or the listener is unknown.
    pub fn remove_event_listener(&self, event_type: &str, id: ListenerId) -> bool {
        let shared = self.inner.shared.lock();
        let Some(ref live) = shared.live else {
            return false;
        };

        let mut listeners = live.listeners.lock();
        let Some(entries) = listeners.get_mut(event_type) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(listener_id, _)| *listener_id != id);
        before != entries.len()
    }

    /// Instance identifier
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Target URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Options fixed at construction
    #[must_use]
    pub fn options(&self) -> &StreamOptions {
        &self.inner.options
    }

    /// Snapshot of the connection counters
    #[must_use]
    pub fn stats(&self) -> StreamStats {
        self.inner.shared.lock().stats.clone()
    }

    /// Run `hook` once the connection closes
    pub(crate) fn add_close_hook(&self, hook: impl FnOnce() + Send + 'static) {
        let mut shared = self.inner.shared.lock();
        if shared.closed {
            drop(shared);
            hook();
            return;
        }
        shared.close_hooks.push(Box::new(hook));
    }

    /// Forget all close hooks without running them
    pub(crate) fn clear_close_hooks(&self) {
        self.inner.shared.lock().close_hooks.clear();
    }

    /// Close the connection as soon as an envelope matching `check` is delivered
    ///
    /// The check runs on the session task under the connection lock, so
    /// nothing the server sends after that envelope (including end of
    /// stream) is observed and no reconnect can be scheduled.
    pub(crate) fn close_after(&self, check: impl Fn(&Envelope) -> bool + Send + Sync + 'static) {
        self.inner.shared.lock().terminal_check = Some(Box::new(check));
    }
}

impl fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConnection")
            .field("id", &self.inner.id)
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn connect_locked(self: &Arc<Self>, shared: &mut Shared) {
        if shared.closed {
            tracing::debug!(connection_id = %self.id, "Connection closed, connect ignored");
            return;
        }
        if shared.live.is_some() {
            tracing::debug!(connection_id = %self.id, "Session already live, connect ignored");
            return;
        }

        if let Some(timer) = shared.reconnect_timer.take() {
            timer.abort();
        }

        shared.generation += 1;
        let generation = shared.generation;
        self.set_state(shared, ConnectionState::Connecting);

        let request = OpenRequest {
            url: self.url.clone(),
            with_credentials: self.options.with_credentials,
            last_event_id: shared.stats.last_event_id.clone(),
        };
        let listeners = Arc::new(Mutex::new(ListenerMap::new()));

        tracing::debug!(
            connection_id = %self.id,
            url = %self.url,
            transport = self.transport.name(),
            "Opening stream"
        );

        let task = tokio::spawn(Arc::clone(self).run_session(
            generation,
            request,
            Arc::clone(&listeners),
        ));
        shared.live = Some(LiveSession { task, listeners });
    }

    /// Mark the connection closed; returns the hooks to run once unlocked
    ///
    /// `None` if the connection was already closed.
    fn close_locked(&self, shared: &mut Shared) -> Option<Vec<CloseHook>> {
        if shared.closed {
            return None;
        }
        shared.closed = true;
        self.disconnect_locked(shared);
        self.set_state(shared, ConnectionState::Closed);
        self.emit(shared, StreamEvent::Closed);
        shared.events = None;
        Some(std::mem::take(&mut shared.close_hooks))
    }

    fn finish_close(&self, hooks: Vec<CloseHook>) {
        tracing::info!(connection_id = %self.id, url = %self.url, "Stream connection closed");
        for hook in hooks {
            hook();
        }
    }

    fn disconnect_locked(&self, shared: &mut Shared) {
        if let Some(timer) = shared.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(live) = shared.live.take() {
            live.release(true);
        }
        shared.generation += 1;
        self.set_state(shared, ConnectionState::Disconnected);
    }

    fn set_state(&self, shared: &mut Shared, state: ConnectionState) {
        if shared.state == state || shared.state.is_terminal() {
            return;
        }
        tracing::debug!(
            connection_id = %self.id,
            from = %shared.state,
            to = %state,
            "State transition"
        );
        shared.state = state;
        self.emit(shared, StreamEvent::StateChanged(state));
    }

    fn emit(&self, shared: &Shared, event: StreamEvent) {
        if let Some(ref tx) = shared.events {
            // Receiver gone means nobody is listening; the connection keeps running
            let _ = tx.send(event);
        }
    }

    fn is_current(shared: &Shared, generation: u64) -> bool {
        !shared.closed && shared.generation == generation
    }

    async fn run_session(
        self: Arc<Self>,
        generation: u64,
        request: OpenRequest,
        listeners: Arc<Mutex<ListenerMap>>,
    ) {
        let timeout = self.options.connect_timeout;
        let mut frames: FrameReceiver =
            match tokio::time::timeout(timeout, self.transport.open(&request)).await {
                Ok(Ok(frames)) => frames,
                Ok(Err(e)) => {
                    self.handle_error(generation, StreamError::Transport(e));
                    return;
                }
                Err(_) => {
                    self.handle_error(generation, StreamError::ConnectTimeout { timeout });
                    return;
                }
            };

        if !self.handle_open(generation) {
            return;
        }

        while let Some(item) = frames.recv().await {
            match item {
                Ok(frame) => {
                    if !self.handle_frame(generation, &frame, &listeners) {
                        return;
                    }
                }
                Err(e) => {
                    self.handle_error(generation, StreamError::Transport(e));
                    return;
                }
            }
        }

        self.handle_error(generation, StreamError::Transport(TransportError::StreamEnded));
    }

    fn handle_open(&self, generation: u64) -> bool {
        let mut shared = self.shared.lock();
        if !Self::is_current(&shared, generation) {
            return false;
        }

        shared.reconnect_attempts = 0;
        shared.stats.opened_at = Some(Instant::now());
        self.set_state(&mut shared, ConnectionState::Connected);
        self.emit(&shared, StreamEvent::Opened);

        tracing::info!(connection_id = %self.id, url = %self.url, "Stream connected");
        true
    }

    fn handle_frame(
        &self,
        generation: u64,
        frame: &SseFrame,
        listeners: &Mutex<ListenerMap>,
    ) -> bool {
        let matching: Vec<Listener> = listeners
            .lock()
            .get(frame.event_type())
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        let hooks = {
            let mut shared = self.shared.lock();
            if !Self::is_current(&shared, generation) {
                return false;
            }

            if frame.id.is_some() {
                shared.stats.last_event_id = frame.id.clone();
            }

            let mut terminal = false;
            match serde_json::from_str::<Value>(&frame.data) {
                Ok(data) => {
                    shared.stats.messages_received += 1;
                    tracing::debug!(
                        connection_id = %self.id,
                        event_type = frame.event_type(),
                        "Frame received"
                    );
                    let envelope = Envelope {
                        event_type: frame.event_type().to_string(),
                        data,
                        id: frame.id.clone(),
                    };
                    terminal = shared
                        .terminal_check
                        .as_ref()
                        .is_some_and(|check| check(&envelope));
                    self.emit(&shared, StreamEvent::Message(envelope));
                }
                Err(e) => {
                    shared.stats.parse_errors += 1;
                    tracing::warn!(
                        connection_id = %self.id,
                        error = %e,
                        "Failed to parse frame data"
                    );
                    self.emit(
                        &shared,
                        StreamEvent::Error(StreamError::Parse {
                            raw: frame.data.clone(),
                            reason: e.to_string(),
                        }),
                    );
                }
            }

            if terminal {
                tracing::debug!(connection_id = %self.id, "Terminal envelope, closing");
                self.close_locked(&mut shared)
            } else {
                None
            }
        };

        for listener in matching {
            listener(frame);
        }
        match hooks {
            Some(hooks) => {
                self.finish_close(hooks);
                false
            }
            None => true,
        }
    }

    fn handle_error(self: &Arc<Self>, generation: u64, error: StreamError) {
        let mut shared = self.shared.lock();
        if !Self::is_current(&shared, generation) {
            return;
        }

        tracing::debug!(connection_id = %self.id, error = %error, "Stream error");

        // The session task is on its way out; detach it rather than abort it
        if let Some(live) = shared.live.take() {
            live.release(false);
        }
        self.set_state(&mut shared, ConnectionState::Error);
        self.emit(&shared, StreamEvent::Error(error));

        if !self.options.reconnect {
            self.disconnect_locked(&mut shared);
            return;
        }

        if shared.reconnect_attempts >= self.options.max_reconnect_attempts {
            let attempts = shared.reconnect_attempts;
            tracing::warn!(
                connection_id = %self.id,
                url = %self.url,
                attempts,
                "Max reconnect attempts reached, giving up"
            );
            self.emit(&shared, StreamEvent::Error(StreamError::RetriesExhausted { attempts }));
            self.disconnect_locked(&mut shared);
            return;
        }

        shared.reconnect_attempts += 1;
        shared.stats.reconnect_attempts += 1;
        let attempt = shared.reconnect_attempts;
        let delay = self.options.backoff_delay(attempt);

        tracing::info!(
            connection_id = %self.id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );

        let inner = Arc::clone(self);
        shared.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire_reconnect(generation);
        }));
    }

    fn fire_reconnect(self: &Arc<Self>, generation: u64) {
        let mut shared = self.shared.lock();
        if !Self::is_current(&shared, generation) {
            return;
        }
        // This is the timer task itself; detach its handle instead of aborting
        shared.reconnect_timer = None;
        self.disconnect_locked(&mut shared);
        self.connect_locked(&mut shared);
    }
}
