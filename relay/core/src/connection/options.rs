//! Stream Connection Options
//!
//! Per-connection retry and timeout policy. Options are fixed when the
//! connection is built; each connection owns its copy.

use std::time::Duration;

/// Default base delay between reconnect attempts
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(1000);

/// Default ceiling for the reconnect delay
pub const DEFAULT_MAX_RECONNECT_INTERVAL: Duration = Duration::from_millis(30_000);

/// Default time allowed for a session to open
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Default number of reconnect attempts before giving up
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Configuration for a single `StreamConnection`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamOptions {
    /// Whether transport errors trigger automatic reconnection
    pub reconnect: bool,

    /// Reconnect attempts allowed before settling into `Disconnected`
    pub max_reconnect_attempts: u32,

    /// Base delay; doubles with every consecutive attempt
    pub reconnect_interval: Duration,

    /// Upper bound for the computed delay
    pub max_reconnect_interval: Duration,

    /// Deadline for the transport to confirm the session
    pub connect_timeout: Duration,

    /// Whether requests carry credentials
    pub with_credentials: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            reconnect: true,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            max_reconnect_interval: DEFAULT_MAX_RECONNECT_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            with_credentials: true,
        }
    }
}

impl StreamOptions {
    /// Create options with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable automatic reconnection
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the reconnect attempt ceiling
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the base reconnect delay
    #[must_use]
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Set the reconnect delay ceiling
    #[must_use]
    pub fn with_max_reconnect_interval(mut self, interval: Duration) -> Self {
        self.max_reconnect_interval = interval;
        self
    }

    /// Set the connect timeout
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the credentials mode
    #[must_use]
    pub fn with_credentials(mut self, with_credentials: bool) -> Self {
        self.with_credentials = with_credentials;
        self
    }

    /// Options that never reconnect
    #[must_use]
    pub fn no_reconnect() -> Self {
        Self {
            reconnect: false,
            ..Self::default()
        }
    }

    /// Delay before reconnect attempt `attempt` (1-indexed)
    ///
    /// `min(reconnect_interval * 2^(attempt - 1), max_reconnect_interval)`
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.reconnect_interval
            .saturating_mul(1u32 << exponent)
            .min(self.max_reconnect_interval)
    }
}
