//! Transport configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use gamelink_transport::transport::{DeliveryMode, TransportConfig};
//!
//! let config = TransportConfig::new()
//!     .with_delivery(DeliveryMode::Cooperative)
//!     .with_drain_interval(Duration::from_millis(50));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Bound on one connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on one outbound send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on a graceful close.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on joining each pump thread during stop.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between write pump drain cycles.
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_millis(100);

/// Backoff unit: `delay = base * (attempt² + 1)`.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Backoff ceiling.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);

// ============================================================================
// DeliveryMode
// ============================================================================

/// How inbound messages reach the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// The read pump calls [`Session::receive_message`] directly.
    ///
    /// [`Session::receive_message`]: crate::Session::receive_message
    #[default]
    Immediate,
    /// Messages are queued until the owner calls
    /// [`Transport::update`](crate::Transport::update).
    Cooperative,
}

// ============================================================================
// ReconnectConfig
// ============================================================================

/// Reconnect backoff policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Backoff unit.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Attempts per episode before giving up. `None` retries until stopped.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BACKOFF_BASE,
            max_delay: DEFAULT_BACKOFF_MAX,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Delay after failed attempt number `attempt` (0-based).
    ///
    /// Quadratic growth `base * (attempt² + 1)` capped at `max_delay`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = u64::from(attempt);
        let factor = attempt.saturating_mul(attempt).saturating_add(1);
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);

        Duration::from_millis(base_ms.saturating_mul(factor)).min(self.max_delay)
    }

    /// Returns `true` once `attempts` failed tries exhaust the episode.
    #[inline]
    #[must_use]
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// Delay for `attempt` under the default policy.
#[inline]
#[must_use]
pub fn backoff_delay(attempt: u32) -> Duration {
    ReconnectConfig::default().delay(attempt)
}

// ============================================================================
// TransportConfig
// ============================================================================

/// Timeouts, pacing and delivery settings for a [`Transport`].
///
/// [`Transport`]: crate::Transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Bound on each connect attempt.
    pub connect_timeout: Duration,
    /// Bound on each outbound send.
    pub send_timeout: Duration,
    /// Bound on graceful close.
    pub close_timeout: Duration,
    /// Bound on joining each pump thread.
    pub join_timeout: Duration,
    /// Pause between drain cycles.
    pub drain_interval: Duration,
    /// Inbound delivery mode.
    pub delivery: DeliveryMode,
    /// Backoff policy.
    pub reconnect: ReconnectConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl TransportConfig {
    /// Creates a config with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            drain_interval: DEFAULT_DRAIN_INTERVAL,
            delivery: DeliveryMode::Immediate,
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Creates a config that queues inbound messages for `update()`.
    #[inline]
    #[must_use]
    pub fn cooperative() -> Self {
        Self {
            delivery: DeliveryMode::Cooperative,
            ..Self::new()
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl TransportConfig {
    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the send timeout.
    #[inline]
    #[must_use]
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Sets the close timeout.
    #[inline]
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Sets the pump join timeout.
    #[inline]
    #[must_use]
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Sets the write pump drain interval.
    #[inline]
    #[must_use]
    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval = interval;
        self
    }

    /// Sets the delivery mode.
    #[inline]
    #[must_use]
    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }

    /// Sets the reconnect policy.
    #[inline]
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl TransportConfig {
    /// Checks that every bound is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for zero timeouts, a zero drain interval,
    /// a backoff cap below its base, or `max_attempts` of zero.
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("connect_timeout", self.connect_timeout),
            ("send_timeout", self.send_timeout),
            ("close_timeout", self.close_timeout),
            ("join_timeout", self.join_timeout),
            ("drain_interval", self.drain_interval),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, value)| value.is_zero()) {
            return Err(Error::config(format!("{name} must be greater than zero")));
        }

        if self.reconnect.max_delay < self.reconnect.base_delay {
            return Err(Error::config("reconnect.max_delay is below base_delay"));
        }

        if self.reconnect.max_attempts == Some(0) {
            return Err(Error::config("reconnect.max_attempts must be at least 1"));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
