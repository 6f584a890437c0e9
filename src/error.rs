//! Error types for the GameLink transport.
//!
//! This module defines all error types returned by the public API.
//!
//! Only the owner-facing calls ([`Transport::open`], [`Transport::run`] and
//! the builder) return these errors. Failures detected inside the pumps are
//! never propagated; they are reported as [`Failure`] values and routed into
//! the reconnect routine.
//!
//! [`Transport::open`]: crate::Transport::open
//! [`Transport::run`]: crate::Transport::run
//! [`Failure`]: crate::transport::Failure
//!
//! # Usage
//!
//! ```ignore
//! use gamelink_transport::{Result, Transport};
//!
//! fn start(transport: &Transport) -> Result<()> {
//!     transport.open("ws://localhost:5050")?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidUrl`], [`Error::TargetMismatch`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`], [`Error::NotConnected`] |
//! | External | [`Error::Io`], [`Error::UrlParse`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;
use url::ParseError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when transport configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// URI is not a usable WebSocket target.
    #[error("Invalid WebSocket URL '{url}': {message}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        message: String,
    },

    /// Open was called with a different target than the retained one.
    ///
    /// The target URI is fixed by the first successful open.
    #[error("Target mismatch: transport is bound to {expected}, got {actual}")]
    TargetMismatch {
        /// The retained target.
        expected: String,
        /// The target passed to open.
        actual: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection attempt did not complete in time.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// WebSocket connection closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation requires an open connection.
    #[error("Not connected: call open() before run()")]
    NotConnected,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// URL parse error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] ParseError),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid URL error.
    #[inline]
    pub fn invalid_url(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a target mismatch error.
    #[inline]
    pub fn target_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TargetMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectionTimeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::NotConnected
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error comes from invalid caller input.
    #[inline]
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::InvalidUrl { .. }
                | Self::TargetMismatch { .. }
                | Self::UrlParse(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
