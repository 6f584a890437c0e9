//! Mid-session failure kinds.
//!
//! A [`Failure`] never reaches the caller as an error. Every kind is handled
//! the same way (tear down and reconnect); the kind only exists so an
//! optional [`FailureHandler`] can observe what happened.

// ============================================================================
// Imports
// ============================================================================

use thiserror::Error;

use crate::error::Error;

// ============================================================================
// Types
// ============================================================================

/// Callback invoked for each observed failure.
///
/// Runs on a pump thread and must not block.
pub type FailureHandler = Box<dyn Fn(&Failure) + Send + Sync>;

/// Why a pump abandoned the current socket.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Failure {
    /// Socket error while sending or receiving.
    #[error("socket error: {message}")]
    Socket {
        /// Description from the underlying error.
        message: String,
    },

    /// A binary frame arrived where text was expected.
    #[error("received a non-text frame")]
    NonText,

    /// Peer sent a close frame.
    #[error("peer closed the connection")]
    PeerClosed,

    /// Stream ended without a close handshake.
    #[error("stream ended without a close frame")]
    StreamEnded,

    /// Outbound send did not complete in time.
    #[error("send timed out after {timeout_ms}ms")]
    SendTimeout {
        /// Milliseconds waited.
        timeout_ms: u64,
    },
}

impl Failure {
    /// Classifies a socket error.
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::ConnectionClosed => Self::StreamEnded,
            other => Self::Socket {
                message: other.to_string(),
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
