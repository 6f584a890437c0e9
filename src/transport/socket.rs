//! Socket abstraction used by the pumps.
//!
//! The pumps never touch a concrete WebSocket type. They talk to a
//! [`Socket`] created by a [`Connector`], which keeps the reconnect state
//! machine independent from the network stack and lets tests script
//! fragment-level behavior.
//!
//! A socket is shared by both pumps at once: the write pump only calls
//! [`Socket::send_text`], the read pump only calls
//! [`Socket::recv_fragment`]. Implementations must allow those two calls to
//! run concurrently.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use async_trait::async_trait;
use url::Url;

use crate::error::Result;
use crate::identifiers::ConnectionId;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection.
    #[default]
    Closed,
    /// Connect (or reconnect) in progress.
    Connecting,
    /// Connected and usable.
    Open,
    /// Graceful close in progress.
    Closing,
    /// Connection lost without a close handshake.
    Aborted,
}

impl ConnectionState {
    /// Returns `true` if the connection is usable.
    #[inline]
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Fragment
// ============================================================================

/// Frame type of a received fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// UTF-8 text data.
    Text,
    /// Binary data.
    Binary,
    /// Peer-initiated close.
    Close,
}

/// One piece of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Frame type.
    pub kind: FrameKind,
    /// Payload bytes.
    pub data: Vec<u8>,
    /// Set on the last fragment of a message.
    pub end_of_message: bool,
}

impl Fragment {
    /// Creates a text fragment.
    #[inline]
    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>, end_of_message: bool) -> Self {
        Self {
            kind: FrameKind::Text,
            data: data.into(),
            end_of_message,
        }
    }

    /// Creates a complete binary message.
    #[inline]
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: FrameKind::Binary,
            data: data.into(),
            end_of_message: true,
        }
    }

    /// Creates a close fragment.
    #[inline]
    #[must_use]
    pub fn close() -> Self {
        Self {
            kind: FrameKind::Close,
            data: Vec::new(),
            end_of_message: true,
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// One live connection.
#[async_trait]
pub trait Socket: Send + Sync {
    /// Identifier of this socket instance.
    fn id(&self) -> ConnectionId;

    /// Current socket state.
    fn state(&self) -> ConnectionState;

    /// Sends one complete text message.
    async fn send_text(&self, text: String) -> Result<()>;

    /// Receives the next fragment.
    ///
    /// Blocks until data arrives. Must be cancel-safe with respect to
    /// dropping the returned future.
    async fn recv_fragment(&self) -> Result<Fragment>;

    /// Starts a graceful close handshake.
    async fn close(&self) -> Result<()>;
}

/// Factory for sockets.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Performs one connection attempt. Timeouts are applied by the caller.
    async fn connect(&self, target: &Url) -> Result<Box<dyn Socket>>;
}

// ============================================================================
// Tests
// ============================================================================
