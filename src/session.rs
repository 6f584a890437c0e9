//! Session contract consumed by the transport.
//!
//! The session owns protocol state: it serializes outbound frames into a
//! pending queue, parses inbound frames and dispatches them to subscribers.
//! The transport never interprets frame contents; it only needs the four
//! calls of the [`Session`] trait.
//!
//! # Example
//!
//! ```ignore
//! use gamelink_transport::{PayloadQueue, Session, Stage};
//!
//! struct EchoSession {
//!     outbound: PayloadQueue,
//! }
//!
//! impl Session for EchoSession {
//!     fn connection_url(&self, _stage: Stage) -> String {
//!         "localhost:5050".to_owned()
//!     }
//!
//!     fn drain_pending(&self) -> Vec<String> {
//!         self.outbound.take_all()
//!     }
//!
//!     fn receive_message(&self, message: &str) -> bool {
//!         self.outbound.push(message);
//!         true
//!     }
//!
//!     fn handle_reconnect(&self) {}
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::mem;

use parking_lot::Mutex;

// ============================================================================
// Stage
// ============================================================================

/// Deployment stage a session connects to.
///
/// Discriminants match the values the session layer uses when deriving
/// connection URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum Stage {
    /// Live environment.
    Production = 0,
    /// Test environment.
    #[default]
    Sandbox = 1,
}

impl Stage {
    /// Returns the stage name in lowercase.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Sandbox => "sandbox",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Session
// ============================================================================

/// Protocol session driven by a [`Transport`](crate::Transport).
///
/// All methods are called from the pump threads (or from the owner thread
/// through [`Transport::update`](crate::Transport::update) in cooperative
/// mode), so implementations must be thread-safe.
pub trait Session: Send + Sync {
    /// Derives the connection address for `stage`.
    ///
    /// The result may omit the scheme; `ws://` is assumed in that case.
    fn connection_url(&self, stage: Stage) -> String;

    /// Takes every pending outbound frame, in order, leaving the queue empty.
    ///
    /// Must be atomic with respect to concurrent producers.
    fn drain_pending(&self) -> Vec<String>;

    /// Handles one complete inbound message.
    ///
    /// Returns `false` if the session could not process it.
    fn receive_message(&self, message: &str) -> bool;

    /// Called once after each successful reconnect so the session can
    /// resubscribe or replay state.
    fn handle_reconnect(&self);
}

// ============================================================================
// PayloadQueue
// ============================================================================

/// Thread-safe FIFO for pending outbound frames.
///
/// Producers push from any thread; [`take_all`](Self::take_all) swaps the
/// whole queue out under one lock so no frame is lost or duplicated.
#[derive(Debug, Default)]
pub struct PayloadQueue {
    frames: Mutex<Vec<String>>,
}

impl PayloadQueue {
    /// Creates an empty queue.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a frame.
    pub fn push(&self, frame: impl Into<String>) {
        self.frames.lock().push(frame.into());
    }

    /// Removes and returns every queued frame in insertion order.
    #[must_use]
    pub fn take_all(&self) -> Vec<String> {
        mem::take(&mut *self.frames.lock())
    }

    /// Returns the number of queued frames.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    /// Returns `true` if nothing is queued.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Turns a session-provided address into a WebSocket URI.
///
/// Addresses without a scheme get `ws://` prepended.
#[must_use]
pub fn websocket_uri(address: &str) -> String {
    if address.contains("://") {
        address.to_owned()
    } else {
        format!("ws://{address}")
    }
}

// ============================================================================
// Tests
// ============================================================================
