//! GameLink transport - reconnecting WebSocket client core.
//!
//! This library carries frames between a GameLink protocol session and the
//! service over a single WebSocket connection, reconnecting transparently
//! when the connection drops.
//!
//! # Architecture
//!
//! - **Session** (yours): protocol state behind the [`Session`] trait. It
//!   queues outbound frames, consumes inbound ones and resubscribes after a
//!   reconnect.
//! - **Transport** (this crate): owns the socket and two pump threads, and
//!   runs the reconnect state machine.
//!
//! Key design principles:
//!
//! - Exactly one write pump and one read pump per running transport
//! - Outbound frames only leave while the connection is open and stable
//! - Mid-session failures never surface as errors; they reconnect
//! - Stop is idempotent, bounded in time, and leaves the transport reusable
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use gamelink_transport::{PayloadQueue, Result, Session, Stage, Transport};
//!
//! struct Echo {
//!     outbound: PayloadQueue,
//! }
//!
//! impl Session for Echo {
//!     fn connection_url(&self, _stage: Stage) -> String {
//!         "localhost:5050".to_owned()
//!     }
//!     fn drain_pending(&self) -> Vec<String> {
//!         self.outbound.take_all()
//!     }
//!     fn receive_message(&self, message: &str) -> bool {
//!         println!("received: {message}");
//!         true
//!     }
//!     fn handle_reconnect(&self) {}
//! }
//!
//! fn main() -> Result<()> {
//!     let session = Arc::new(Echo { outbound: PayloadQueue::new() });
//!     let transport = Transport::new()?;
//!
//!     transport.open_and_run(Arc::clone(&session), Stage::Sandbox)?;
//!     session.outbound.push(r#"{"action":"ping"}"#);
//!
//!     // ... host loop
//!     transport.stop();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`session`] | [`Session`] contract and helpers |
//! | [`transport`] | [`Transport`], configuration and socket seam |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// Owner-facing operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Session contract consumed by the transport.
pub mod session;

/// WebSocket transport layer.
///
/// Connection lifecycle, pumps and reconnect policy.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::ConnectionId;

// Session types
pub use session::{PayloadQueue, Session, Stage, websocket_uri};

// Transport types
pub use transport::{
    ConnectionState, DeliveryMode, Failure, ReconnectConfig, Transport, TransportBuilder,
    TransportConfig,
};
