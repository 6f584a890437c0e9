//! WebSocket transport layer.
//!
//! This module owns the live connection to the GameLink service, pumps
//! frames between it and a [`Session`](crate::Session), and reconnects with
//! bounded backoff when the connection fails.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   drain_pending()   ┌──────────────┐                ┌──────────┐
//! │              │◄────────────────────│  write pump  │── send_text ──►│          │
//! │   Session    │                     └──────────────┘                │  Socket  │
//! │              │  receive_message()  ┌──────────────┐                │ (swapped │
//! │              │◄────────────────────│  read pump   │◄─ fragments ───│  on each │
//! │              │  handle_reconnect() └──────────────┘                │ reconnect│
//! └──────────────┘                                                     └──────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. [`Transport::open`] - One bounded connect attempt, no retry
//! 2. [`Transport::run`] - Start write and read pump threads
//! 3. Failure on either pump - One reconnect episode, then resume
//! 4. [`Transport::stop`] - Cancel, close, join with bound; reusable after
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | [`TransportBuilder`] |
//! | `config` | Timeouts, drain interval, delivery mode, backoff |
//! | `connection` | `tokio-tungstenite` socket and connector |
//! | `core` | [`Transport`] owner handle and pump threads |
//! | `failure` | Mid-session failure kinds |
//! | `pump` | Write pump, read pump, reconnect routine |
//! | `socket` | [`Socket`] / [`Connector`] seam and frame types |

// ============================================================================
// Submodules
// ============================================================================

/// Transport builder.
pub mod builder;

/// Transport configuration.
pub mod config;

/// WebSocket connection built on `tokio-tungstenite`.
pub mod connection;

/// Owner-facing transport handle.
pub mod core;

/// Mid-session failure kinds.
pub mod failure;

/// Pumps and reconnect routine.
mod pump;

/// Socket abstraction.
pub mod socket;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::TransportBuilder;
pub use config::{DeliveryMode, ReconnectConfig, TransportConfig, backoff_delay};
pub use connection::{WsConnection, WsConnector};
pub use core::Transport;
pub use failure::{Failure, FailureHandler};
pub use socket::{ConnectionState, Connector, Fragment, FrameKind, Socket};
