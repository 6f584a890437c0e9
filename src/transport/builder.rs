//! Builder pattern for transport configuration.
//!
//! # Example
//!
//! ```no_run
//! use gamelink_transport::Transport;
//! use gamelink_transport::transport::DeliveryMode;
//!
//! # fn example() -> gamelink_transport::Result<()> {
//! let transport = Transport::builder()
//!     .delivery(DeliveryMode::Cooperative)
//!     .on_failure(|failure| eprintln!("transport failure: {failure}"))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use crate::error::Result;

use super::config::{DeliveryMode, TransportConfig};
use super::connection::WsConnector;
use super::core::Transport;
use super::failure::{Failure, FailureHandler};
use super::socket::Connector;

// ============================================================================
// TransportBuilder
// ============================================================================

/// Builder for a [`Transport`].
///
/// Use [`Transport::builder()`] to create a new builder.
#[derive(Default)]
pub struct TransportBuilder {
    /// Timeouts, pacing and delivery.
    config: TransportConfig,
    /// Socket factory. Defaults to [`WsConnector`].
    connector: Option<Box<dyn Connector>>,
    /// Optional failure observer.
    failure_handler: Option<FailureHandler>,
}

impl fmt::Debug for TransportBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportBuilder")
            .field("config", &self.config)
            .field("custom_connector", &self.connector.is_some())
            .field("failure_handler", &self.failure_handler.is_some())
            .finish()
    }
}

// ============================================================================
// TransportBuilder Implementation
// ============================================================================

impl TransportBuilder {
    /// Creates a builder with default configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    #[inline]
    #[must_use]
    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the inbound delivery mode.
    #[inline]
    #[must_use]
    pub fn delivery(mut self, delivery: DeliveryMode) -> Self {
        self.config.delivery = delivery;
        self
    }

    /// Uses a custom socket factory.
    #[inline]
    #[must_use]
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Box::new(connector));
        self
    }

    /// Registers a callback for mid-session failures.
    ///
    /// Called on a pump thread; it must return quickly. Retry behavior is
    /// the same whether or not a handler is set.
    #[inline]
    #[must_use]
    pub fn on_failure(mut self, handler: impl Fn(&Failure) + Send + Sync + 'static) -> Self {
        self.failure_handler = Some(Box::new(handler));
        self
    }

    /// Builds the transport with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`](crate::Error::Config) if the configuration is invalid
    /// - [`Error::Io`](crate::Error::Io) if the IO runtime cannot start
    pub fn build(self) -> Result<Transport> {
        self.config.validate()?;

        let connector: Box<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Box::new(WsConnector),
        };

        Transport::from_parts(self.config, connector, self.failure_handler)
    }
}

// ============================================================================
// Tests
// ============================================================================
