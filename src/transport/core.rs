//! Owner-facing transport handle.
//!
//! [`Transport`] is driven from plain host threads (a game loop, a test, a
//! `main`). It owns a small tokio runtime whose single worker drives socket
//! IO and timers, and two named OS threads that run the pumps on top of it.
//!
//! Do not call [`Transport::open`] or [`Transport::run`] from inside an async
//! runtime or from a [`Session`] callback. [`Transport::stop`] is safe there.

// ============================================================================
// Imports
// ============================================================================

use std::mem;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder as RuntimeBuilder, Handle, Runtime};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::session::{Session, Stage, websocket_uri};

use super::builder::TransportBuilder;
use super::config::{DeliveryMode, TransportConfig};
use super::failure::FailureHandler;
use super::pump::{Inner, SharedSession};
use super::socket::{ConnectionState, Connector};

// ============================================================================
// Constants
// ============================================================================

const WRITE_PUMP_THREAD: &str = "gamelink-write-pump";
const READ_PUMP_THREAD: &str = "gamelink-read-pump";
const IO_THREAD: &str = "gamelink-transport-io";

// ============================================================================
// Transport
// ============================================================================

/// Reconnecting WebSocket transport for one [`Session`].
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use gamelink_transport::{Stage, Transport};
///
/// let transport = Transport::new()?;
/// transport.open_and_run(Arc::clone(&session), Stage::Sandbox)?;
///
/// // ... later, from the host's shutdown hook
/// transport.dispose();
/// ```
pub struct Transport {
    /// State shared with the pumps.
    inner: Arc<Inner>,
    /// Drives socket IO and timers.
    runtime: Runtime,
    /// Live pump threads. Empty when not running.
    pumps: Mutex<Vec<PumpThread>>,
}

// ============================================================================
// Transport - Constructors
// ============================================================================

impl Transport {
    /// Creates a transport with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the IO runtime cannot start.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Creates a transport with `config`.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `config` is invalid
    /// - [`Error::Io`] if the IO runtime cannot start
    pub fn with_config(config: TransportConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Returns a builder for custom connectors and failure handlers.
    #[inline]
    #[must_use]
    pub fn builder() -> TransportBuilder {
        TransportBuilder::new()
    }

    pub(crate) fn from_parts(
        config: TransportConfig,
        connector: Box<dyn Connector>,
        failure_handler: Option<FailureHandler>,
    ) -> Result<Self> {
        let runtime = RuntimeBuilder::new_multi_thread()
            .worker_threads(1)
            .thread_name(IO_THREAD)
            .enable_all()
            .build()?;

        Ok(Self {
            inner: Arc::new(Inner::new(config, connector, failure_handler)),
            runtime,
            pumps: Mutex::new(Vec::new()),
        })
    }
}

// ============================================================================
// Transport - Public API
// ============================================================================

impl Transport {
    /// Opens a connection to `uri` with a single bounded attempt.
    ///
    /// Does not retry. The first successful open fixes the target used by
    /// every later reconnect. A no-op during a reconnect episode, which
    /// installs its own socket.
    ///
    /// # Errors
    ///
    /// - [`Error::UrlParse`] / [`Error::InvalidUrl`] for unusable URIs
    /// - [`Error::TargetMismatch`] if `uri` differs from the retained target
    /// - [`Error::ConnectionTimeout`] if the attempt exceeds the connect timeout
    /// - [`Error::Connection`] if the handshake fails
    pub fn open(&self, uri: &str) -> Result<()> {
        let target = parse_target(uri)?;
        self.inner.check_target(&target)?;

        if self.inner.has_socket() && self.inner.state().is_open() {
            debug!(url = %target, "Already open");
            return Ok(());
        }

        if self.inner.is_reconnecting() {
            debug!(url = %target, "Reconnect in progress, leaving connection to it");
            return Ok(());
        }

        self.inner.mark_connecting();

        match self.runtime.block_on(self.inner.connect_once(&target)) {
            Ok(socket) => {
                info!(url = %target, connection = %socket.id(), "Connected");
                if let Some(replaced) = self.inner.install_opened(socket, target) {
                    self.runtime.block_on(self.inner.close_quietly(&replaced));
                }
                Ok(())
            }
            Err(e) => {
                warn!(url = %target, error = %e, "Connect failed");
                self.inner.mark_closed();
                Err(e)
            }
        }
    }

    /// Resolves the address for `stage` through the session, opens it and runs.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open) and [`run`](Self::run).
    pub fn open_and_run<S: Session + 'static>(&self, session: Arc<S>, stage: Stage) -> Result<()> {
        let uri = websocket_uri(&session.connection_url(stage));
        debug!(%stage, %uri, "Resolved connection address");

        self.open(&uri)?;
        self.run(session)
    }

    /// [`open_and_run`](Self::open_and_run) against [`Stage::Sandbox`].
    ///
    /// # Errors
    ///
    /// Same as [`open_and_run`](Self::open_and_run).
    pub fn open_and_run_sandbox<S: Session + 'static>(&self, session: Arc<S>) -> Result<()> {
        self.open_and_run(session, Stage::Sandbox)
    }

    /// [`open_and_run`](Self::open_and_run) against [`Stage::Production`].
    ///
    /// # Errors
    ///
    /// Same as [`open_and_run`](Self::open_and_run).
    pub fn open_and_run_production<S: Session + 'static>(&self, session: Arc<S>) -> Result<()> {
        self.open_and_run(session, Stage::Production)
    }

    /// Starts the write and read pumps for `session`.
    ///
    /// If pumps are already active this stops them, reopens the retained
    /// target and starts a single fresh pair.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if no connection is open
    /// - connect errors from reopening after an implicit stop
    /// - [`Error::Io`] if a pump thread cannot be spawned
    pub fn run<S: Session + 'static>(&self, session: Arc<S>) -> Result<()> {
        let session: SharedSession = session;

        if self.is_running() {
            info!("Pumps already active, restarting");
            self.stop();
            let target = self.inner.target().ok_or(Error::NotConnected)?;
            self.open(target.as_str())?;
        }

        if !self.inner.has_socket() {
            return Err(Error::NotConnected);
        }

        let cancel = self.inner.begin_run(Arc::clone(&session));

        let write = {
            let inner = Arc::clone(&self.inner);
            let session = Arc::clone(&session);
            let cancel = cancel.clone();
            let handle = self.runtime.handle().clone();
            PumpThread::spawn(WRITE_PUMP_THREAD, move || {
                handle.block_on(inner.write_pump(session, cancel));
            })?
        };
        self.pumps.lock().push(write);

        let read = {
            let inner = Arc::clone(&self.inner);
            let handle = self.runtime.handle().clone();
            PumpThread::spawn(READ_PUMP_THREAD, move || {
                handle.block_on(inner.read_pump(session, cancel));
            })
        };

        match read {
            Ok(read) => {
                self.pumps.lock().push(read);
                debug!("Pumps started");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to start read pump");
                self.stop();
                Err(e)
            }
        }
    }

    /// Stops both pumps and closes the connection.
    ///
    /// Idempotent and safe to call when the pumps never started. Each pump
    /// thread is joined with the configured bound; one that does not finish
    /// in time is detached. Afterwards the transport can be opened and run
    /// again.
    ///
    /// May be called from a [`Session`] callback. The calling pump is then
    /// detached instead of joined and the close handshake runs in the
    /// background.
    pub fn stop(&self) {
        let pumps = mem::take(&mut *self.pumps.lock());

        if pumps.is_empty() && !self.inner.has_socket() && self.inner.is_done() {
            trace!("Stop on idle transport");
            return;
        }

        debug!(pumps = pumps.len(), "Stopping transport");

        if let Some(socket) = self.inner.begin_shutdown() {
            if Handle::try_current().is_ok() {
                // Called from a pump or a session callback; cannot block on the runtime here.
                debug!(connection = %socket.id(), "Closing socket in background");
                let inner = Arc::clone(&self.inner);
                self.runtime.spawn(async move {
                    inner.close_quietly(&socket).await;
                });
            } else {
                self.runtime.block_on(self.inner.close_quietly(&socket));
            }
        }

        let limit = self.inner.config.join_timeout;
        for pump in pumps {
            pump.join(limit);
        }

        self.inner.finish_shutdown();
        info!("Transport stopped");
    }

    /// Alias of [`stop`](Self::stop) for host shutdown hooks.
    #[inline]
    pub fn dispose(&self) {
        self.stop();
    }

    /// Delivers queued inbound messages on the calling thread.
    ///
    /// Only does work in [`DeliveryMode::Cooperative`]. Returns the number of
    /// messages handed to the session.
    pub fn update(&self) -> usize {
        if self.inner.config.delivery == DeliveryMode::Immediate {
            return 0;
        }

        let delivered = self.inner.drain_inbox();
        if delivered > 0 {
            trace!(delivered, "Delivered queued messages");
        }
        delivered
    }
}

// ============================================================================
// Transport - Accessors
// ============================================================================

impl Transport {
    /// Current connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Target retained from the first successful open.
    #[inline]
    #[must_use]
    pub fn target(&self) -> Option<Url> {
        self.inner.target()
    }

    /// Returns `true` while pumps are attached.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.pumps.lock().is_empty()
    }

    /// Returns `true` during a reconnect episode.
    #[inline]
    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        self.inner.is_reconnecting()
    }

    /// Number of pump loops currently executing.
    #[inline]
    #[must_use]
    pub fn active_pumps(&self) -> usize {
        self.inner.active_pumps()
    }

    /// Messages waiting for [`update`](Self::update).
    #[inline]
    #[must_use]
    pub fn pending_inbound(&self) -> usize {
        self.inner.pending_inbound()
    }

    /// Delivery mode chosen at construction.
    #[inline]
    #[must_use]
    pub fn delivery_mode(&self) -> DeliveryMode {
        self.inner.config.delivery
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// PumpThread
// ============================================================================

/// A pump thread that can be joined with a bound.
struct PumpThread {
    name: &'static str,
    handle: JoinHandle<()>,
    /// Signalled when the body returns.
    finished: mpsc::Receiver<()>,
}

impl PumpThread {
    fn spawn(name: &'static str, body: impl FnOnce() + Send + 'static) -> Result<Self> {
        let (finished_tx, finished) = mpsc::channel();

        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                body();
                let _ = finished_tx.send(());
            })?;

        Ok(Self {
            name,
            handle,
            finished,
        })
    }

    fn join(self, limit: Duration) {
        if self.handle.thread().id() == thread::current().id() {
            warn!(pump = self.name, "Stop called from pump thread, detaching");
            return;
        }

        match self.finished.recv_timeout(limit) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    error!(pump = self.name, "Pump thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    pump = self.name,
                    timeout_ms = limit.as_millis() as u64,
                    "Pump did not stop in time, detaching"
                );
            }
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Parses and checks a WebSocket target.
fn parse_target(uri: &str) -> Result<Url> {
    let target = Url::parse(uri)?;

    match target.scheme() {
        "ws" => Ok(target),
        "wss" if cfg!(feature = "tls") => Ok(target),
        "wss" => Err(Error::invalid_url(uri, "wss:// requires the `tls` feature")),
        other => Err(Error::invalid_url(
            uri,
            format!("unsupported scheme '{other}'"),
        )),
    }
}

// ============================================================================
// Tests
// ============================================================================
