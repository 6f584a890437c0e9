//! Write pump, read pump and the reconnect routine.
//!
//! Both pumps run against the same [`Inner`] state. They never cache the
//! socket: every iteration re-reads the slot, which the reconnect routine
//! swaps for a new socket object rather than mutating the old one.
//!
//! # Reconnect Episode
//!
//! ```text
//! pump observes failure on current socket
//!   └─ claims `reconnecting` (other pump idles)
//!        ├─ close old socket (skipped if aborted)
//!        └─ loop: connect ──ok──► install, Open, handle_reconnect()
//!                    │
//!                   err ─► sleep backoff(attempt), attempt += 1
//!   └─ releases `reconnecting`
//! ```
//!
//! `done` or the shared cancellation token ends the loop at any point
//! without installing a socket or notifying the session.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::session::Session;

use super::config::{DeliveryMode, TransportConfig};
use super::failure::{Failure, FailureHandler};
use super::socket::{ConnectionState, Connector, FrameKind, Socket};

// ============================================================================
// Constants
// ============================================================================

/// How often an idle pump re-checks for a usable socket.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Types
// ============================================================================

pub(crate) type SharedSocket = Arc<dyn Socket>;
pub(crate) type SharedSession = Arc<dyn Session>;

/// Result of handing a reconnected socket to the slot.
enum Install {
    /// Installed; carries whatever socket it displaced.
    Installed(Option<SharedSocket>),
    /// Shutdown began first; the socket was not installed.
    Discarded,
}

/// Outcome of assembling one inbound message.
enum Received {
    /// A complete message.
    Message(String),
    /// The socket failed; partial data was discarded.
    Failed(Failure),
    /// The socket was swapped out while waiting.
    Replaced,
    /// Shutdown was requested.
    Cancelled,
}

// ============================================================================
// Inner
// ============================================================================

/// State shared by the owner and both pump threads.
pub(crate) struct Inner {
    pub(crate) config: TransportConfig,
    connector: Box<dyn Connector>,
    failure_handler: Option<FailureHandler>,
    /// Retained after the first successful open.
    target: RwLock<Option<Url>>,
    /// Current socket. Swapped, never mutated.
    socket: RwLock<Option<SharedSocket>>,
    state: Mutex<ConnectionState>,
    /// Bumped on every socket swap so a blocked reader can let go.
    generation: watch::Sender<u64>,
    done: AtomicBool,
    /// Held while setting `done` and while notifying the session of a
    /// reconnect, so no notification starts after shutdown began. Reentrant
    /// because the notification may itself call `stop`.
    shutdown_gate: ReentrantMutex<()>,
    reconnecting: AtomicBool,
    cancel: Mutex<CancellationToken>,
    session: RwLock<Option<SharedSession>>,
    /// Cooperative-mode inbound queue.
    inbox: Mutex<VecDeque<String>>,
    active_pumps: AtomicUsize,
}

impl Inner {
    pub(crate) fn new(
        config: TransportConfig,
        connector: Box<dyn Connector>,
        failure_handler: Option<FailureHandler>,
    ) -> Self {
        let (generation, _) = watch::channel(0);

        Self {
            config,
            connector,
            failure_handler,
            target: RwLock::new(None),
            socket: RwLock::new(None),
            state: Mutex::new(ConnectionState::Closed),
            generation,
            done: AtomicBool::new(true),
            shutdown_gate: ReentrantMutex::new(()),
            reconnecting: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
            session: RwLock::new(None),
            inbox: Mutex::new(VecDeque::new()),
            active_pumps: AtomicUsize::new(0),
        }
    }
}

// ============================================================================
// Inner - Accessors
// ============================================================================

impl Inner {
    #[inline]
    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    #[inline]
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    #[inline]
    pub(crate) fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn active_pumps(&self) -> usize {
        self.active_pumps.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn pending_inbound(&self) -> usize {
        self.inbox.lock().len()
    }

    pub(crate) fn target(&self) -> Option<Url> {
        self.target.read().clone()
    }

    pub(crate) fn has_socket(&self) -> bool {
        self.socket.read().is_some()
    }

    /// Socket the pumps may use right now.
    ///
    /// `None` while reconnecting or when the state is not `Open`.
    fn usable_socket(&self) -> Option<SharedSocket> {
        if self.is_reconnecting() || !self.state().is_open() {
            return None;
        }
        self.socket.read().clone()
    }

    fn is_current(&self, socket: &SharedSocket) -> bool {
        self.socket
            .read()
            .as_ref()
            .is_some_and(|current| current.id() == socket.id())
    }

    fn bump_generation(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }
}

// ============================================================================
// Inner - Lifecycle
// ============================================================================

impl Inner {
    /// Fails if `target` differs from the retained target.
    pub(crate) fn check_target(&self, target: &Url) -> Result<()> {
        if let Some(retained) = self.target.read().as_ref()
            && retained != target
        {
            return Err(Error::target_mismatch(retained.as_str(), target.as_str()));
        }
        Ok(())
    }

    /// One connection attempt bounded by the connect timeout.
    pub(crate) async fn connect_once(&self, target: &Url) -> Result<SharedSocket> {
        let limit = self.config.connect_timeout;

        match timeout(limit, self.connector.connect(target)).await {
            Ok(Ok(socket)) => Ok(Arc::from(socket)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::connection_timeout(limit.as_millis() as u64)),
        }
    }

    pub(crate) fn mark_connecting(&self) {
        self.set_state(ConnectionState::Connecting);
    }

    pub(crate) fn mark_closed(&self) {
        self.set_state(ConnectionState::Closed);
    }

    /// Installs the socket from a successful open and retains the target.
    ///
    /// Returns the socket it displaced, which the caller must close.
    pub(crate) fn install_opened(
        &self,
        socket: SharedSocket,
        target: Url,
    ) -> Option<SharedSocket> {
        let replaced = {
            let mut slot = self.socket.write();
            let replaced = slot.replace(socket);
            self.set_state(ConnectionState::Open);
            replaced
        };
        self.target.write().get_or_insert(target);
        self.bump_generation();
        replaced
    }

    /// Resets flags for a new run and returns the token the pumps observe.
    pub(crate) fn begin_run(&self, session: SharedSession) -> CancellationToken {
        self.done.store(false, Ordering::SeqCst);
        self.reconnecting.store(false, Ordering::SeqCst);
        *self.session.write() = Some(session);
        self.cancel.lock().clone()
    }

    /// Sets `done`, cancels blocking calls and detaches the socket.
    pub(crate) fn begin_shutdown(&self) -> Option<SharedSocket> {
        {
            let _gate = self.shutdown_gate.lock();
            self.done.store(true, Ordering::SeqCst);
        }
        self.cancel.lock().cancel();

        let previous = {
            let mut slot = self.socket.write();
            self.set_state(ConnectionState::Closing);
            slot.take()
        };
        self.bump_generation();
        previous
    }

    /// Leaves the transport reusable for a later open and run.
    ///
    /// The session is released unless messages still wait for `update`.
    pub(crate) fn finish_shutdown(&self) {
        self.set_state(ConnectionState::Closed);
        *self.cancel.lock() = CancellationToken::new();
        self.reconnecting.store(false, Ordering::SeqCst);
        self.release_session_if_drained();
    }

    fn release_session_if_drained(&self) {
        let mut session = self.session.write();
        if self.is_done() && self.active_pumps() == 0 && self.inbox.lock().is_empty() {
            session.take();
        }
    }

    /// Graceful close bounded by the close timeout. Errors are swallowed.
    pub(crate) async fn close_quietly(&self, socket: &SharedSocket) {
        if socket.state() == ConnectionState::Aborted {
            debug!(connection = %socket.id(), "Socket aborted, skipping close handshake");
            return;
        }

        let limit = self.config.close_timeout;
        match timeout(limit, socket.close()).await {
            Ok(Ok(())) => debug!(connection = %socket.id(), "Socket closed"),
            Ok(Err(e)) => debug!(connection = %socket.id(), error = %e, "Close failed"),
            Err(_) => debug!(
                connection = %socket.id(),
                timeout_ms = limit.as_millis() as u64,
                "Close timed out"
            ),
        }
    }

    /// Feeds queued cooperative-mode messages to the session.
    pub(crate) fn drain_inbox(&self) -> usize {
        let Some(session) = self.session.read().clone() else {
            return 0;
        };

        let messages: Vec<String> = self.inbox.lock().drain(..).collect();
        for message in &messages {
            if !session.receive_message(message) {
                debug!(len = message.len(), "Session rejected inbound message");
            }
        }

        drop(session);
        self.release_session_if_drained();
        messages.len()
    }
}

// ============================================================================
// Inner - Pumps
// ============================================================================

impl Inner {
    /// Drains the session every interval while the socket is usable.
    pub(crate) async fn write_pump(&self, session: SharedSession, cancel: CancellationToken) {
        let guard = PumpGuard::enter(&self.active_pumps);
        debug!("Write pump started");

        while !self.is_done() {
            if let Some(socket) = self.usable_socket() {
                let frames = session.drain_pending();
                if !frames.is_empty() {
                    self.send_frames(&socket, frames, &session, &cancel).await;
                }
            }

            if pause(&cancel, self.config.drain_interval).await {
                break;
            }
        }

        debug!("Write pump stopped");
        drop(guard);
        self.release_session_if_drained();
    }

    /// Assembles and delivers inbound messages until shutdown.
    pub(crate) async fn read_pump(&self, session: SharedSession, cancel: CancellationToken) {
        let guard = PumpGuard::enter(&self.active_pumps);
        let mut generation = self.generation.subscribe();
        debug!("Read pump started");

        while !self.is_done() {
            drop(generation.borrow_and_update());

            let Some(socket) = self.usable_socket() else {
                if pause(&cancel, IDLE_POLL_INTERVAL).await {
                    break;
                }
                continue;
            };

            match self.receive_message(&socket, &mut generation, &cancel).await {
                Received::Message(message) => self.deliver(&session, message),
                Received::Failed(failure) => {
                    self.handle_failure(&socket, failure, &session, &cancel)
                        .await;
                }
                Received::Replaced => {
                    trace!(connection = %socket.id(), "Socket replaced while reading");
                }
                Received::Cancelled => break,
            }
        }

        debug!("Read pump stopped");
        drop(guard);
        self.release_session_if_drained();
    }

    /// Sends one drain cycle in order. Stops at the first failure.
    async fn send_frames(
        &self,
        socket: &SharedSocket,
        frames: Vec<String>,
        session: &SharedSession,
        cancel: &CancellationToken,
    ) {
        let total = frames.len();
        let limit = self.config.send_timeout;

        for (index, frame) in frames.into_iter().enumerate() {
            let failure = match timeout(limit, socket.send_text(frame)).await {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => Failure::from_error(&e),
                Err(_) => Failure::SendTimeout {
                    timeout_ms: limit.as_millis() as u64,
                },
            };

            warn!(
                connection = %socket.id(),
                dropped = total - index,
                "Send failed, dropping rest of drain cycle"
            );
            self.handle_failure(socket, failure, session, cancel).await;
            return;
        }

        trace!(connection = %socket.id(), count = total, "Drain cycle sent");
    }

    /// Reads fragments until a message boundary.
    async fn receive_message(
        &self,
        socket: &SharedSocket,
        generation: &mut watch::Receiver<u64>,
        cancel: &CancellationToken,
    ) -> Received {
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            let fragment = tokio::select! {
                () = cancel.cancelled() => return Received::Cancelled,
                _ = generation.changed() => return Received::Replaced,
                fragment = socket.recv_fragment() => fragment,
            };

            let failure = match fragment {
                Ok(fragment) if fragment.kind == FrameKind::Text => {
                    buffer.extend_from_slice(&fragment.data);
                    if fragment.end_of_message {
                        let message = String::from_utf8_lossy(&buffer).into_owned();
                        return Received::Message(message);
                    }
                    continue;
                }
                Ok(fragment) if fragment.kind == FrameKind::Binary => Failure::NonText,
                Ok(_) => Failure::PeerClosed,
                Err(e) => Failure::from_error(&e),
            };

            if !buffer.is_empty() {
                debug!(
                    connection = %socket.id(),
                    discarded = buffer.len(),
                    "Discarding partial message"
                );
            }
            return Received::Failed(failure);
        }
    }

    fn deliver(&self, session: &SharedSession, message: String) {
        match self.config.delivery {
            DeliveryMode::Immediate => {
                if !session.receive_message(&message) {
                    debug!(len = message.len(), "Session rejected inbound message");
                }
            }
            DeliveryMode::Cooperative => self.inbox.lock().push_back(message),
        }
    }
}

// ============================================================================
// Inner - Reconnect
// ============================================================================

impl Inner {
    /// Routes a pump failure into at most one reconnect episode.
    async fn handle_failure(
        &self,
        failed: &SharedSocket,
        failure: Failure,
        session: &SharedSession,
        cancel: &CancellationToken,
    ) {
        if self.is_done() {
            trace!(%failure, "Failure during shutdown ignored");
            return;
        }

        warn!(connection = %failed.id(), %failure, "Transport failure");
        if let Some(handler) = &self.failure_handler {
            handler(&failure);
        }

        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Reconnect already in progress");
            return;
        }

        if !self.is_current(failed) {
            debug!(connection = %failed.id(), "Failure on replaced socket ignored");
            self.reconnecting.store(false, Ordering::SeqCst);
            return;
        }

        if failed.state() == ConnectionState::Aborted {
            self.set_state(ConnectionState::Aborted);
        }

        self.reconnect(session, cancel).await;
        self.reconnecting.store(false, Ordering::SeqCst);
    }

    /// Runs one reconnect episode. Returns `true` if a socket was installed.
    async fn reconnect(&self, session: &SharedSession, cancel: &CancellationToken) -> bool {
        self.set_state(ConnectionState::Connecting);

        let previous = self.take_socket();
        if let Some(previous) = previous {
            self.close_quietly(&previous).await;
        }

        let Some(target) = self.target() else {
            error!("No target retained, cannot reconnect");
            self.set_state(ConnectionState::Closed);
            return false;
        };

        let policy = &self.config.reconnect;
        let mut attempt: u32 = 0;

        loop {
            if self.is_done() {
                debug!("Reconnect abandoned");
                return false;
            }

            let result = tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Reconnect abandoned");
                    return false;
                }
                result = self.connect_once(&target) => result,
            };

            let error = match result {
                Ok(socket) => {
                    return match self.complete_reconnect(Arc::clone(&socket), session, attempt) {
                        Install::Installed(replaced) => {
                            if let Some(replaced) = replaced {
                                self.close_quietly(&replaced).await;
                            }
                            true
                        }
                        Install::Discarded => {
                            self.close_quietly(&socket).await;
                            false
                        }
                    };
                }
                Err(e) => e,
            };

            let delay = policy.delay(attempt);
            attempt = attempt.saturating_add(1);

            if policy.is_exhausted(attempt) {
                error!(attempts = attempt, error = %error, "Giving up on reconnect");
                self.set_state(ConnectionState::Closed);
                return false;
            }

            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Reconnect attempt failed, retrying"
            );

            if pause(cancel, delay).await {
                debug!("Reconnect abandoned during backoff");
                return false;
            }
        }
    }

    fn take_socket(&self) -> Option<SharedSocket> {
        let previous = mem::take(&mut *self.socket.write());
        self.bump_generation();
        previous
    }

    /// Installs a reconnected socket and notifies the session, unless
    /// shutdown began meanwhile.
    fn complete_reconnect(
        &self,
        socket: SharedSocket,
        session: &SharedSession,
        failed_attempts: u32,
    ) -> Install {
        let _gate = self.shutdown_gate.lock();

        if self.is_done() {
            debug!(connection = %socket.id(), "Stopped during reconnect, discarding socket");
            return Install::Discarded;
        }

        let replaced = {
            let mut slot = self.socket.write();
            let replaced = slot.replace(Arc::clone(&socket));
            self.set_state(ConnectionState::Open);
            replaced
        };
        self.bump_generation();

        if let Some(replaced) = &replaced {
            warn!(connection = %replaced.id(), "Reconnect displaced a socket, closing it");
        }

        info!(
            connection = %socket.id(),
            attempts = failed_attempts + 1,
            "Reconnected"
        );
        session.handle_reconnect();
        Install::Installed(replaced)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Sleeps for `duration`. Returns `true` if cancelled first.
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        () = cancel.cancelled() => true,
        () = sleep(duration) => false,
    }
}

/// Counts live pumps for the lifetime of the guard.
struct PumpGuard<'a>(&'a AtomicUsize);

impl<'a> PumpGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for PumpGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
