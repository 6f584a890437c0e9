//! Scripted sockets and a recording session for unit tests.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::future;
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::session::{PayloadQueue, Session, Stage};

use super::socket::{ConnectionState, Connector, Fragment, Socket};

// ============================================================================
// Helpers
// ============================================================================

/// Installs a test subscriber once. Honors `RUST_LOG`.
pub(crate) fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Polls `condition` until it holds or `limit` elapses.
pub(crate) fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

// ============================================================================
// RecordingSession
// ============================================================================

/// Session that records everything the transport does to it.
#[derive(Default)]
pub(crate) struct RecordingSession {
    address: Option<String>,
    outbound: PayloadQueue,
    received: Mutex<Vec<String>>,
    stages: Mutex<Vec<Stage>>,
    reconnects: AtomicUsize,
}

impl RecordingSession {
    pub(crate) fn with_address(address: &str) -> Self {
        Self {
            address: Some(address.to_owned()),
            ..Self::default()
        }
    }

    pub(crate) fn enqueue(&self, frame: impl Into<String>) {
        self.outbound.push(frame);
    }

    pub(crate) fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }

    pub(crate) fn stages(&self) -> Vec<Stage> {
        self.stages.lock().clone()
    }

    pub(crate) fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }
}

impl Session for RecordingSession {
    fn connection_url(&self, stage: Stage) -> String {
        self.stages.lock().push(stage);
        self.address.clone().unwrap_or_default()
    }

    fn drain_pending(&self) -> Vec<String> {
        self.outbound.take_all()
    }

    fn receive_message(&self, message: &str) -> bool {
        self.received.lock().push(message.to_owned());
        true
    }

    fn handle_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// ScriptedSocket
// ============================================================================

/// State shared between a socket and its test handle.
struct SocketShared {
    state: Mutex<ConnectionState>,
    closes: AtomicUsize,
    fail_sends: AtomicBool,
    wire: Arc<Mutex<Vec<String>>>,
}

struct ScriptedSocket {
    id: ConnectionId,
    shared: Arc<SocketShared>,
    incoming: AsyncMutex<mpsc::UnboundedReceiver<Result<Fragment>>>,
}

#[async_trait]
impl Socket for ScriptedSocket {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    async fn send_text(&self, text: String) -> Result<()> {
        if self.shared.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::connection("scripted send failure"));
        }
        self.shared.wire.lock().push(text);
        Ok(())
    }

    async fn recv_fragment(&self) -> Result<Fragment> {
        match self.incoming.lock().await.recv().await {
            Some(result) => result,
            None => future::pending().await,
        }
    }

    async fn close(&self) -> Result<()> {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        *self.shared.state.lock() = ConnectionState::Closed;
        Ok(())
    }
}

/// Test-side control of one scripted socket.
#[derive(Clone)]
pub(crate) struct ScriptHandle {
    shared: Arc<SocketShared>,
    tx: mpsc::UnboundedSender<Result<Fragment>>,
}

impl ScriptHandle {
    pub(crate) fn push(&self, fragment: Fragment) {
        let _ = self.tx.send(Ok(fragment));
    }

    pub(crate) fn fail(&self, error: Error) {
        let _ = self.tx.send(Err(error));
    }

    /// Simulates losing the connection without a close handshake.
    pub(crate) fn abort(&self) {
        *self.shared.state.lock() = ConnectionState::Aborted;
        let _ = self.tx.send(Err(Error::ConnectionClosed));
    }

    pub(crate) fn fail_sends(&self) {
        self.shared.fail_sends.store(true, Ordering::SeqCst);
    }

    pub(crate) fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }
}

// ============================================================================
// ScriptedConnector
// ============================================================================

/// Scripted result of one connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Accept,
    Refuse,
    Hang,
}

#[derive(Default)]
struct ConnectorShared {
    outcomes: Mutex<VecDeque<Outcome>>,
    refuse_all: AtomicBool,
    attempts: AtomicUsize,
    sockets: Mutex<Vec<ScriptHandle>>,
    wire: Arc<Mutex<Vec<String>>>,
}

/// Connector whose attempts follow a script.
///
/// Queued outcomes are used first; afterwards every attempt is accepted
/// unless [`refuse_all`](Self::refuse_all) is set.
#[derive(Clone, Default)]
pub(crate) struct ScriptedConnector {
    shared: Arc<ConnectorShared>,
}

impl ScriptedConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_outcome(&self, outcome: Outcome) {
        self.shared.outcomes.lock().push_back(outcome);
    }

    pub(crate) fn refuse_all(&self, refuse: bool) {
        self.shared.refuse_all.store(refuse, Ordering::SeqCst);
    }

    pub(crate) fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Number of sockets handed out so far.
    pub(crate) fn accepted(&self) -> usize {
        self.shared.sockets.lock().len()
    }

    /// Handle of the `index`-th accepted socket.
    pub(crate) fn socket(&self, index: usize) -> ScriptHandle {
        self.shared.sockets.lock()[index].clone()
    }

    /// Every frame sent successfully, across all sockets.
    pub(crate) fn wire(&self) -> Vec<String> {
        self.shared.wire.lock().clone()
    }

    fn next_outcome(&self) -> Outcome {
        if let Some(outcome) = self.shared.outcomes.lock().pop_front() {
            return outcome;
        }
        if self.shared.refuse_all.load(Ordering::SeqCst) {
            Outcome::Refuse
        } else {
            Outcome::Accept
        }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, target: &Url) -> Result<Box<dyn Socket>> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);

        match self.next_outcome() {
            Outcome::Refuse => Err(Error::connection(format!("{target} refused"))),
            Outcome::Hang => future::pending().await,
            Outcome::Accept => {
                let (tx, rx) = mpsc::unbounded_channel();
                let shared = Arc::new(SocketShared {
                    state: Mutex::new(ConnectionState::Open),
                    closes: AtomicUsize::new(0),
                    fail_sends: AtomicBool::new(false),
                    wire: Arc::clone(&self.shared.wire),
                });

                self.shared.sockets.lock().push(ScriptHandle {
                    shared: Arc::clone(&shared),
                    tx,
                });

                Ok(Box::new(ScriptedSocket {
                    id: ConnectionId::generate(),
                    shared,
                    incoming: AsyncMutex::new(rx),
                }))
            }
        }
    }
}
