#![allow(dead_code, reason = "Not every test binary uses every helper")]

use std::net::SocketAddr;
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc as std_mpsc};
use std::thread;
use std::time::{Duration, Instant};

use futures_util::{SinkExt as _, StreamExt as _};
use gamelink_transport::{PayloadQueue, Session, Stage};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
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
///
/// Same surface as the crate's internal test session.
#[derive(Default)]
pub struct RecordingSession {
    address: Option<String>,
    outbound: PayloadQueue,
    received: Mutex<Vec<String>>,
    stages: Mutex<Vec<Stage>>,
    reconnects: AtomicUsize,
}

impl RecordingSession {
    pub fn with_address(address: &str) -> Self {
        Self {
            address: Some(address.to_owned()),
            ..Self::default()
        }
    }

    pub fn enqueue(&self, frame: impl Into<String>) {
        self.outbound.push(frame);
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.stages.lock().clone()
    }

    pub fn reconnects(&self) -> usize {
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
// TestServer
// ============================================================================

enum Command {
    Text(String),
    Binary(Vec<u8>),
    Drop,
}

/// Local WebSocket server that serves one client connection at a time.
///
/// Text frames from the client are forwarded to [`TestServer::next_message`].
pub struct TestServer {
    addr: SocketAddr,
    received: std_mpsc::Receiver<String>,
    commands: mpsc::UnboundedSender<Command>,
    connections: Arc<AtomicUsize>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub fn start() -> Self {
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (received_tx, received) = std_mpsc::channel();
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connections);

        thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("server runtime");

            runtime.block_on(async move {
                let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
                ready_tx
                    .send(listener.local_addr().expect("local addr"))
                    .expect("report addr");

                tokio::select! {
                    _ = shutdown_rx => {}
                    () = serve(listener, received_tx, commands_rx, counter) => {}
                }
            });
        });

        let addr = ready_rx.recv().expect("server ready");

        Self {
            addr,
            received,
            commands,
            connections,
            shutdown: Some(shutdown_tx),
        }
    }

    /// `ws://127.0.0.1:{port}`
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Address without scheme, as a session would report it.
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn send_text(&self, text: &str) {
        let _ = self.commands.send(Command::Text(text.to_owned()));
    }

    pub fn send_binary(&self, data: Vec<u8>) {
        let _ = self.commands.send(Command::Binary(data));
    }

    /// Drops the current connection without a close handshake.
    pub fn drop_connection(&self) {
        let _ = self.commands.send(Command::Drop);
    }

    pub fn next_message(&self, limit: Duration) -> Option<String> {
        self.received.recv_timeout(limit).ok()
    }

    pub fn collect(&self, count: usize, limit: Duration) -> Vec<String> {
        let deadline = Instant::now() + limit;
        let mut messages = Vec::with_capacity(count);
        while messages.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.received.recv_timeout(remaining) {
                Ok(message) => messages.push(message),
                Err(_) => break,
            }
        }
        messages
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn serve(
    listener: TcpListener,
    received_tx: std_mpsc::Sender<String>,
    mut commands_rx: mpsc::UnboundedReceiver<Command>,
    connections: Arc<AtomicUsize>,
) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            continue;
        };
        let Ok(mut ws) = accept_async(stream).await else {
            continue;
        };
        connections.fetch_add(1, Ordering::SeqCst);

        loop {
            tokio::select! {
                message = ws.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        let _ = received_tx.send(text.to_string());
                    }
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
                command = commands_rx.recv() => match command {
                    Some(Command::Text(text)) => {
                        let _ = ws.send(Message::Text(text.into())).await;
                    }
                    Some(Command::Binary(data)) => {
                        let _ = ws.send(Message::Binary(data.into())).await;
                    }
                    Some(Command::Drop) | None => break,
                },
            }
        }
    }
}
