//! Echo round-trip against a WebSocket echo server.
//!
//! Demonstrates:
//! - Implementing `Session` on top of `PayloadQueue`
//! - Opening and running a transport for the sandbox stage
//! - Cooperative delivery drained from the host loop
//! - Observing mid-session failures
//!
//! Usage:
//!   cargo run --example echo -- 127.0.0.1:9001
//!   cargo run --example echo -- 127.0.0.1:9001 --debug

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Context as _;
use gamelink_transport::{
    DeliveryMode, PayloadQueue, Session, Stage, Transport, TransportConfig,
};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_ADDRESS: &str = "127.0.0.1:9001";
const FRAMES: usize = 5;
const TICK: Duration = Duration::from_millis(50);

// ============================================================================
// Session
// ============================================================================

#[derive(Default)]
struct EchoSession {
    address: String,
    outbound: PayloadQueue,
    echoed: AtomicUsize,
}

impl Session for EchoSession {
    fn connection_url(&self, stage: Stage) -> String {
        println!("    Stage: {stage}");
        self.address.clone()
    }

    fn drain_pending(&self) -> Vec<String> {
        self.outbound.take_all()
    }

    fn receive_message(&self, message: &str) -> bool {
        println!("    ← {message}");
        self.echoed.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn handle_reconnect(&self) {
        println!("    ↻ reconnected");
    }
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let debug = args.iter().any(|a| a == "--debug");
    let address = args
        .iter()
        .find(|a| !a.starts_with("--"))
        .cloned()
        .unwrap_or_else(|| DEFAULT_ADDRESS.to_owned());

    let filter = if debug {
        "gamelink_transport=debug"
    } else {
        "gamelink_transport=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();

    if let Err(e) = run(address) {
        eprintln!("\n[ERROR] {e:#}");
        std::process::exit(1);
    }
}

fn run(address: String) -> anyhow::Result<()> {
    println!("=== Echo ===\n");

    // ========================================================================
    // Open and run
    // ========================================================================

    println!("[1] Connecting to {address}...");

    let transport = Transport::builder()
        .config(TransportConfig::new().with_delivery(DeliveryMode::Cooperative))
        .on_failure(|failure| println!("    ✗ {failure}"))
        .build()?;

    let session = Arc::new(EchoSession {
        address: address.clone(),
        ..EchoSession::default()
    });

    transport
        .open_and_run(Arc::clone(&session), Stage::Sandbox)
        .with_context(|| format!("could not reach {address}"))?;

    println!("    ✓ Running ({})\n", transport.state());

    // ========================================================================
    // Send and drain
    // ========================================================================

    println!("[2] Sending {FRAMES} frames...");

    for n in 1..=FRAMES {
        let frame = format!(r#"{{"action":"ping","seq":{n}}}"#);
        println!("    → {frame}");
        session.outbound.push(frame);
    }

    for _ in 0..100 {
        transport.update();
        if session.echoed.load(Ordering::SeqCst) >= FRAMES {
            break;
        }
        thread::sleep(TICK);
    }

    println!(
        "    ✓ {}/{FRAMES} echoed\n",
        session.echoed.load(Ordering::SeqCst)
    );

    // ========================================================================
    // Stop
    // ========================================================================

    println!("[3] Stopping...");
    transport.stop();
    println!("    ✓ Stopped ({})", transport.state());

    Ok(())
}
