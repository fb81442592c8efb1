//! Interactive console chat.
//!
//! Demonstrates:
//! - Building a client from the environment
//! - Watching connection state changes
//! - Request/response over a reconnecting socket
//! - Unsolicited server messages
//!
//! Usage:
//!   cargo run --example chat
//!   cargo run --example chat -- --debug
//!   cargo run --example chat -- --ask
//!   RAINBOW_BRIDGE_WS_URL=ws://host:8001/ws cargo run --example chat
//!
//! Type a message and press Enter. `/quit` exits, `/reconnect` reconnects.

// ============================================================================
// Imports
// ============================================================================

use tokio::io::{AsyncBufReadExt, BufReader, stdin};
use tracing_subscriber::EnvFilter;

use rainbow_bridge::{AskCodec, Client, ClientBuilder, ConnectionState, Result, SessionContext};

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone)]
struct Args {
    debug: bool,
    ask: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self {
            debug: args.iter().any(|a| a == "--debug"),
            ask: args.iter().any(|a| a == "--ask"),
        }
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== Rainbow Bridge chat ===\n");

    // ========================================================================
    // Setup
    // ========================================================================

    let mut builder = ClientBuilder::from_env();
    if args.ask {
        builder = builder.codec(AskCodec::new(SessionContext::new("demo-user", "demo-conversation")));
    }
    let client = builder.build()?;

    println!("[Setup] Endpoint: {}", client.url());

    spawn_status_printer(&client);
    spawn_notification_printer(&client);

    client.connect();
    client
        .watch_status()
        .wait_for(ConnectionState::Connected)
        .await?;

    // ========================================================================
    // Chat loop
    // ========================================================================

    let mut lines = BufReader::new(stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" => break,
            "/reconnect" => {
                client.disconnect();
                client.connect();
                continue;
            }
            _ => {}
        }

        match client.send_message(line).await {
            Ok(reply) => println!("bot> {reply}"),
            Err(e) => println!("[!] {e}"),
        }
    }

    client.disconnect();
    println!("\n=== Done ===");

    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn init_logging(debug: bool) {
    let filter = if debug {
        "rainbow_bridge=debug"
    } else {
        "rainbow_bridge=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

fn spawn_status_printer(client: &Client) {
    let mut status = client.watch_status();
    let client = client.clone();
    tokio::spawn(async move {
        while let Ok(state) = status.changed().await {
            println!("[status] {state}");
            if state == ConnectionState::Disconnected && client.reconnect_exhausted() {
                println!("[status] gave up reconnecting, type /reconnect to retry");
            }
        }
    });
}

fn spawn_notification_printer(client: &Client) {
    let mut notifications = client.notifications();
    tokio::spawn(async move {
        while let Ok(inbound) = notifications.recv().await {
            let text = inbound
                .content
                .or(inbound.message)
                .unwrap_or_else(|| "(no text)".to_string());
            println!("server> {text}");
        }
    });
}
