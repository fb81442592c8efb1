//! Local WebSocket server for end-to-end tests.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

/// Server side of an accepted connection.
pub(crate) type ServerSocket = WebSocketStream<TcpStream>;

/// How long helpers wait before failing a test.
const WAIT: Duration = Duration::from_secs(5);

/// Accepts WebSocket connections on a random local port.
pub(crate) struct TestServer {
    port: u16,
    accepted: mpsc::UnboundedReceiver<ServerSocket>,
}

impl TestServer {
    /// Binds to `127.0.0.1:0` and starts accepting.
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        let (tx, accepted) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = accept_async(stream).await else {
                    continue;
                };
                if tx.send(ws).is_err() {
                    break;
                }
            }
        });

        Self { port, accepted }
    }

    /// Endpoint URL of this server.
    pub(crate) fn url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws", self.port)
    }

    /// Waits for the next client connection.
    pub(crate) async fn accept(&mut self) -> ServerSocket {
        self.accepted.recv().await.expect("server running")
    }

    /// Returns a URL nobody listens on.
    pub(crate) async fn refused_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        drop(listener);
        format!("ws://127.0.0.1:{port}/ws")
    }
}

/// Reads the next text frame sent by the client.
pub(crate) async fn next_text(ws: &mut ServerSocket) -> String {
    loop {
        let message = timeout(WAIT, ws.next())
            .await
            .expect("frame in time")
            .expect("stream open")
            .expect("valid frame");
        if let Message::Text(text) = message {
            return text.to_string();
        }
    }
}
