//! In-process websocket exchange used by the streaming tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

pub enum ServerCommand {
    Send(Message),
    Close,
}

/// Accepts one connection at a time on `127.0.0.1:0`. Client text frames are
/// surfaced as JSON; pongs surface as `{"pong": true}`.
pub struct MockStreamServer {
    pub url: String,
    commands: mpsc::UnboundedSender<ServerCommand>,
    frames: mpsc::UnboundedReceiver<Value>,
    connections: Arc<AtomicUsize>,
}

impl MockStreamServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ws");
        let addr = listener.local_addr().expect("ws addr");
        let (commands, mut command_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connections);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    continue;
                };
                let Ok(mut ws) = accept_async(stream).await else {
                    continue;
                };
                counter.fetch_add(1, Ordering::SeqCst);

                loop {
                    tokio::select! {
                        cmd = command_rx.recv() => match cmd {
                            Some(ServerCommand::Send(msg)) => {
                                if ws.send(msg).await.is_err() {
                                    break;
                                }
                            }
                            Some(ServerCommand::Close) => {
                                let _ = ws
                                    .send(Message::Close(Some(CloseFrame {
                                        code: CloseCode::Normal,
                                        reason: "bye".into(),
                                    })))
                                    .await;
                                break;
                            }
                            None => return,
                        },
                        incoming = ws.next() => match incoming {
                            Some(Ok(Message::Text(text))) => {
                                let value = serde_json::from_str(text.as_str())
                                    .unwrap_or_else(|_| Value::String(text.to_string()));
                                let _ = frames_tx.send(value);
                            }
                            Some(Ok(Message::Pong(_))) => {
                                let _ = frames_tx.send(serde_json::json!({"pong": true}));
                            }
                            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                            Some(Ok(_)) => {}
                        },
                    }
                }
            }
        });

        Self {
            url: format!("ws://{}", addr),
            commands,
            frames,
            connections,
        }
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.send(Message::text(text.into()));
    }

    pub fn send(&self, msg: Message) {
        let _ = self.commands.send(ServerCommand::Send(msg));
    }

    /// Close the current connection with a normal close frame.
    pub fn close(&self) {
        let _ = self.commands.send(ServerCommand::Close);
    }

    /// Next frame received from the client, failing the test after 5s.
    pub async fn next_frame(&mut self) -> Value {
        tokio::time::timeout(Duration::from_secs(5), self.frames.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("server stopped")
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

pub fn ticker_json(symbol: &str, price: &str, bid: &str, ask: &str, event_time: i64) -> String {
    serde_json::json!({
        "e": "24hrTicker",
        "E": event_time,
        "s": symbol,
        "c": price,
        "b": bid,
        "a": ask,
        "v": "1000"
    })
    .to_string()
}

/// Poll `check` until it holds, failing the test after 5s.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met within 5s");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
