//! Streaming transport: authenticated websocket carrying ticker updates and
//! execution reports.
//!
//! The channel itself holds no socket between sessions. Each session is one
//! [`StreamSession::open`] (connect, auth, resubscribe) followed by one
//! [`StreamSession::drive`] (read loop) under the reconnect supervisor.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ConnectionError;
use crate::events::{BrokerEvent, EventBus};
use crate::metrics::{MetricsRecorder, STREAM_CONNECT};
use crate::models::{ConnectionState, DisconnectReason};
use crate::trading::{MarketDataCache, StreamSession};

use super::signer::Signer;
use super::types::{parse_inbound, InboundFrame, StreamRequest};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the peer closes without a status.
const NO_STATUS_CODE: u16 = 1005;

/// Socket opened and authenticated, with the symbols subscribed on it.
pub struct OpenStream {
    ws: WsStream,
    subscribed: BTreeSet<String>,
}

impl std::fmt::Debug for OpenStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenStream")
            .field("subscribed", &self.subscribed)
            .finish_non_exhaustive()
    }
}

/// Shared handles the transport writes into.
#[derive(Clone)]
pub struct StreamSinks {
    pub state: Arc<RwLock<ConnectionState>>,
    pub cache: Arc<MarketDataCache>,
    pub events: EventBus,
    pub metrics: Arc<MetricsRecorder>,
}

pub struct TransportChannel {
    ws_url: String,
    api_key: String,
    signer: Signer,
    connect_timeout: Duration,
    sinks: StreamSinks,
    symbols: Mutex<BTreeSet<String>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    next_request_id: AtomicU64,
}

impl TransportChannel {
    pub fn new(
        ws_url: &str,
        api_key: &str,
        signer: Signer,
        connect_timeout: Duration,
        sinks: StreamSinks,
    ) -> Self {
        Self {
            ws_url: ws_url.to_string(),
            api_key: api_key.to_string(),
            signer,
            connect_timeout,
            sinks,
            symbols: Mutex::new(BTreeSet::new()),
            outbound: Mutex::new(None),
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.sinks.state.read()
    }

    /// Queue a frame on the live socket. Logs and drops it when not connected.
    pub fn send(&self, message: Message) -> bool {
        if !self.state().is_connected() {
            warn!(state = %self.state(), "Stream not connected, dropping outbound message");
            return false;
        }
        let outbound = self.outbound.lock();
        match outbound.as_ref() {
            Some(tx) if tx.send(message).is_ok() => true,
            _ => {
                warn!("Stream writer unavailable, dropping outbound message");
                false
            }
        }
    }

    fn send_json<T: Serialize>(&self, frame: &T) -> bool {
        match serde_json::to_string(frame) {
            Ok(text) => self.send(Message::text(text)),
            Err(e) => {
                warn!(error = %e, "Failed to encode outbound frame");
                false
            }
        }
    }

    /// Subscribe to ticker updates. Symbols are remembered and re-sent after
    /// every reconnect; repeating a subscription is harmless.
    pub fn subscribe(&self, symbols: &[String]) {
        let symbols = normalize(symbols);
        if symbols.is_empty() {
            return;
        }
        self.symbols.lock().extend(symbols.iter().cloned());

        if self.state().is_connected() {
            let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
            self.send_json(&StreamRequest::subscribe(&symbols, id));
            info!(symbols = ?symbols, "Subscribed to market data");
        } else {
            debug!(symbols = ?symbols, "Subscription queued until connected");
        }
    }

    /// Stop ticker updates for `symbols`. Cached quotes are kept.
    pub fn unsubscribe(&self, symbols: &[String]) {
        let symbols = normalize(symbols);
        if symbols.is_empty() {
            return;
        }
        {
            let mut remembered = self.symbols.lock();
            for s in &symbols {
                remembered.remove(s);
            }
        }

        if self.state().is_connected() {
            let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
            self.send_json(&StreamRequest::unsubscribe(&symbols, id));
            info!(symbols = ?symbols, "Unsubscribed from market data");
        }
    }

    pub fn subscribed_symbols(&self) -> Vec<String> {
        self.symbols.lock().iter().cloned().collect()
    }

    fn dispatch(&self, text: &str) {
        match parse_inbound(text) {
            Ok(InboundFrame::Ticker(quote)) => {
                self.sinks.cache.update(quote.clone());
                self.sinks.events.emit(BrokerEvent::MarketData(quote));
            }
            Ok(InboundFrame::ExecutionReport(update)) => {
                debug!(order_id = %update.order_id, status = %update.status, "Execution report");
                self.sinks.events.emit(BrokerEvent::OrderUpdate(update));
            }
            Ok(InboundFrame::Ack(value)) => debug!(ack = %value, "Stream request acknowledged"),
            Ok(InboundFrame::Authenticated) => info!("Stream authenticated"),
            Ok(InboundFrame::Rejected { id, code, msg }) => {
                warn!(id = ?id, code, msg = %msg, "Stream request rejected");
                let error = match id {
                    Some(id) => ConnectionError::Rejected {
                        id,
                        code,
                        message: msg,
                    },
                    None => ConnectionError::Auth(format!("{} ({})", msg, code)),
                };
                self.sinks.events.emit(BrokerEvent::Error(error));
            }
            Ok(InboundFrame::Other(kind)) => debug!(kind = %kind, "Ignoring stream message"),
            Err(e) => warn!(error = %e, "Dropping malformed stream message"),
        }
    }

    async fn connect_socket(&self) -> Result<WsStream, ConnectionError> {
        let connect = connect_async(self.ws_url.as_str());
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Err(_) => Err(ConnectionError::Timeout(self.connect_timeout)),
            Ok(Err(e)) => Err(ConnectionError::Open {
                url: self.ws_url.clone(),
                message: e.to_string(),
            }),
            Ok(Ok((ws, _response))) => Ok(ws),
        }
    }
}

#[async_trait]
impl StreamSession for TransportChannel {
    type Connection = OpenStream;

    async fn open(&self) -> Result<OpenStream, ConnectionError> {
        let started = Instant::now();
        info!(url = %self.ws_url, "Opening stream");
        let mut ws = self.connect_socket().await?;

        let timestamp = Utc::now().timestamp_millis();
        let auth = StreamRequest::auth(
            &self.api_key,
            timestamp,
            self.signer.sign_auth(&self.api_key, timestamp),
        );
        let auth = serde_json::to_string(&auth).map_err(|e| ConnectionError::Auth(e.to_string()))?;
        ws.send(Message::text(auth))
            .await
            .map_err(|e| ConnectionError::Auth(e.to_string()))?;

        let subscribed = self.symbols.lock().clone();
        if !subscribed.is_empty() {
            let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
            let frame = serde_json::to_string(&StreamRequest::subscribe(&subscribed, id))
                .map_err(|e| ConnectionError::Open {
                    url: self.ws_url.clone(),
                    message: e.to_string(),
                })?;
            ws.send(Message::text(frame))
                .await
                .map_err(|e| ConnectionError::Open {
                    url: self.ws_url.clone(),
                    message: e.to_string(),
                })?;
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.sinks.metrics.record(STREAM_CONNECT, elapsed_ms);
        info!(
            symbols = subscribed.len(),
            elapsed_ms = format!("{:.1}", elapsed_ms),
            "Stream open, auth sent"
        );

        Ok(OpenStream { ws, subscribed })
    }

    async fn drive(&self, conn: OpenStream, cancel: &CancellationToken) -> DisconnectReason {
        let (mut sink, mut stream) = conn.ws.split();
        let (tx, mut outbound) = mpsc::unbounded_channel();
        let writer = tx.clone();
        *self.outbound.lock() = Some(tx);

        // Symbols added between open and writer registration.
        let missed: Vec<String> = self
            .symbols
            .lock()
            .difference(&conn.subscribed)
            .cloned()
            .collect();
        if !missed.is_empty() {
            let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
            self.send_json(&StreamRequest::subscribe(&missed, id));
        }

        let reason = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break DisconnectReason::Requested;
                }
                Some(message) = outbound.recv() => {
                    if let Err(e) = sink.send(message).await {
                        break DisconnectReason::Transport(e.to_string());
                    }
                }
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.dispatch(text.as_str()),
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = sink.send(Message::Pong(payload)).await {
                            break DisconnectReason::Transport(e.to_string());
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((NO_STATUS_CODE, String::new()));
                        break DisconnectReason::Closed { code, reason };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break DisconnectReason::Transport(e.to_string()),
                    None => break DisconnectReason::EndOfStream,
                },
            }
        };

        // A newer session may own the slot by now.
        {
            let mut slot = self.outbound.lock();
            if slot.as_ref().is_some_and(|live| live.same_channel(&writer)) {
                *slot = None;
            }
        }
        debug!(reason = %reason, "Stream session ended");
        reason
    }
}

fn normalize(symbols: &[String]) -> Vec<String> {
    symbols
        .iter()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}
