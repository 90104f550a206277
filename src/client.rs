//! Broker client: one streaming session, order execution and execution
//! metrics for a single credential pair.
//!
//! Handles:
//! - Connecting, authenticating and supervising the streaming channel
//! - Market data subscriptions and the latest-quote cache
//! - Signed order execution with slippage and latency tracking
//! - Event fan-out to registered handlers

use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ExchangeRestClient, Signer, StreamSinks, TransportChannel};
use crate::error::{ConnectionError, ExecutionError};
use crate::events::{BrokerEvent, EventBus, EventKind, SubscriptionId};
use crate::metrics::MetricsRecorder;
use crate::models::{BrokerConfig, ConnectionState, Credentials, OrderIntent, OrderOutcome, Quote};
use crate::trading::{
    ClientConfig, ExecutionEngine, ExecutionSummary, MarketDataCache, OpenOutcome,
    ReconnectSupervisor,
};

struct SessionHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    opens: watch::Receiver<OpenOutcome>,
}

impl SessionHandle {
    fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task.is_finished()
    }
}

/// Real-time execution client for one exchange account.
///
/// Construct one per credential pair and share it by reference (`Arc`).
pub struct BrokerClient {
    broker: BrokerConfig,
    config: ClientConfig,
    transport: Arc<TransportChannel>,
    engine: ExecutionEngine,
    events: EventBus,
    metrics: Arc<MetricsRecorder>,
    cache: Arc<MarketDataCache>,
    state: Arc<RwLock<ConnectionState>>,
    session: Mutex<Option<SessionHandle>>,
}

impl BrokerClient {
    /// Create a disconnected client.
    pub fn new(broker: BrokerConfig, credentials: Credentials, config: ClientConfig) -> Result<Self> {
        let signer = Signer::new(credentials.api_secret()).context("Invalid API secret")?;
        let events = EventBus::new();
        let metrics = Arc::new(MetricsRecorder::with_window(config.latency_window));
        let cache = Arc::new(MarketDataCache::new());
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));

        let rest = ExchangeRestClient::new(
            &broker.api_url,
            credentials.api_key(),
            signer.clone(),
            config.request_timeout(),
            config.recv_window_ms,
        )
        .context("Failed to build REST client")?;

        let transport = Arc::new(TransportChannel::new(
            &broker.ws_url,
            credentials.api_key(),
            signer,
            config.connect_timeout(),
            StreamSinks {
                state: Arc::clone(&state),
                cache: Arc::clone(&cache),
                events: events.clone(),
                metrics: Arc::clone(&metrics),
            },
        ));

        let engine = ExecutionEngine::new(
            rest,
            Arc::clone(&cache),
            Arc::clone(&metrics),
            events.clone(),
            &config,
        );

        info!(
            broker = %broker.name,
            testnet = broker.testnet,
            credentials = ?credentials,
            "Broker client created"
        );

        Ok(Self {
            broker,
            config,
            transport,
            engine,
            events,
            metrics,
            cache,
            state,
            session: Mutex::new(None),
        })
    }

    /// Open the streaming channel. Resolves once the socket is open and the
    /// auth frame is sent. On failure the error is returned and the session
    /// keeps retrying in the background until [`disconnect`](Self::disconnect).
    ///
    /// While a session is backing off or connecting, this waits for its next
    /// open attempt instead of starting another one.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let retired = {
            let mut session = self.session.lock();
            if session.as_ref().is_some_and(SessionHandle::is_active) {
                None
            } else {
                session.take()
            }
        };
        if let Some(old) = retired {
            self.retire(old).await;
        }

        let mut opens = {
            let mut session = self.session.lock();
            let running = session
                .as_ref()
                .filter(|active| active.is_active())
                .map(|active| active.opens.clone());

            if let Some(mut opens) = running {
                opens.mark_unchanged();
                // The supervisor sets the state before publishing, so a
                // session that opened before mark_unchanged shows here.
                if self.is_connected() {
                    debug!("Stream session already connected");
                    return Ok(());
                }
                debug!("Stream session retrying, waiting for its next open");
                opens
            } else {
                let cancel = CancellationToken::new();
                let (tx, opens) = watch::channel(None);
                let supervisor = ReconnectSupervisor::new(
                    Arc::clone(&self.transport),
                    self.config.reconnect_policy(),
                    self.events.clone(),
                    Arc::clone(&self.state),
                    cancel.clone(),
                );
                let task = tokio::spawn(supervisor.run(Some(tx)));
                *session = Some(SessionHandle {
                    cancel,
                    task,
                    opens: opens.clone(),
                });
                opens
            }
        };

        if opens.changed().await.is_err() {
            return Err(ConnectionError::Cancelled);
        }
        let outcome = opens.borrow_and_update().clone();
        outcome.unwrap_or(Err(ConnectionError::Cancelled))
    }

    /// Close the stream and stop reconnecting. Idempotent.
    pub fn disconnect(&self) {
        if let Some(session) = self.session.lock().as_ref() {
            if !session.cancel.is_cancelled() {
                session.cancel.cancel();
                info!(broker = %self.broker.name, "Disconnect requested");
            }
        }
        *self.state.write() = ConnectionState::Disconnected;
    }

    // The old task must be gone before a new one opens the channel.
    async fn retire(&self, old: SessionHandle) {
        old.cancel.cancel();
        let mut task = old.task;
        if tokio::time::timeout(self.config.connect_timeout(), &mut task)
            .await
            .is_err()
        {
            warn!("Previous stream session did not stop in time, aborting it");
            task.abort();
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    pub fn subscribe_to_market_data(&self, symbols: &[String]) {
        self.transport.subscribe(symbols);
    }

    pub fn unsubscribe_from_market_data(&self, symbols: &[String]) {
        self.transport.unsubscribe(symbols);
    }

    pub fn subscribed_symbols(&self) -> Vec<String> {
        self.transport.subscribed_symbols()
    }

    pub async fn execute_order(&self, intent: OrderIntent) -> Result<OrderOutcome, ExecutionError> {
        self.engine.execute_order(intent).await
    }

    pub fn get_current_price(&self, symbol: &str) -> Option<Decimal> {
        self.cache.get_current_price(symbol)
    }

    pub fn get_spread(&self, symbol: &str) -> Option<Decimal> {
        self.cache.get_spread(symbol)
    }

    pub fn quote(&self, symbol: &str) -> Option<Quote> {
        self.cache.quote(symbol)
    }

    /// Mean order execution time in ms over the retained samples, 0 if none.
    pub fn average_execution_time(&self) -> f64 {
        self.engine.average_execution_time()
    }

    pub fn recent_outcomes(&self) -> Vec<OrderOutcome> {
        self.engine.recent_outcomes()
    }

    pub fn execution_summary(&self) -> ExecutionSummary {
        self.engine.summary()
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    /// Register a handler for one kind of event.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&BrokerEvent) + Send + Sync + 'static,
    {
        self.events.on(kind, handler)
    }

    /// Remove a handler registered with [`on`](Self::on).
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.events.off(id)
    }

    pub fn broker(&self) -> &BrokerConfig {
        &self.broker
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl Drop for BrokerClient {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel.cancel();
        }
    }
}
