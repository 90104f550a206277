//! Exponential-backoff reconnection for the streaming channel.
//!
//! [`ReconnectSupervisor`] owns the connect/serve/retry loop for one client
//! session. It is written against [`StreamSession`] so the policy can run
//! without a socket.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::ConnectionError;
use crate::events::{BrokerEvent, EventBus};
use crate::models::{ConnectionState, DisconnectReason};

/// Delay schedule `base * 2^(attempt - 1)`, capped at `max_delay`, with an
/// optional bound on consecutive attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: Option<u32>,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_attempts: Option<u32>, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
            attempt: 0,
        }
    }

    /// Delay before the given 1-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32
            .checked_pow(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Advance to the next attempt and return its delay, or `None` once the
    /// attempt bound is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.can_retry() {
            return None;
        }
        self.attempt += 1;
        Some(self.delay_for(self.attempt))
    }

    pub fn can_retry(&self) -> bool {
        self.max_attempts.map_or(true, |max| self.attempt < max)
    }

    /// Called after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}

/// One open-then-serve cycle of a streaming connection.
#[async_trait]
pub trait StreamSession: Send + Sync + 'static {
    type Connection: Send;

    /// Open and authenticate a connection.
    async fn open(&self) -> Result<Self::Connection, ConnectionError>;

    /// Serve the connection until it drops or `cancel` fires.
    async fn drive(&self, conn: Self::Connection, cancel: &CancellationToken) -> DisconnectReason;
}

/// Outcome of the latest open attempt; `None` until the first attempt ends.
pub type OpenOutcome = Option<Result<(), ConnectionError>>;

/// Drives a [`StreamSession`] through connect, serve and backoff until the
/// policy gives up or the session is cancelled. Nothing is emitted after
/// cancellation.
pub struct ReconnectSupervisor<S: StreamSession> {
    session: Arc<S>,
    policy: ReconnectPolicy,
    events: EventBus,
    state: Arc<RwLock<ConnectionState>>,
    cancel: CancellationToken,
}

impl<S: StreamSession> ReconnectSupervisor<S> {
    pub fn new(
        session: Arc<S>,
        policy: ReconnectPolicy,
        events: EventBus,
        state: Arc<RwLock<ConnectionState>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            policy,
            events,
            state,
            cancel,
        }
    }

    /// Run the session loop. Every open attempt's outcome is published on
    /// `opens`, if given. The state is updated before the outcome is sent.
    pub async fn run(mut self, opens: Option<watch::Sender<OpenOutcome>>) {
        let mut retry = false;

        loop {
            if retry {
                let Some(delay) = self.policy.next_delay() else {
                    let attempts = self.policy.attempt();
                    error!(attempts, "Reconnect attempts exhausted, giving up");
                    self.emit(BrokerEvent::Disconnected {
                        reason: DisconnectReason::ReconnectExhausted { attempts },
                        reconnecting: false,
                    });
                    return;
                };

                let attempt = self.policy.attempt();
                info!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
                self.emit(BrokerEvent::Reconnecting { attempt, delay });

                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            retry = true;

            self.set_state(ConnectionState::Connecting);
            let opened = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    report(&opens, Err(ConnectionError::Cancelled));
                    return;
                }
                result = self.session.open() => result,
            };

            let conn = match opened {
                Ok(conn) => conn,
                Err(err) => {
                    if self.cancel.is_cancelled() {
                        report(&opens, Err(ConnectionError::Cancelled));
                        return;
                    }
                    self.set_state(ConnectionState::Disconnected);
                    warn!(error = %err, attempt = self.policy.attempt(), "Stream connect failed");
                    report(&opens, Err(err.clone()));
                    self.emit(BrokerEvent::Error(err));
                    continue;
                }
            };

            self.policy.reset();
            self.set_state(ConnectionState::Connected);
            report(&opens, Ok(()));
            info!("Stream connected");
            self.emit(BrokerEvent::Connected);

            let reason = self.session.drive(conn, &self.cancel).await;
            if self.cancel.is_cancelled() {
                return;
            }

            self.set_state(ConnectionState::Disconnected);
            let reconnecting = self.policy.can_retry();
            warn!(reason = %reason, reconnecting, "Stream disconnected");
            self.emit(BrokerEvent::Disconnected {
                reason,
                reconnecting,
            });
            if !reconnecting {
                return;
            }
        }
    }

    // Cancellation is checked under the lock so a concurrent disconnect
    // always has the last word on the state.
    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write();
        if !self.cancel.is_cancelled() {
            *state = next;
        }
    }

    fn emit(&self, event: BrokerEvent) {
        if !self.cancel.is_cancelled() {
            self.events.emit(event);
        }
    }
}

fn report(opens: &Option<watch::Sender<OpenOutcome>>, result: Result<(), ConnectionError>) {
    if let Some(tx) = opens {
        tx.send_replace(Some(result));
    }
}
