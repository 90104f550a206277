//! Real-time broker execution client for copy trading.
//!
//! Maintains an authenticated market-data/execution stream to a crypto
//! exchange, executes signed orders over REST, tracks execution quality and
//! reconnects with exponential backoff.

pub mod api;
pub mod client;
pub mod error;
pub mod events;
pub mod metrics;
pub mod models;
pub mod trading;

#[cfg(test)]
mod testing;

pub use client::BrokerClient;
pub use error::{ConnectionError, ExecutionError, ExecutionFailure, SignerError};
pub use events::{BrokerEvent, EventBus, EventKind, SubscriptionId};
pub use metrics::{LatencyStats, MetricsRecorder};
pub use models::{
    BrokerConfig, ConnectionState, Credentials, DisconnectReason, OrderIntent, OrderKind,
    OrderOutcome, OrderSide, OrderStatus, OrderUpdate, Quote, TimeInForce,
};
pub use trading::{ClientConfig, ExecutionSummary};
