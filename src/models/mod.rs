//! Data models for exchange endpoints, quotes, orders and connection state.

mod broker;
mod connection;
mod order;
mod quote;

pub use broker::{BrokerConfig, Credentials, PRESET_NAMES};
pub use connection::{ConnectionState, DisconnectReason};
pub use order::{
    OrderIntent, OrderKind, OrderOutcome, OrderSide, OrderStatus, OrderUpdate, TimeInForce,
};
pub use quote::Quote;
