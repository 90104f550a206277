//! Client configuration.

use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::reconnect::ReconnectPolicy;

/// Tunables for the broker client. Durations are stored in milliseconds so
/// the config round-trips through JSON unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Delay before the first reconnect attempt; doubles on each failure
    pub reconnect_base_delay_ms: u64,

    /// Consecutive failed attempts before giving up (`None` retries forever)
    pub max_reconnect_attempts: Option<u32>,

    /// Upper bound on any single reconnect delay
    pub max_reconnect_delay_ms: u64,

    /// Fraction added to (BUY) or taken from (SELL) the reference price for market orders
    pub market_price_buffer: Decimal,

    /// Per-request timeout for REST calls
    pub request_timeout_ms: u64,

    /// Timeout for opening and authenticating the stream
    pub connect_timeout_ms: u64,

    /// Cached quotes older than this fall back to a REST price lookup
    pub quote_max_age_ms: u64,

    /// `recvWindow` sent with signed requests
    pub recv_window_ms: Option<u64>,

    /// Number of recent order outcomes retained
    pub recent_outcomes_capacity: usize,

    /// Samples retained per latency series
    pub latency_window: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay_ms: 1000,
            max_reconnect_attempts: Some(5),
            max_reconnect_delay_ms: 300_000, // 5 min
            market_price_buffer: dec!(0.0001), // 0.01%
            request_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            quote_max_age_ms: 5_000,
            recv_window_ms: Some(5_000),
            recent_outcomes_capacity: 50,
            latency_window: 100,
        }
    }
}

impl ClientConfig {
    /// Always-on variant: never stops reconnecting.
    pub fn always_on() -> Self {
        Self {
            max_reconnect_attempts: None,
            ..Self::default()
        }
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn quote_max_age(&self) -> Duration {
        Duration::from_millis(self.quote_max_age_ms)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            self.reconnect_base_delay(),
            self.max_reconnect_attempts,
            self.max_reconnect_delay(),
        )
    }
}
