//! Market data tick: the latest quote for one symbol.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Latest 24h ticker snapshot for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Exchange symbol, e.g. "BTCUSDT"
    pub symbol: String,

    /// Last traded price
    pub price: Decimal,

    /// Best bid
    pub bid: Decimal,

    /// Best ask
    pub ask: Decimal,

    /// Rolling 24h base volume
    pub volume: Decimal,

    /// Exchange event time
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Bid/ask spread as a percentage of the last price.
    ///
    /// Returns `None` when the last price is zero.
    pub fn spread_percent(&self) -> Option<Decimal> {
        if self.price.is_zero() {
            return None;
        }
        Some((self.ask - self.bid) / self.price * Decimal::ONE_HUNDRED)
    }

    /// Convert an exchange event time in epoch milliseconds.
    pub fn timestamp_from_millis(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
    }
}
