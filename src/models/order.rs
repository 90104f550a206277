//! Order intents submitted by callers and the outcomes reported back.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderKind {
    /// Fill at the prevailing price
    Market,
    /// Fill at the given price or better
    Limit,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Market => "MARKET",
            OrderKind::Limit => "LIMIT",
        }
    }
}

/// Order lifetime policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// Good-till-cancel
    Gtc,
    /// Immediate-or-cancel
    Ioc,
    /// Fill-or-kill
    Fok,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::Fok => "FOK",
        }
    }
}

macro_rules! impl_parse_display {
    ($ty:ty, $what:literal, [$($text:literal => $variant:expr),+ $(,)?]) => {
        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_uppercase().as_str() {
                    $($text => Ok($variant),)+
                    other => Err(format!("unknown {}: {}", $what, other)),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

impl_parse_display!(OrderSide, "order side", ["BUY" => OrderSide::Buy, "SELL" => OrderSide::Sell]);
impl_parse_display!(OrderKind, "order type", ["MARKET" => OrderKind::Market, "LIMIT" => OrderKind::Limit]);
impl_parse_display!(TimeInForce, "time in force", [
    "GTC" => TimeInForce::Gtc,
    "IOC" => TimeInForce::Ioc,
    "FOK" => TimeInForce::Fok,
]);

/// What the caller wants executed. Consumed by a single `execute_order` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub kind: OrderKind,
    pub quantity: Decimal,
    /// Limit price, or an explicit reference price for market orders
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub time_in_force: Option<TimeInForce>,
}

impl OrderIntent {
    pub fn market(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            kind: OrderKind::Market,
            quantity,
            price: None,
            time_in_force: None,
        }
    }

    pub fn limit(symbol: &str, side: OrderSide, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            kind: OrderKind::Limit,
            quantity,
            price: Some(price),
            time_in_force: Some(TimeInForce::Gtc),
        }
    }

    pub fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = Some(tif);
        self
    }

    /// Check the intent is submittable, returning a description of the first problem.
    pub fn validate(&self) -> Result<(), String> {
        if self.symbol.trim().is_empty() {
            return Err("symbol is empty".to_string());
        }
        if self.quantity <= Decimal::ZERO {
            return Err(format!("quantity must be positive, got {}", self.quantity));
        }
        match (self.kind, self.price) {
            (OrderKind::Limit, None) => Err("limit order requires a price".to_string()),
            (_, Some(price)) if price <= Decimal::ZERO => {
                Err(format!("price must be positive, got {}", price))
            }
            _ => Ok(()),
        }
    }
}

/// Exchange-reported order state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[serde(alias = "PENDING_NEW")]
    New,
    Filled,
    PartiallyFilled,
    #[serde(
        alias = "CANCELED",
        alias = "PENDING_CANCEL",
        alias = "REJECTED",
        alias = "EXPIRED",
        alias = "EXPIRED_IN_MATCH"
    )]
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Filled => "FILLED",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful `execute_order` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderOutcome {
    /// Exchange order id
    pub order_id: String,

    /// Client order id sent with the submission
    pub client_order_id: String,

    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,

    /// Price the exchange reports the order filled (or rests) at
    pub fill_price: Decimal,

    /// Price the deviation is measured against
    pub reference_price: Decimal,

    pub status: OrderStatus,

    /// Wall-clock time from price resolution to exchange acknowledgement
    pub execution_time_ms: f64,

    /// abs(fill - reference) / reference * 100, never negative
    pub slippage_percent: Decimal,

    pub executed_at: DateTime<Utc>,
}

/// Execution report pushed over the streaming channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_id: String,
    pub symbol: String,
    pub status: OrderStatus,
    /// Cumulative filled quantity
    pub executed_quantity: Decimal,
    pub price: Decimal,
}
