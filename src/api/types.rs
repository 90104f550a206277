//! Wire types for the exchange REST API and streaming channel.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::models::{OrderStatus, OrderUpdate, Quote};

/// Response from the `/ticker/price` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerPriceResponse {
    #[serde(default)]
    pub symbol: String,
    pub price: Decimal,
}

/// One partial fill inside an order acknowledgement.
#[derive(Debug, Clone, Deserialize)]
pub struct FillResponse {
    pub price: Decimal,
    #[serde(rename = "qty")]
    pub quantity: Decimal,
}

/// Order acknowledgement from `POST /order`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    #[serde(deserialize_with = "string_or_number")]
    pub order_id: String,
    #[serde(default)]
    pub client_order_id: Option<String>,
    #[serde(default)]
    pub price: Decimal,
    pub status: OrderStatus,
    #[serde(default)]
    pub executed_qty: Decimal,
    #[serde(default)]
    pub cummulative_quote_qty: Decimal,
    #[serde(default)]
    pub fills: Vec<FillResponse>,
}

impl OrderAck {
    /// Best available fill price: the reported price, else the weighted fill
    /// average, else quote/base executed amounts, else `fallback`.
    pub fn fill_price(&self, fallback: Decimal) -> Decimal {
        if self.price > Decimal::ZERO {
            return self.price;
        }

        if let Some(average) = self.weighted_fill_average() {
            return average;
        }

        if self.executed_qty > Decimal::ZERO && self.cummulative_quote_qty > Decimal::ZERO {
            if let Some(average) = self.cummulative_quote_qty.checked_div(self.executed_qty) {
                return average;
            }
        }

        fallback
    }

    /// `None` when there are no fills or the sums overflow.
    fn weighted_fill_average(&self) -> Option<Decimal> {
        let (filled, notional) = self.fills.iter().try_fold(
            (Decimal::ZERO, Decimal::ZERO),
            |(filled, notional), fill| {
                let value = fill.price.checked_mul(fill.quantity)?;
                Some((filled.checked_add(fill.quantity)?, notional.checked_add(value)?))
            },
        )?;
        if filled > Decimal::ZERO {
            notional.checked_div(filled)
        } else {
            None
        }
    }
}

/// Error body returned with non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeErrorBody {
    pub code: i64,
    pub msg: String,
}

/// Outbound request frame on the streaming channel.
#[derive(Debug, Clone, Serialize)]
pub struct StreamRequest<P: Serialize> {
    pub method: &'static str,
    pub params: P,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

/// Parameters of the auth frame.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthParams {
    pub api_key: String,
    pub timestamp: i64,
    pub signature: String,
}

impl StreamRequest<AuthParams> {
    pub fn auth(api_key: &str, timestamp: i64, signature: String) -> Self {
        Self {
            method: "auth",
            params: AuthParams {
                api_key: api_key.to_string(),
                timestamp,
                signature,
            },
            id: None,
        }
    }
}

impl StreamRequest<Vec<String>> {
    pub fn subscribe<'a>(symbols: impl IntoIterator<Item = &'a String>, id: u64) -> Self {
        Self {
            method: "subscribe",
            params: ticker_streams(symbols),
            id: Some(id),
        }
    }

    pub fn unsubscribe<'a>(symbols: impl IntoIterator<Item = &'a String>, id: u64) -> Self {
        Self {
            method: "unsubscribe",
            params: ticker_streams(symbols),
            id: Some(id),
        }
    }
}

/// Stream names for the 24h ticker of each symbol, e.g. `btcusdt@ticker`.
fn ticker_streams<'a>(symbols: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    symbols
        .into_iter()
        .map(|s| format!("{}@ticker", s.to_lowercase()))
        .collect()
}

/// 24h ticker event (`e = "24hrTicker"`).
#[derive(Debug, Clone, Deserialize)]
pub struct TickerFrame {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c")]
    pub last_price: Decimal,
    #[serde(rename = "b")]
    pub best_bid: Decimal,
    #[serde(rename = "a")]
    pub best_ask: Decimal,
    #[serde(rename = "v")]
    pub volume: Decimal,
}

impl From<TickerFrame> for Quote {
    fn from(frame: TickerFrame) -> Self {
        Quote {
            symbol: frame.symbol,
            price: frame.last_price,
            bid: frame.best_bid,
            ask: frame.best_ask,
            volume: frame.volume,
            timestamp: Quote::timestamp_from_millis(frame.event_time),
        }
    }
}

/// Execution report event (`e = "executionReport"`).
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionReportFrame {
    #[serde(rename = "i", deserialize_with = "string_or_number")]
    pub order_id: String,
    #[serde(rename = "s", default)]
    pub symbol: String,
    #[serde(rename = "X")]
    pub status: OrderStatus,
    #[serde(rename = "z")]
    pub executed_quantity: Decimal,
    #[serde(rename = "p")]
    pub price: Decimal,
}

impl From<ExecutionReportFrame> for OrderUpdate {
    fn from(frame: ExecutionReportFrame) -> Self {
        OrderUpdate {
            order_id: frame.order_id,
            symbol: frame.symbol,
            status: frame.status,
            executed_quantity: frame.executed_quantity,
            price: frame.price,
        }
    }
}

/// Decoded inbound stream message.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    Ticker(Quote),
    ExecutionReport(OrderUpdate),
    /// Response to a request frame (`{"result": .., "id": ..}`)
    Ack(Value),
    /// The auth frame was accepted (`{"type": "auth_success"}`)
    Authenticated,
    /// Error reply. `id` is the rejected request; `None` for the auth frame,
    /// which carries no id, and for `{"type": "auth_error"}`.
    Rejected {
        id: Option<u64>,
        code: i64,
        msg: String,
    },
    /// Well-formed JSON with an unrecognised event type
    Other(String),
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: i64,
    #[serde(default, alias = "message")]
    msg: String,
}

impl ErrorDetail {
    fn from_value(detail: Value) -> Self {
        match detail {
            Value::String(msg) => Self { code: 0, msg },
            Value::Object(_) => serde_json::from_value(detail).unwrap_or_default(),
            Value::Null => Self::default(),
            other => Self {
                code: 0,
                msg: other.to_string(),
            },
        }
    }

    fn into_frame(self, id: Option<u64>) -> InboundFrame {
        InboundFrame::Rejected {
            id,
            code: self.code,
            msg: self.msg,
        }
    }
}

/// Decode a text frame, unwrapping combined-stream envelopes
/// (`{"stream": .., "data": {..}}`).
pub fn parse_inbound(text: &str) -> Result<InboundFrame, serde_json::Error> {
    let mut value: Value = serde_json::from_str(text)?;

    if value.get("stream").is_some() {
        if let Some(data) = value.get_mut("data").map(Value::take) {
            value = data;
        }
    }

    let kind = value.get("e").and_then(Value::as_str).map(str::to_owned);
    match kind.as_deref() {
        Some("24hrTicker") => {
            let frame: TickerFrame = serde_json::from_value(value)?;
            Ok(InboundFrame::Ticker(frame.into()))
        }
        Some("executionReport") => {
            let frame: ExecutionReportFrame = serde_json::from_value(value)?;
            Ok(InboundFrame::ExecutionReport(frame.into()))
        }
        Some(other) => Ok(InboundFrame::Other(other.to_string())),
        None => Ok(parse_reply(value)),
    }
}

fn parse_reply(mut value: Value) -> InboundFrame {
    let id = value.get("id").and_then(Value::as_u64);
    if let Some(error) = value.get_mut("error").map(Value::take) {
        if !error.is_null() {
            return ErrorDetail::from_value(error).into_frame(id);
        }
    }

    let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);
    match kind.as_deref() {
        Some("auth_success") => InboundFrame::Authenticated,
        Some("auth_error") | Some("error") => {
            let detail = value.get_mut("data").map(Value::take).unwrap_or(value);
            ErrorDetail::from_value(detail).into_frame(None)
        }
        Some(other) => InboundFrame::Other(other.to_string()),
        None if value.get("result").is_some() || value.get("id").is_some() => {
            InboundFrame::Ack(value)
        }
        None => InboundFrame::Other(String::new()),
    }
}

/// Accept ids sent either as JSON strings or numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const TICKER: &str = r#"{"e":"24hrTicker","E":1700000000000,"s":"BTCUSDT","p":"100.0","c":"45000.10","b":"44999.90","a":"45000.20","v":"1234.5","q":"555"}"#;

    #[test]
    fn test_parse_ticker() {
        match parse_inbound(TICKER).unwrap() {
            InboundFrame::Ticker(q) => {
                assert_eq!(q.symbol, "BTCUSDT");
                assert_eq!(q.price, dec!(45000.10));
                assert_eq!(q.bid, dec!(44999.90));
                assert_eq!(q.ask, dec!(45000.20));
                assert_eq!(q.volume, dec!(1234.5));
                assert_eq!(q.timestamp.timestamp_millis(), 1_700_000_000_000);
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_parse_combined_stream_envelope() {
        let wrapped = format!(r#"{{"stream":"btcusdt@ticker","data":{}}}"#, TICKER);
        assert!(matches!(parse_inbound(&wrapped).unwrap(), InboundFrame::Ticker(_)));
    }

    #[test]
    fn test_parse_execution_report() {
        let text = r#"{"e":"executionReport","E":1,"s":"ETHUSDT","i":4293153,"X":"PARTIALLY_FILLED","z":"0.50","p":"2500.00","S":"BUY"}"#;
        match parse_inbound(text).unwrap() {
            InboundFrame::ExecutionReport(u) => {
                assert_eq!(u.order_id, "4293153");
                assert_eq!(u.symbol, "ETHUSDT");
                assert_eq!(u.status, OrderStatus::PartiallyFilled);
                assert_eq!(u.executed_quantity, dec!(0.5));
                assert_eq!(u.price, dec!(2500));
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_parse_ack_and_unknown() {
        assert!(matches!(
            parse_inbound(r#"{"result":null,"id":1}"#).unwrap(),
            InboundFrame::Ack(_)
        ));
        assert!(matches!(
            parse_inbound(r#"{"e":"kline","s":"BTCUSDT"}"#).unwrap(),
            InboundFrame::Other(kind) if kind == "kline"
        ));
    }

    #[test]
    fn test_parse_error_replies() {
        match parse_inbound(r#"{"id":3,"error":{"code":-1121,"msg":"Invalid symbol."}}"#).unwrap() {
            InboundFrame::Rejected { id, code, msg } => {
                assert_eq!(id, Some(3));
                assert_eq!(code, -1121);
                assert_eq!(msg, "Invalid symbol.");
            }
            other => panic!("unexpected frame {:?}", other),
        }

        // Reply to the auth frame, which is sent without an id
        assert!(matches!(
            parse_inbound(r#"{"id":null,"error":{"code":-2015,"msg":"Invalid API-key, IP, or permissions for action."}}"#).unwrap(),
            InboundFrame::Rejected { id: None, code: -2015, .. }
        ));

        match parse_inbound(r#"{"type":"auth_error","data":{"message":"bad signature"}}"#).unwrap() {
            InboundFrame::Rejected { id, code, msg } => {
                assert_eq!(id, None);
                assert_eq!(code, 0);
                assert_eq!(msg, "bad signature");
            }
            other => panic!("unexpected frame {:?}", other),
        }
        assert!(matches!(
            parse_inbound(r#"{"type":"error","data":"rate limited"}"#).unwrap(),
            InboundFrame::Rejected { msg, .. } if msg == "rate limited"
        ));
        assert!(matches!(
            parse_inbound(r#"{"type":"auth_success","data":{}}"#).unwrap(),
            InboundFrame::Authenticated
        ));
        // A null error is a plain ack
        assert!(matches!(
            parse_inbound(r#"{"result":null,"id":4,"error":null}"#).unwrap(),
            InboundFrame::Ack(_)
        ));
    }

    #[test]
    fn test_parse_malformed() {
        assert!(parse_inbound("not json").is_err());
        // Known event type with missing fields is malformed too
        assert!(parse_inbound(r#"{"e":"24hrTicker","s":"BTCUSDT"}"#).is_err());
    }

    #[test]
    fn test_outbound_frames() {
        let auth = StreamRequest::auth("key", 42, "sig".to_string());
        let json = serde_json::to_value(&auth).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"method":"auth","params":{"apiKey":"key","timestamp":42,"signature":"sig"}})
        );

        let symbols = vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()];
        let sub = serde_json::to_value(StreamRequest::subscribe(&symbols, 7)).unwrap();
        assert_eq!(sub["method"], "subscribe");
        assert_eq!(sub["params"], serde_json::json!(["btcusdt@ticker", "ethusdt@ticker"]));
        assert_eq!(sub["id"], 7);
    }

    #[test]
    fn test_ack_fill_price_resolution() {
        let ack: OrderAck = serde_json::from_str(
            r#"{"orderId":12,"price":"0.00000000","status":"FILLED","executedQty":"2","cummulativeQuoteQty":"201",
                "fills":[{"price":"100","qty":"1"},{"price":"101","qty":"1"}]}"#,
        )
        .unwrap();
        assert_eq!(ack.order_id, "12");
        assert_eq!(ack.fill_price(dec!(1)), dec!(100.5));

        let ack: OrderAck = serde_json::from_str(
            r#"{"orderId":"abc","price":"0","status":"FILLED","executedQty":"4","cummulativeQuoteQty":"10"}"#,
        )
        .unwrap();
        assert_eq!(ack.fill_price(dec!(1)), dec!(2.5));

        let ack: OrderAck =
            serde_json::from_str(r#"{"orderId":"abc","status":"NEW"}"#).unwrap();
        assert_eq!(ack.fill_price(dec!(99)), dec!(99));

        let ack: OrderAck =
            serde_json::from_str(r#"{"orderId":"abc","price":45004.5,"status":"NEW"}"#).unwrap();
        assert_eq!(ack.fill_price(dec!(1)), dec!(45004.5));
    }

    #[test]
    fn test_ack_fill_price_survives_overflow() {
        // Notional overflows; falls through to the executed amounts
        let ack = OrderAck {
            order_id: "1".to_string(),
            client_order_id: None,
            price: Decimal::ZERO,
            status: OrderStatus::Filled,
            executed_qty: dec!(2),
            cummulative_quote_qty: dec!(10),
            fills: vec![FillResponse {
                price: Decimal::MAX,
                quantity: dec!(2),
            }],
        };
        assert_eq!(ack.fill_price(dec!(7)), dec!(5));

        // Quote amount over a tiny executed quantity overflows too
        let ack = OrderAck {
            fills: Vec::new(),
            executed_qty: dec!(0.0000001),
            cummulative_quote_qty: Decimal::MAX,
            ..ack
        };
        assert_eq!(ack.fill_price(dec!(7)), dec!(7));
    }
}
