//! Exchange REST client: reference price lookups and signed order submission.
//!
//! This is the request/response half of the client. It never retries: every
//! failure is mapped to an [`ExecutionError`] and surfaced to the caller.

use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Response, Url};
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::ExecutionError;
use crate::models::{OrderKind, OrderSide, TimeInForce};

use super::signer::Signer;
use super::types::{ExchangeErrorBody, OrderAck, TickerPriceResponse};

const API_KEY_HEADER: &str = "x-mbx-apikey";

/// Fully priced order ready to sign and submit.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
    pub client_order_id: String,
}

impl OrderRequest {
    /// Url-encoded parameter string covered by the signature.
    pub fn query(&self, recv_window_ms: Option<u64>, timestamp_ms: i64) -> String {
        let mut params: Vec<(&str, String)> = vec![
            ("symbol", self.symbol.clone()),
            ("side", self.side.as_str().to_string()),
            ("type", self.kind.as_str().to_string()),
            ("quantity", self.quantity.normalize().to_string()),
        ];
        if let Some(price) = self.price {
            params.push(("price", price.normalize().to_string()));
        }
        if let Some(tif) = self.time_in_force {
            params.push(("timeInForce", tif.as_str().to_string()));
        }
        params.push(("newClientOrderId", self.client_order_id.clone()));
        if let Some(window) = recv_window_ms {
            params.push(("recvWindow", window.to_string()));
        }
        params.push(("timestamp", timestamp_ms.to_string()));

        encode_params(&params)
    }
}

/// REST client for one exchange deployment and key pair.
pub struct ExchangeRestClient {
    http: Client,
    base_url: String,
    signer: Signer,
    timeout: Duration,
    recv_window_ms: Option<u64>,
}

impl ExchangeRestClient {
    /// Create a client with a bounded per-request timeout. The API key is
    /// sent as a default header on every request and must be a valid header
    /// value.
    pub fn new(
        base_url: &str,
        api_key: &str,
        signer: Signer,
        timeout: Duration,
        recv_window_ms: Option<u64>,
    ) -> anyhow::Result<Self> {
        let mut key = HeaderValue::from_str(api_key).context("API key is not a valid header value")?;
        key.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static(API_KEY_HEADER), key);

        let http = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            signer,
            timeout,
            recv_window_ms,
        })
    }

    /// Latest traded price for a symbol.
    pub async fn ticker_price(&self, symbol: &str) -> Result<Decimal, ExecutionError> {
        let url = format!("{}/ticker/price", self.base_url);
        debug!(url = %url, symbol = %symbol, "Fetching reference price");

        let no_price = |detail: String| ExecutionError::NoPriceData {
            symbol: symbol.to_string(),
            detail,
        };

        let resp = self
            .http
            .get(&url)
            .query(&[("symbol", symbol)])
            .send()
            .await
            .map_err(|e| self.map_send_error(e, |m| no_price(m)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(no_price(format!("{} - {}", status, text)));
        }

        let ticker: TickerPriceResponse = resp
            .json()
            .await
            .map_err(|e| no_price(format!("failed to parse ticker: {}", e)))?;

        if ticker.price <= Decimal::ZERO {
            return Err(no_price(format!("exchange returned price {}", ticker.price)));
        }
        Ok(ticker.price)
    }

    /// Sign and submit an order.
    pub async fn submit_order(&self, order: &OrderRequest) -> Result<OrderAck, ExecutionError> {
        let timestamp = Utc::now().timestamp_millis();
        let mut body = order.query(self.recv_window_ms, timestamp);
        let signature = self.signer.sign(&body);
        body.push_str("&signature=");
        body.push_str(&signature);

        let url = format!("{}/order", self.base_url);
        debug!(
            url = %url,
            symbol = %order.symbol,
            side = %order.side,
            client_order_id = %order.client_order_id,
            "Submitting order"
        );

        let resp = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e, ExecutionError::transport))?;

        if !resp.status().is_success() {
            return Err(rejection(resp).await);
        }

        resp.json()
            .await
            .map_err(|e| ExecutionError::transport(format!("failed to parse order response: {}", e)))
    }

    fn map_send_error(
        &self,
        err: reqwest::Error,
        otherwise: impl FnOnce(String) -> ExecutionError,
    ) -> ExecutionError {
        if err.is_timeout() {
            ExecutionError::Timeout(self.timeout)
        } else {
            otherwise(err.to_string())
        }
    }
}

/// Convert a non-2xx submission response, keeping the exchange's message.
async fn rejection(resp: Response) -> ExecutionError {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();

    match serde_json::from_str::<ExchangeErrorBody>(&text) {
        Ok(body) => ExecutionError::SubmissionFailed {
            status: Some(status.as_u16()),
            code: Some(body.code),
            message: body.msg,
        },
        Err(_) => ExecutionError::SubmissionFailed {
            status: Some(status.as_u16()),
            code: None,
            message: if text.is_empty() {
                status.canonical_reason().unwrap_or("request rejected").to_string()
            } else {
                text
            },
        },
    }
}

/// Form-encode parameters in the given order.
fn encode_params(params: &[(&str, String)]) -> String {
    match Url::parse_with_params("http://localhost/", params) {
        Ok(url) => url.query().unwrap_or_default().to_string(),
        Err(_) => params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base: &str) -> ExchangeRestClient {
        ExchangeRestClient::new(
            base,
            "test-key",
            Signer::new("test-secret").unwrap(),
            Duration::from_millis(500),
            Some(5000),
        )
        .unwrap()
    }

    fn limit_request() -> OrderRequest {
        OrderRequest {
            symbol: "ETHUSDT".to_string(),
            side: OrderSide::Sell,
            kind: OrderKind::Limit,
            quantity: dec!(1.500),
            price: Some(dec!(2500.10)),
            time_in_force: Some(TimeInForce::Ioc),
            client_order_id: "cid-1".to_string(),
        }
    }

    #[test]
    fn test_invalid_api_key_rejected_at_construction() {
        let result = ExchangeRestClient::new(
            "http://127.0.0.1:9",
            "key\nwith-newline",
            Signer::new("test-secret").unwrap(),
            Duration::from_millis(500),
            None,
        );
        let err = result.err().unwrap();
        assert_eq!(err.to_string(), "API key is not a valid header value");
    }

    #[test]
    fn test_query_order_and_formatting() {
        let query = limit_request().query(Some(5000), 1_700_000_000_000);
        assert_eq!(
            query,
            "symbol=ETHUSDT&side=SELL&type=LIMIT&quantity=1.5&price=2500.1&timeInForce=IOC\
             &newClientOrderId=cid-1&recvWindow=5000&timestamp=1700000000000"
        );
    }

    #[tokio::test]
    async fn test_ticker_price() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ticker/price"))
            .and(query_param("symbol", "BTCUSDT"))
            .and(header("x-mbx-apikey", "test-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"symbol":"BTCUSDT","price":"45000.00"})),
            )
            .mount(&server)
            .await;

        let price = client(&server.uri()).ticker_price("BTCUSDT").await.unwrap();
        assert_eq!(price, dec!(45000));
    }

    #[tokio::test]
    async fn test_ticker_price_failure_is_no_price_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ticker/price"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid symbol"))
            .mount(&server)
            .await;

        let err = client(&server.uri()).ticker_price("NOPE").await.unwrap_err();
        assert!(matches!(err, ExecutionError::NoPriceData { ref symbol, .. } if symbol == "NOPE"));
    }

    #[tokio::test]
    async fn test_submit_order_signs_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/order"))
            .and(header("x-mbx-apikey", "test-key"))
            .and(body_string_contains("symbol=ETHUSDT&side=SELL&type=LIMIT"))
            .and(body_string_contains("&signature="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "orderId": 991, "clientOrderId": "cid-1", "price": "2500.10", "status": "NEW"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ack = client(&server.uri()).submit_order(&limit_request()).await.unwrap();
        assert_eq!(ack.order_id, "991");
        assert_eq!(ack.price, dec!(2500.10));

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8(requests[0].body.clone()).unwrap();
        let (signed, signature) = body.rsplit_once("&signature=").unwrap();
        assert_eq!(signature, Signer::new("test-secret").unwrap().sign(signed));
    }

    #[tokio::test]
    async fn test_submit_order_rejection_keeps_exchange_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/order"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "code": -2010, "msg": "Account has insufficient balance for requested action."
            })))
            .mount(&server)
            .await;

        let err = client(&server.uri()).submit_order(&limit_request()).await.unwrap_err();
        assert_eq!(
            err,
            ExecutionError::SubmissionFailed {
                status: Some(400),
                code: Some(-2010),
                message: "Account has insufficient balance for requested action.".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_submit_order_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/order"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let err = client(&server.uri()).submit_order(&limit_request()).await.unwrap_err();
        assert_eq!(err, ExecutionError::Timeout(Duration::from_millis(500)));
    }
}
