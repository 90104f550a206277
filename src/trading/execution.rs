//! Order execution: reference price resolution, pricing, signed submission
//! and execution-quality bookkeeping.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::{ExchangeRestClient, OrderRequest};
use crate::error::ExecutionError;
use crate::events::{BrokerEvent, EventBus};
use crate::metrics::{MetricsRecorder, ORDER_EXECUTION, PRICE_LOOKUP};
use crate::models::{OrderIntent, OrderKind, OrderOutcome, OrderSide, TimeInForce};

use super::config::ClientConfig;
use super::market_data::MarketDataCache;

/// Market order price: reference moved by `buffer` against the taker
/// (up for BUY, down for SELL). Saturates at the `Decimal` bounds.
pub fn execution_price(reference: Decimal, side: OrderSide, buffer: Decimal) -> Decimal {
    let offset = reference.saturating_mul(buffer);
    match side {
        OrderSide::Buy => reference.saturating_add(offset),
        OrderSide::Sell => reference.saturating_sub(offset),
    }
}

/// Absolute deviation of `fill` from `reference`, in percent. Zero for a
/// zero reference; `Decimal::MAX` when the ratio is not representable.
pub fn slippage_percent(fill: Decimal, reference: Decimal) -> Decimal {
    if reference.is_zero() {
        return Decimal::ZERO;
    }
    fill.checked_sub(reference)
        .and_then(|diff| diff.checked_div(reference))
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .map_or(Decimal::MAX, |pct| pct.abs())
}

/// Running execution quality figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionSummary {
    pub orders_executed: u64,
    pub average_execution_time_ms: f64,
    pub total_slippage_percent: Decimal,
    pub average_slippage_percent: Decimal,
}

#[derive(Debug, Default)]
struct Totals {
    orders: u64,
    slippage: Decimal,
}

/// Executes one order per call. Calls are independent and may overlap; none
/// is retried internally.
pub struct ExecutionEngine {
    rest: ExchangeRestClient,
    cache: Arc<MarketDataCache>,
    metrics: Arc<MetricsRecorder>,
    events: EventBus,
    price_buffer: Decimal,
    quote_max_age: Duration,
    recent_capacity: usize,
    recent: Mutex<VecDeque<OrderOutcome>>,
    totals: Mutex<Totals>,
}

impl ExecutionEngine {
    pub fn new(
        rest: ExchangeRestClient,
        cache: Arc<MarketDataCache>,
        metrics: Arc<MetricsRecorder>,
        events: EventBus,
        config: &ClientConfig,
    ) -> Self {
        Self {
            rest,
            cache,
            metrics,
            events,
            price_buffer: config.market_price_buffer,
            quote_max_age: config.quote_max_age(),
            recent_capacity: config.recent_outcomes_capacity.max(1),
            recent: Mutex::new(VecDeque::new()),
            totals: Mutex::new(Totals::default()),
        }
    }

    /// Price, sign, submit and record one order.
    pub async fn execute_order(&self, intent: OrderIntent) -> Result<OrderOutcome, ExecutionError> {
        intent.validate().map_err(ExecutionError::InvalidOrder)?;
        let started = Instant::now();

        let reference = self.reference_price(&intent).await?;
        let price = match intent.kind {
            OrderKind::Market => execution_price(reference, intent.side, self.price_buffer),
            OrderKind::Limit => intent.price.unwrap_or(reference),
        };
        let time_in_force = match intent.kind {
            OrderKind::Limit => Some(intent.time_in_force.unwrap_or(TimeInForce::Gtc)),
            OrderKind::Market => intent.time_in_force,
        };

        let request = OrderRequest {
            symbol: intent.symbol.clone(),
            side: intent.side,
            kind: intent.kind,
            quantity: intent.quantity,
            price: Some(price),
            time_in_force,
            client_order_id: Uuid::new_v4().to_string(),
        };

        let ack = match self.rest.submit_order(&request).await {
            Ok(ack) => ack,
            Err(e) => {
                warn!(
                    symbol = %intent.symbol,
                    side = %intent.side,
                    client_order_id = %request.client_order_id,
                    error = %e,
                    "Order submission failed"
                );
                return Err(e);
            }
        };

        let fill_price = ack.fill_price(price);
        let execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        let outcome = OrderOutcome {
            order_id: ack.order_id,
            client_order_id: ack.client_order_id.unwrap_or(request.client_order_id),
            symbol: intent.symbol,
            side: intent.side,
            quantity: intent.quantity,
            fill_price,
            reference_price: reference,
            status: ack.status,
            execution_time_ms,
            slippage_percent: slippage_percent(fill_price, reference),
            executed_at: Utc::now(),
        };

        self.metrics.record(ORDER_EXECUTION, execution_time_ms);
        self.remember(&outcome);

        info!(
            order_id = %outcome.order_id,
            symbol = %outcome.symbol,
            side = %outcome.side,
            quantity = %outcome.quantity,
            fill_price = %outcome.fill_price,
            status = %outcome.status,
            slippage_pct = %outcome.slippage_percent.round_dp(4),
            execution_ms = format!("{:.1}", execution_time_ms),
            "Order executed"
        );
        self.events.emit(BrokerEvent::OrderExecuted(outcome.clone()));

        Ok(outcome)
    }

    /// Explicit intent price, else a fresh cached quote, else a REST lookup.
    async fn reference_price(&self, intent: &OrderIntent) -> Result<Decimal, ExecutionError> {
        if let Some(price) = intent.price {
            return Ok(price);
        }

        if let Some(price) = self.cache.fresh_price(&intent.symbol, self.quote_max_age) {
            debug!(symbol = %intent.symbol, price = %price, "Using cached reference price");
            return Ok(price);
        }

        let price = self
            .metrics
            .measure(PRICE_LOOKUP, self.rest.ticker_price(&intent.symbol))
            .await?;
        debug!(symbol = %intent.symbol, price = %price, "Fetched reference price");
        Ok(price)
    }

    fn remember(&self, outcome: &OrderOutcome) {
        {
            let mut recent = self.recent.lock();
            recent.push_front(outcome.clone());
            recent.truncate(self.recent_capacity);
        }
        let mut totals = self.totals.lock();
        totals.orders += 1;
        totals.slippage = totals.slippage.saturating_add(outcome.slippage_percent);
    }

    /// Most recent outcomes, newest first.
    pub fn recent_outcomes(&self) -> Vec<OrderOutcome> {
        self.recent.lock().iter().cloned().collect()
    }

    /// Mean of the retained `orderExecution` samples, 0 if none.
    pub fn average_execution_time(&self) -> f64 {
        self.metrics.average(ORDER_EXECUTION)
    }

    pub fn summary(&self) -> ExecutionSummary {
        let (orders, total) = {
            let totals = self.totals.lock();
            (totals.orders, totals.slippage)
        };
        let average = if orders == 0 {
            Decimal::ZERO
        } else {
            total / Decimal::from(orders)
        };

        ExecutionSummary {
            orders_executed: orders,
            average_execution_time_ms: self.average_execution_time(),
            total_slippage_percent: total,
            average_slippage_percent: average,
        }
    }
}
