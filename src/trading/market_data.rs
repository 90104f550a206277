//! Latest-quote cache fed by the streaming channel.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::time::Instant;

use crate::models::Quote;

#[derive(Debug, Clone)]
struct CachedQuote {
    quote: Quote,
    received_at: Instant,
}

/// One quote per symbol; every write replaces the previous value.
#[derive(Debug, Default)]
pub struct MarketDataCache {
    quotes: RwLock<HashMap<String, CachedQuote>>,
}

impl MarketDataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a ticker update. Called in arrival order by the stream task.
    pub fn update(&self, quote: Quote) {
        let entry = CachedQuote {
            quote,
            received_at: Instant::now(),
        };
        self.quotes.write().insert(entry.quote.symbol.clone(), entry);
    }

    pub fn quote(&self, symbol: &str) -> Option<Quote> {
        self.quotes.read().get(symbol).map(|c| c.quote.clone())
    }

    pub fn get_current_price(&self, symbol: &str) -> Option<Decimal> {
        self.quotes.read().get(symbol).map(|c| c.quote.price)
    }

    /// `(ask - bid) / price * 100`; `None` if unknown or the price is zero.
    pub fn get_spread(&self, symbol: &str) -> Option<Decimal> {
        self.quotes
            .read()
            .get(symbol)
            .and_then(|c| c.quote.spread_percent())
    }

    /// Cached price received no longer than `max_age` ago.
    pub fn fresh_price(&self, symbol: &str, max_age: Duration) -> Option<Decimal> {
        let quotes = self.quotes.read();
        let cached = quotes.get(symbol)?;
        if cached.received_at.elapsed() > max_age || cached.quote.price <= Decimal::ZERO {
            return None;
        }
        Some(cached.quote.price)
    }

    /// Symbols with a cached quote, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.quotes.read().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn len(&self) -> usize {
        self.quotes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.read().is_empty()
    }
}
