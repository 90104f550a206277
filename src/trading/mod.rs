//! Trading core: configuration, market data cache, order execution and
//! stream reconnection.

mod config;
mod execution;
mod market_data;
mod reconnect;

pub use config::ClientConfig;
pub use execution::{execution_price, slippage_percent, ExecutionEngine, ExecutionSummary};
pub use market_data::MarketDataCache;
pub use reconnect::{OpenOutcome, ReconnectPolicy, ReconnectSupervisor, StreamSession};
