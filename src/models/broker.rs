//! Exchange endpoint configuration and API credentials.

use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Endpoints of one exchange deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Human-readable exchange name
    pub name: String,

    /// REST base URL (order submission, ticker lookups)
    pub api_url: String,

    /// Streaming websocket URL
    pub ws_url: String,

    /// Whether this deployment is a testnet
    #[serde(default)]
    pub testnet: bool,
}

/// Preset keys accepted by [`BrokerConfig::preset`].
pub const PRESET_NAMES: [&str; 4] = ["binance", "binance_testnet", "bybit", "okx"];

impl BrokerConfig {
    pub fn new(name: &str, api_url: &str, ws_url: &str, testnet: bool) -> Self {
        Self {
            name: name.to_string(),
            api_url: api_url.trim_end_matches('/').to_string(),
            ws_url: ws_url.to_string(),
            testnet,
        }
    }

    pub fn binance() -> Self {
        Self::new(
            "Binance",
            "https://api.binance.com/api/v3",
            "wss://stream.binance.com:9443/ws",
            false,
        )
    }

    pub fn binance_testnet() -> Self {
        Self::new(
            "Binance Testnet",
            "https://testnet.binance.vision/api/v3",
            "wss://testnet.binance.vision/ws",
            true,
        )
    }

    pub fn bybit() -> Self {
        Self::new(
            "Bybit",
            "https://api.bybit.com/v5",
            "wss://stream.bybit.com/v5/public/linear",
            false,
        )
    }

    pub fn okx() -> Self {
        Self::new(
            "OKX",
            "https://www.okx.com/api/v5",
            "wss://ws.okx.com:8443/ws/v5/public",
            false,
        )
    }

    /// Look up a preset by key (case-insensitive, `-` and `_` interchangeable).
    pub fn preset(key: &str) -> Option<Self> {
        match key.to_lowercase().replace('-', "_").as_str() {
            "binance" => Some(Self::binance()),
            "binance_testnet" | "testnet" => Some(Self::binance_testnet()),
            "bybit" => Some(Self::bybit()),
            "okx" => Some(Self::okx()),
            _ => None,
        }
    }

    /// All presets keyed by their lookup name.
    pub fn presets() -> Vec<(&'static str, Self)> {
        PRESET_NAMES
            .iter()
            .filter_map(|key| Self::preset(key).map(|config| (*key, config)))
            .collect()
    }
}

/// API key pair owned by a single client instance.
///
/// The secret is only ever read by the signer. `Debug` redacts both values so
/// credentials cannot leak through logging.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Create from environment variables:
    /// - BROKER_API_KEY
    /// - BROKER_API_SECRET
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("BROKER_API_KEY").context("BROKER_API_KEY not set")?;
        let api_secret =
            std::env::var("BROKER_API_SECRET").context("BROKER_API_SECRET not set")?;
        Ok(Self::new(api_key, api_secret))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub(crate) fn api_secret(&self) -> &str {
        &self.api_secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible: String = self.api_key.chars().take(4).collect();
        f.debug_struct("Credentials")
            .field("api_key", &format!("{visible}***"))
            .field("api_secret", &"<redacted>")
            .finish()
    }
}
