//! Broker execution client CLI.
//!
//! Streams live quotes and executes signed orders against a crypto exchange,
//! reporting execution quality and connection health.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use copytrade_broker::models::PRESET_NAMES;
use copytrade_broker::{
    BrokerClient, BrokerConfig, BrokerEvent, ClientConfig, Credentials, EventKind, OrderIntent,
    OrderKind, OrderSide, TimeInForce,
};

/// Real-time broker execution client.
#[derive(Parser)]
#[command(name = "brokerctl")]
#[command(about = "Stream quotes and execute orders against a crypto exchange", long_about = None)]
struct Cli {
    /// Exchange preset (binance, binance_testnet, bybit, okx)
    #[arg(short, long, default_value = "binance_testnet", env = "BROKER_PRESET")]
    broker: String,

    /// Client configuration file (JSON); defaults apply to missing fields
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keep reconnecting forever instead of giving up after max attempts
    #[arg(long)]
    always_on: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available exchange presets
    Brokers,

    /// Show the effective configuration
    Config,

    /// Stream quotes for symbols until Ctrl-C
    Watch {
        /// Symbols to subscribe to, e.g. BTCUSDT ETHUSDT
        #[arg(required = true)]
        symbols: Vec<String>,
    },

    /// Execute a single order
    Order {
        #[arg(short, long)]
        symbol: String,

        /// BUY or SELL
        #[arg(long)]
        side: OrderSide,

        /// MARKET or LIMIT
        #[arg(long = "type", default_value = "MARKET")]
        kind: OrderKind,

        #[arg(short, long)]
        quantity: Decimal,

        /// Limit price, or reference price for a market order
        #[arg(short, long)]
        price: Option<Decimal>,

        /// GTC, IOC or FOK
        #[arg(long)]
        tif: Option<TimeInForce>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Already installed is fine
    let _ = rustls::crypto::ring::default_provider().install_default();

    let broker = BrokerConfig::preset(&cli.broker).with_context(|| {
        format!(
            "Unknown broker preset '{}' (expected one of: {})",
            cli.broker,
            PRESET_NAMES.join(", ")
        )
    })?;
    let mut config = load_config(cli.config.as_ref())?;
    if cli.always_on {
        config.max_reconnect_attempts = None;
    }

    match cli.command {
        Commands::Brokers => {
            println!("\n{:<18} {:<16} {:<8} {}", "PRESET", "NAME", "TESTNET", "REST URL");
            println!("{}", "-".repeat(80));
            for (key, preset) in BrokerConfig::presets() {
                println!(
                    "{:<18} {:<16} {:<8} {}",
                    key, preset.name, preset.testnet, preset.api_url
                );
            }
        }

        Commands::Config => {
            let effective = serde_json::json!({
                "broker": broker,
                "client": config,
            });
            println!("{}", serde_json::to_string_pretty(&effective)?);
        }

        Commands::Watch { symbols } => {
            let client = BrokerClient::new(broker, Credentials::from_env()?, config)?;
            register_printers(&client);

            let symbols: Vec<String> = symbols.iter().map(|s| s.to_uppercase()).collect();
            client.subscribe_to_market_data(&symbols);

            info!(symbols = ?symbols, broker = %client.broker().name, "Starting quote stream");
            if let Err(e) = client.connect().await {
                // The session keeps retrying in the background
                eprintln!("Initial connect failed: {}", e);
            }

            tokio::signal::ctrl_c().await.ok();
            println!("\nStopping...");
            client.disconnect();
            client.metrics().log_report();
        }

        Commands::Order {
            symbol,
            side,
            kind,
            quantity,
            price,
            tif,
        } => {
            let client = BrokerClient::new(broker, Credentials::from_env()?, config)?;
            let intent = OrderIntent {
                symbol: symbol.to_uppercase(),
                side,
                kind,
                quantity,
                price,
                time_in_force: tif,
            };

            info!(
                symbol = %intent.symbol,
                side = %intent.side,
                kind = %intent.kind,
                quantity = %intent.quantity,
                "Submitting order"
            );
            let outcome = client.execute_order(intent).await?;

            println!("\n=== Order Executed ===\n");
            println!("  Order ID:         {}", outcome.order_id);
            println!("  Client Order ID:  {}", outcome.client_order_id);
            println!("  Symbol:           {}", outcome.symbol);
            println!("  Side:             {}", outcome.side);
            println!("  Quantity:         {}", outcome.quantity);
            println!("  Status:           {}", outcome.status);
            println!("  Reference Price:  {}", outcome.reference_price);
            println!("  Fill Price:       {}", outcome.fill_price);
            println!("  Slippage:         {:.4}%", outcome.slippage_percent);
            println!("  Execution Time:   {:.1}ms", outcome.execution_time_ms);

            println!("\n=== Latency ===\n");
            for (name, s) in client.metrics().all_stats() {
                println!(
                    "  {:<16} n={:<4} avg={:.1}ms min={:.1}ms max={:.1}ms p95={:.1}ms",
                    name, s.count, s.avg, s.min, s.max, s.p95
                );
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<ClientConfig> {
    let Some(path) = path else {
        return Ok(ClientConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

fn register_printers(client: &BrokerClient) {
    client.on(EventKind::MarketData, |event| {
        if let BrokerEvent::MarketData(q) = event {
            let spread = q
                .spread_percent()
                .map(|s| format!("{:.4}%", s))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:<12} {:>16} bid {:>16} ask {:>16} spread {}",
                q.symbol, q.price, q.bid, q.ask, spread
            );
        }
    });
    client.on(EventKind::OrderUpdate, |event| {
        if let BrokerEvent::OrderUpdate(u) = event {
            println!(
                "order {} {} {} filled {} @ {}",
                u.order_id, u.symbol, u.status, u.executed_quantity, u.price
            );
        }
    });
    client.on(EventKind::Connected, |_| println!("[connected]"));
    client.on(EventKind::Disconnected, |event| {
        if let BrokerEvent::Disconnected {
            reason,
            reconnecting,
        } = event
        {
            if *reconnecting {
                println!("[disconnected: {}; reconnecting]", reason);
            } else {
                println!("[disconnected: {}; action needed]", reason);
            }
        }
    });
    client.on(EventKind::Reconnecting, |event| {
        if let BrokerEvent::Reconnecting { attempt, delay } = event {
            println!("[reconnect attempt {} in {:?}]", attempt, delay);
        }
    });
    client.on(EventKind::Error, |event| {
        if let BrokerEvent::Error(e) = event {
            println!("[stream error: {}]", e);
        }
    });
}
