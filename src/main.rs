// src/main.rs
use crate::config::{AppConfig, Credentials};
use crate::connectors::broker::SpotBroker;
use crate::connectors::okx::OkxRestClient;
use crate::connectors::traits::{ExchangeApi, FallbackExecutor};
use crate::core::engine::TradingEngine;
use crate::storage::PositionStore;
use dotenvy::dotenv;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod config;
mod connectors;
mod core;
mod storage;
mod types;
mod utils;

/// Лог в stdout и в файл одновременно, как привыкли операторы бота.
/// Guard держит фоновый writer файла живым до конца main.
fn init_logging(log_file: &str) -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::never(".", log_file);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("moonbot=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // 1. Load Configuration
    let config = AppConfig::new()?;
    let _log_guard = init_logging(&config.log_file);
    let credentials = Credentials::from_env()?;

    println!("========================================");
    println!("            MOONBOT - v0.1.0");
    println!("========================================");
    println!("Pair:   {}", config.pair_inst);
    println!(
        "Mode:   {}",
        if config.dry_run {
            "📝 DRY RUN"
        } else {
            "🚨 LIVE TRADING"
        }
    );
    println!("========================================");

    // 2. Initialize Components
    let exchange: Arc<dyn ExchangeApi> = Arc::new(OkxRestClient::new(&credentials, &config)?);
    let fallback: Arc<dyn FallbackExecutor> =
        Arc::new(SpotBroker::connect(&credentials, &config).await?);
    let store = PositionStore::new(&config.state_file);

    // 3. Run Engine
    let mut engine = TradingEngine::new(config, exchange, fallback, store);

    tokio::select! {
        result = engine.run() => {
            if let Err(e) = result {
                error!("Fatal engine error: {e:#}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted by user. Exiting.");
        }
    }

    Ok(())
}
