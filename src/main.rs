// src/main.rs
use env_logger::Builder;
use finance::api;
use finance::auth::TokenAuthority;
use finance::config::{Config, QuoteProvider, StorageBackend};
use finance::{
    AlphaVantageSource, FixedQuoteSource, InMemoryLedger, LedgerStore, QuoteGateway, QuoteSource,
    ScyllaLedger, TransactionEngine,
};
use log::{info, warn, LevelFilter};
use std::sync::Arc;

async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn LedgerStore>> {
    match config.storage.backend {
        StorageBackend::Scylla => {
            let ledger = ScyllaLedger::connect(&config.storage.scylla_node).await?;
            Ok(Arc::new(ledger))
        }
        StorageBackend::Memory => {
            warn!("Using the in-memory ledger; balances are lost on restart.");
            Ok(Arc::new(InMemoryLedger::new()))
        }
    }
}

fn build_quotes(config: &Config) -> anyhow::Result<Arc<dyn QuoteSource>> {
    match config.quotes.provider {
        QuoteProvider::AlphaVantage => {
            if config.quotes.api_key.is_none() {
                warn!("API_KEY not set; every quote lookup will fail.");
            }
            let source = AlphaVantageSource::new(
                config.quotes.base_url.clone(),
                config.quotes.api_key.clone(),
                config.quotes.timeout(),
            )?;
            Ok(Arc::new(source))
        }
        QuoteProvider::Fixed => {
            info!(
                "Serving fixed prices for {} symbols",
                config.quotes.fixed.len()
            );
            Ok(Arc::new(FixedQuoteSource::from_prices(&config.quotes.fixed)))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    let level = config
        .log_level
        .as_deref()
        .and_then(|level| level.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);
    Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    info!("Starting the finance ledger...");
    let store = build_store(&config).await?;
    info!("Connected to {:?} ledger store...", config.storage.backend);

    let quotes = QuoteGateway::new(build_quotes(&config)?, config.quotes.timeout());
    let engine = Arc::new(TransactionEngine::new(store, quotes, &config.engine));
    let auth = Arc::new(TokenAuthority::new(
        &config.auth.jwt_secret,
        config.auth.token_ttl_secs,
    ));

    let api = api::routes(engine, auth);

    info!("Server running on http://{}", config.server.bind_addr);
    warp::serve(api).run(config.server.bind_addr).await;
    Ok(())
}
