// src/quote.rs
use crate::error::{FinanceError, Result};
use crate::models::Quote;
use crate::money::round_to_cents;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info, warn};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// The external price collaborator. `Ok(None)` means the instrument does not exist.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn lookup(&self, symbol: &str) -> Result<Option<Quote>>;
}

#[derive(Deserialize)]
struct GlobalQuote {
    #[serde(rename = "01. symbol")]
    symbol: Option<String>,
    #[serde(rename = "05. price")]
    price: Option<String>,
}

#[derive(Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    global_quote: Option<GlobalQuote>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

#[derive(Deserialize)]
struct SearchMatch {
    #[serde(rename = "1. symbol")]
    symbol: String,
    #[serde(rename = "2. name")]
    name: String,
}

#[derive(Deserialize)]
struct SymbolSearchResponse {
    #[serde(rename = "bestMatches", default)]
    best_matches: Vec<SearchMatch>,
}

/// Parses a `GLOBAL_QUOTE` body into `(symbol, price)`.
pub fn parse_global_quote(body: &str) -> Result<Option<(String, Decimal)>> {
    let response: GlobalQuoteResponse = serde_json::from_str(body)
        .map_err(|e| FinanceError::upstream(format!("malformed quote response: {}", e)))?;

    if let Some(message) = response.note.or(response.information) {
        return Err(FinanceError::UpstreamUnavailable(message));
    }
    if response.error_message.is_some() {
        return Ok(None);
    }
    let quote = match response.global_quote {
        Some(quote) => quote,
        None => return Ok(None),
    };
    match (quote.symbol, quote.price) {
        (Some(symbol), Some(price)) if !symbol.is_empty() => {
            let price = Decimal::from_str(price.trim()).map_err(|e| {
                FinanceError::upstream(format!("unparseable price {:?}: {}", price, e))
            })?;
            Ok(Some((symbol, price)))
        }
        _ => Ok(None),
    }
}

/// Picks the company name for `symbol` out of a `SYMBOL_SEARCH` body.
pub fn parse_symbol_name(body: &str, symbol: &str) -> Option<String> {
    let response: SymbolSearchResponse = serde_json::from_str(body).ok()?;
    response
        .best_matches
        .into_iter()
        .find(|m| m.symbol.eq_ignore_ascii_case(symbol))
        .map(|m| m.name)
}

/// Alpha Vantage price lookups.
pub struct AlphaVantageSource {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl AlphaVantageSource {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FinanceError::upstream)?;
        Ok(AlphaVantageSource {
            client,
            base_url: base_url.into(),
            api_key: api_key.filter(|key| !key.is_empty()),
        })
    }

    async fn fetch(&self, function: &str, param: &str, symbol: &str, api_key: &str) -> Result<String> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("function", function), (param, symbol), ("apikey", api_key)])
            .send()
            .await
            .map_err(|e| FinanceError::upstream(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(FinanceError::UpstreamUnavailable(format!(
                "HTTP {}",
                response.status()
            )));
        }
        response.text().await.map_err(FinanceError::upstream)
    }

    async fn company_name(&self, symbol: &str, api_key: &str) -> Option<String> {
        match self.fetch("SYMBOL_SEARCH", "keywords", symbol, api_key).await {
            Ok(body) => parse_symbol_name(&body, symbol),
            Err(e) => {
                debug!("Name lookup for {} failed: {}", symbol, e);
                None
            }
        }
    }
}

#[async_trait]
impl QuoteSource for AlphaVantageSource {
    async fn lookup(&self, symbol: &str) -> Result<Option<Quote>> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| FinanceError::UpstreamUnavailable("API_KEY not set".to_string()))?;

        let body = self.fetch("GLOBAL_QUOTE", "symbol", symbol, api_key).await?;
        let (symbol, price) = match parse_global_quote(&body)? {
            Some(found) => found,
            None => return Ok(None),
        };
        let name = self
            .company_name(&symbol, api_key)
            .await
            .unwrap_or_else(|| symbol.clone());
        Ok(Some(Quote {
            symbol,
            name,
            price,
        }))
    }
}

/// Fixed price table, for offline runs and tests.
#[derive(Debug, Default)]
pub struct FixedQuoteSource {
    quotes: parking_lot::RwLock<HashMap<String, Quote>>,
}

impl FixedQuoteSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_prices(prices: &HashMap<String, Decimal>) -> Self {
        let source = Self::new();
        for (symbol, price) in prices {
            source.set_price(symbol, *price);
        }
        source
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        let symbol = symbol.to_ascii_uppercase();
        self.quotes.write().insert(
            symbol.clone(),
            Quote {
                name: symbol.clone(),
                symbol,
                price,
            },
        );
    }

    pub fn remove(&self, symbol: &str) {
        self.quotes.write().remove(&symbol.to_ascii_uppercase());
    }
}

#[async_trait]
impl QuoteSource for FixedQuoteSource {
    async fn lookup(&self, symbol: &str) -> Result<Option<Quote>> {
        Ok(self.quotes.read().get(symbol).cloned())
    }
}

#[derive(Debug, Clone)]
pub struct LastKnown {
    pub quote: Quote,
    pub fetched_at: DateTime<Utc>,
}

/// Stable front for a `QuoteSource`: symbol normalisation, timeout, error
/// mapping and a last-known price per symbol. Never retries.
#[derive(Clone)]
pub struct QuoteGateway {
    source: Arc<dyn QuoteSource>,
    timeout: Duration,
    last_known: Arc<DashMap<String, LastKnown>>,
}

impl QuoteGateway {
    pub fn new(source: Arc<dyn QuoteSource>, timeout: Duration) -> Self {
        QuoteGateway {
            source,
            timeout,
            last_known: Arc::new(DashMap::new()),
        }
    }

    pub fn normalize_symbol(symbol: &str) -> Result<String> {
        let symbol = symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(FinanceError::Validation("symbol is required".to_string()));
        }
        if symbol.len() > 10
            || !symbol
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        {
            return Err(FinanceError::Validation(format!(
                "{:?} is not a ticker symbol",
                symbol
            )));
        }
        Ok(symbol)
    }

    pub async fn get_quote(&self, symbol: &str) -> Result<Quote> {
        let symbol = Self::normalize_symbol(symbol)?;

        let found = tokio::time::timeout(self.timeout, self.source.lookup(&symbol))
            .await
            .map_err(|_| {
                FinanceError::UpstreamUnavailable(format!(
                    "quote lookup for {} timed out after {:?}",
                    symbol, self.timeout
                ))
            })??;

        let mut quote = found.ok_or_else(|| FinanceError::SymbolNotFound(symbol.clone()))?;
        let price = round_to_cents(quote.price);
        if price <= Decimal::ZERO {
            warn!("Quote source returned price {} for {}", quote.price, symbol);
            return Err(FinanceError::UpstreamUnavailable(format!(
                "no positive price for {}, got {}",
                symbol, quote.price
            )));
        }
        quote.symbol = quote.symbol.to_ascii_uppercase();
        quote.price = price;

        info!("Quoted {} at {}", quote.symbol, quote.price);
        self.last_known.insert(
            symbol,
            LastKnown {
                quote: quote.clone(),
                fetched_at: Utc::now(),
            },
        );
        Ok(quote)
    }

    pub fn last_known(&self, symbol: &str) -> Option<LastKnown> {
        self.last_known
            .get(&symbol.to_ascii_uppercase())
            .map(|entry| entry.value().clone())
    }
}
