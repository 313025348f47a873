// src/config.rs
//! Runtime configuration: optional TOML file named by `FINANCE_CONFIG`,
//! then environment overrides (a `.env` file is honoured).

use anyhow::Context;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Scylla,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteProvider {
    AlphaVantage,
    Fixed,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3030)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub scylla_node: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            backend: StorageBackend::Scylla,
            scylla_node: "127.0.0.1:9042".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuoteConfig {
    pub provider: QuoteProvider,
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout_ms: u64,
    /// Prices served by the `fixed` provider.
    pub fixed: HashMap<String, Decimal>,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        QuoteConfig {
            provider: QuoteProvider::AlphaVantage,
            api_key: None,
            base_url: "https://www.alphavantage.co/query".to_string(),
            timeout_ms: 5_000,
            fixed: HashMap::new(),
        }
    }
}

impl QuoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub initial_cash: Decimal,
    pub store_timeout_ms: u64,
    pub max_commit_attempts: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            initial_cash: Decimal::new(10_000_00, 2),
            store_timeout_ms: 2_000,
            max_commit_attempts: 3,
        }
    }
}

impl EngineConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            jwt_secret: "change-me".to_string(),
            token_ttl_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub quotes: QuoteConfig,
    pub engine: EngineConfig,
    pub auth: AuthConfig,
    pub log_level: Option<String>,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match std::env::var("FINANCE_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Layers environment variables on top; `lookup` is `std::env::var` outside tests.
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("API_KEY") {
            self.quotes.api_key = Some(key);
        }
        if let Some(addr) = lookup("BIND_ADDR") {
            self.server.bind_addr = addr
                .parse()
                .with_context(|| format!("BIND_ADDR {:?} is not a socket address", addr))?;
        }
        if let Some(node) = lookup("SCYLLA_NODE") {
            self.storage.scylla_node = node;
        }
        if let Some(secret) = lookup("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(backend) = lookup("STORAGE_BACKEND") {
            self.storage.backend = match backend.to_ascii_lowercase().as_str() {
                "scylla" => StorageBackend::Scylla,
                "memory" => StorageBackend::Memory,
                other => anyhow::bail!("unknown STORAGE_BACKEND {:?}", other),
            };
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.log_level = Some(level);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn defaults_match_the_classic_app() {
        let config = Config::default();
        assert_eq!(config.engine.initial_cash, dec!(10000));
        assert_eq!(config.storage.backend, StorageBackend::Scylla);
        assert_eq!(config.quotes.provider, QuoteProvider::AlphaVantage);
        assert_eq!(config.server.bind_addr.port(), 3030);
    }

    #[test]
    fn parses_partial_toml() {
        let config = Config::from_toml(
            r#"
            log_level = "debug"

            [storage]
            backend = "memory"

            [quotes]
            provider = "fixed"
            timeout_ms = 250

            [quotes.fixed]
            AAPL = "150.00"
            MSFT = "310.25"

            [engine]
            initial_cash = "2500.00"
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.quotes.provider, QuoteProvider::Fixed);
        assert_eq!(config.quotes.timeout(), Duration::from_millis(250));
        assert_eq!(config.quotes.fixed.get("MSFT"), Some(&dec!(310.25)));
        assert_eq!(config.engine.initial_cash, dec!(2500));
        assert_eq!(config.engine.max_commit_attempts, 3);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = Config::default();
        let env: HashMap<&str, &str> = [
            ("API_KEY", "demo"),
            ("BIND_ADDR", "0.0.0.0:8080"),
            ("STORAGE_BACKEND", "MEMORY"),
        ]
        .into_iter()
        .collect();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.quotes.api_key.as_deref(), Some("demo"));
        assert_eq!(config.server.bind_addr.port(), 8080);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn rejects_unknown_backend() {
        let mut config = Config::default();
        assert!(config
            .apply_env(|key| (key == "STORAGE_BACKEND").then(|| "sqlite".to_string()))
            .is_err());
    }
}
