// src/lib.rs
//! Portfolio ledger: cash and stock holdings derived from an append-only log
//! of buy/sell transactions, with atomic per-user commits.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod holdings;
pub mod memory;
pub mod models;
pub mod money;
pub mod quote;

pub use db::{LedgerStore, ScyllaLedger};
pub use engine::TransactionEngine;
pub use error::{FinanceError, Result};
pub use memory::InMemoryLedger;
pub use quote::{AlphaVantageSource, FixedQuoteSource, QuoteGateway, QuoteSource};
