// src/models.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    pub fn generate() -> Self {
        UserId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of a transaction in its owner's log, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn signed(self, shares: i64) -> i64 {
        match self {
            Side::Buy => shares,
            Side::Sell => -shares,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("buy"),
            Side::Sell => f.write_str("sell"),
        }
    }
}

/// An executed trade. Immutable once written to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub symbol: String,
    pub signed_shares: i64,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    /// Cash effect of this trade: negative for buys, positive for sells.
    pub fn cash_delta(&self) -> Decimal {
        -(self.price * Decimal::from(self.signed_shares))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub symbol: String,
    pub signed_shares: i64,
    pub price: Decimal,
}

/// Account state read at a single point: the base for a conditional commit.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSnapshot {
    pub user_id: UserId,
    pub cash: Decimal,
    pub version: u64,
    pub transactions: Vec<Transaction>,
}

impl LedgerSnapshot {
    /// Builds a commit that only applies if the account is still at this snapshot's version.
    pub fn commit(&self, transaction: NewTransaction, new_cash: Decimal) -> LedgerCommit {
        let now = Utc::now();
        let timestamp = match self.transactions.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        LedgerCommit {
            user_id: self.user_id.clone(),
            expected_version: self.version,
            id: TransactionId(self.transactions.len() as u64 + 1),
            timestamp,
            transaction,
            new_cash,
        }
    }
}

/// One atomic unit: append `transaction` and set cash to `new_cash`.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerCommit {
    pub user_id: UserId,
    pub expected_version: u64,
    pub id: TransactionId,
    pub timestamp: DateTime<Utc>,
    pub transaction: NewTransaction,
    pub new_cash: Decimal,
}

impl LedgerCommit {
    pub fn to_transaction(&self) -> Transaction {
        Transaction {
            id: self.id,
            user_id: self.user_id.clone(),
            symbol: self.transaction.symbol.clone(),
            signed_shares: self.transaction.signed_shares,
            price: self.transaction.price,
            timestamp: self.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub name: String,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeReceipt {
    pub transaction_id: TransactionId,
    pub side: Side,
    pub symbol: String,
    pub name: String,
    pub signed_shares: i64,
    pub price: Decimal,
    /// Cost of a buy or proceeds of a sell.
    pub total: Decimal,
    pub cash: Decimal,
    pub holding: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PriceStatus {
    Live,
    Stale { as_of: DateTime<Utc>, reason: String },
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioRow {
    pub symbol: String,
    pub name: String,
    pub shares: i64,
    pub price: Option<Decimal>,
    pub total: Decimal,
    pub price_status: PriceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioView {
    pub rows: Vec<PortfolioRow>,
    pub cash: Decimal,
    pub holdings_value: Decimal,
    pub grand_total: Decimal,
    /// True when at least one row is not priced live.
    pub degraded: bool,
}
