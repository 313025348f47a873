// src/engine.rs
//! Buy, sell and cash adjustment against the ledger, plus the portfolio and
//! history read paths.
//!
//! Mutations for one user are linearized twice: a per-user mutex serializes
//! them inside this process, and every commit is conditional on the account
//! version read for the check, so a stale snapshot can never be written back.

use crate::config::EngineConfig;
use crate::db::LedgerStore;
use crate::error::{FinanceError, Result};
use crate::holdings::{current_holdings, share_count_for};
use crate::models::{
    LedgerSnapshot, NewTransaction, PortfolioRow, PortfolioView, PriceStatus, Quote, Side,
    TradeReceipt, Transaction, UserId,
};
use crate::money::{checked_sum, line_total, to_cents, usd};
use crate::quote::QuoteGateway;
use dashmap::DashMap;
use futures::future::join_all;
use log::{info, warn};
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub struct TransactionEngine {
    store: Arc<dyn LedgerStore>,
    quotes: QuoteGateway,
    locks: DashMap<UserId, Arc<Mutex<()>>>,
    initial_cash: Decimal,
    store_timeout: Duration,
    max_commit_attempts: usize,
}

impl TransactionEngine {
    pub fn new(store: Arc<dyn LedgerStore>, quotes: QuoteGateway, config: &EngineConfig) -> Self {
        TransactionEngine {
            store,
            quotes,
            locks: DashMap::new(),
            initial_cash: config.initial_cash,
            store_timeout: config.store_timeout(),
            max_commit_attempts: config.max_commit_attempts.max(1),
        }
    }

    pub async fn open_account(&self, username: &str) -> Result<UserId> {
        let user_id = self
            .with_store_timeout(self.store.create_user(username, self.initial_cash))
            .await?;
        info!("Opened account {} with {}", user_id, usd(self.initial_cash));
        Ok(user_id)
    }

    pub async fn quote(&self, symbol: &str) -> Result<Quote> {
        self.quotes.get_quote(symbol).await
    }

    pub async fn buy(&self, user_id: &UserId, symbol: &str, shares: i64) -> Result<TradeReceipt> {
        self.trade(user_id, Side::Buy, symbol, shares).await
    }

    pub async fn sell(&self, user_id: &UserId, symbol: &str, shares: i64) -> Result<TradeReceipt> {
        self.trade(user_id, Side::Sell, symbol, shares).await
    }

    /// Replaces the balance outright. Not recorded in the transaction log.
    pub async fn adjust_cash(&self, user_id: &UserId, new_cash: Decimal) -> Result<Decimal> {
        if new_cash < Decimal::ZERO {
            return Err(FinanceError::Validation(format!(
                "cash may not be negative, got {}",
                new_cash
            )));
        }
        to_cents(new_cash)?;

        let _guard = self.lock_user(user_id).await;
        self.with_store_timeout(self.store.set_cash(user_id, new_cash))
            .await?;
        info!("Cash for {} set to {}", user_id, usd(new_cash));
        Ok(new_cash)
    }

    pub async fn history(&self, user_id: &UserId) -> Result<Vec<Transaction>> {
        self.with_store_timeout(self.store.list_transactions(user_id))
            .await
    }

    /// Values every active holding at a fresh quote. A failed lookup falls back
    /// to the last price seen for that symbol, or values the row at zero.
    pub async fn portfolio(&self, user_id: &UserId) -> Result<PortfolioView> {
        let snapshot = self.snapshot(user_id).await?;
        let holdings = current_holdings(&snapshot.transactions);

        let rows = join_all(
            holdings
                .into_iter()
                .map(|(symbol, shares)| self.price_row(symbol, shares)),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

        let holdings_value = rows
            .iter()
            .try_fold(Decimal::ZERO, |sum, row| checked_sum(sum, row.total))?;
        let degraded = rows
            .iter()
            .any(|row| !matches!(row.price_status, PriceStatus::Live));
        if degraded {
            warn!("Portfolio for {} rendered with degraded prices", user_id);
        }

        Ok(PortfolioView {
            rows,
            cash: snapshot.cash,
            holdings_value,
            grand_total: checked_sum(holdings_value, snapshot.cash)?,
            degraded,
        })
    }

    async fn price_row(&self, symbol: String, shares: i64) -> Result<PortfolioRow> {
        let (name, price, price_status) = match self.quotes.get_quote(&symbol).await {
            Ok(quote) => (quote.name, Some(quote.price), PriceStatus::Live),
            Err(e) => match self.quotes.last_known(&symbol) {
                Some(last) => {
                    warn!("Using last known price for {}: {}", symbol, e);
                    (
                        last.quote.name,
                        Some(last.quote.price),
                        PriceStatus::Stale {
                            as_of: last.fetched_at,
                            reason: e.to_string(),
                        },
                    )
                }
                None => {
                    warn!("No price for {}: {}", symbol, e);
                    (
                        symbol.clone(),
                        None,
                        PriceStatus::Unavailable {
                            reason: e.to_string(),
                        },
                    )
                }
            },
        };

        let total = match price {
            Some(p) => line_total(p, shares)?,
            None => Decimal::ZERO,
        };
        Ok(PortfolioRow {
            symbol,
            name,
            shares,
            price,
            total,
            price_status,
        })
    }

    async fn trade(
        &self,
        user_id: &UserId,
        side: Side,
        symbol: &str,
        shares: i64,
    ) -> Result<TradeReceipt> {
        if shares <= 0 {
            return Err(FinanceError::Validation(format!(
                "shares must be a positive whole number, got {}",
                shares
            )));
        }
        let quote = self.quotes.get_quote(symbol).await?;
        let total = line_total(quote.price, shares)?;

        let _guard = self.lock_user(user_id).await;
        for attempt in 1..=self.max_commit_attempts {
            let snapshot = self.snapshot(user_id).await?;
            let new_cash = check_trade(&snapshot, side, &quote.symbol, shares, total)?;
            let held = share_count_for(&snapshot.transactions, &quote.symbol);

            let commit = snapshot.commit(
                NewTransaction {
                    symbol: quote.symbol.clone(),
                    signed_shares: side.signed(shares),
                    price: quote.price,
                },
                new_cash,
            );
            match self
                .with_store_timeout(self.store.append_transaction(commit))
                .await
            {
                Ok(transaction_id) => {
                    info!(
                        "{} {} {} x{} @ {} (tx {}), cash now {}",
                        user_id,
                        side,
                        quote.symbol,
                        shares,
                        usd(quote.price),
                        transaction_id,
                        usd(new_cash)
                    );
                    return Ok(TradeReceipt {
                        transaction_id,
                        side,
                        symbol: quote.symbol,
                        name: quote.name,
                        signed_shares: side.signed(shares),
                        price: quote.price,
                        total,
                        cash: new_cash,
                        holding: held + side.signed(shares),
                    });
                }
                Err(FinanceError::Conflict(_)) => {
                    warn!(
                        "Commit for {} lost a race (attempt {}/{}), re-reading",
                        user_id, attempt, self.max_commit_attempts
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(FinanceError::Storage(format!(
            "account {} kept changing; gave up after {} attempts",
            user_id, self.max_commit_attempts
        )))
    }

    async fn snapshot(&self, user_id: &UserId) -> Result<LedgerSnapshot> {
        self.with_store_timeout(self.store.snapshot(user_id)).await
    }

    async fn lock_user(&self, user_id: &UserId) -> UserLock<'_> {
        let lock = self
            .locks
            .entry(user_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        UserLock {
            locks: &self.locks,
            user_id: user_id.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    async fn with_store_timeout<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.store_timeout, fut)
            .await
            .map_err(|_| {
                FinanceError::Storage(format!(
                    "ledger store did not answer within {:?}",
                    self.store_timeout
                ))
            })?
    }
}

/// Holds one user's mutation lock. The map entry is dropped once no other task
/// holds or waits on it.
struct UserLock<'a> {
    locks: &'a DashMap<UserId, Arc<Mutex<()>>>,
    user_id: UserId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UserLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Clones are taken under the shard lock, so a count of one here means
        // nobody else can reach this mutex.
        self.locks
            .remove_if(&self.user_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Business rules for a trade against one snapshot; returns the new balance.
fn check_trade(
    snapshot: &LedgerSnapshot,
    side: Side,
    symbol: &str,
    shares: i64,
    total: Decimal,
) -> Result<Decimal> {
    match side {
        Side::Buy => match snapshot.cash.checked_sub(total) {
            Some(remaining) if remaining >= Decimal::ZERO => Ok(remaining),
            _ => Err(FinanceError::InsufficientFunds {
                cost: total,
                available: snapshot.cash,
            }),
        },
        Side::Sell => {
            let held = share_count_for(&snapshot.transactions, symbol);
            if held < shares {
                return Err(FinanceError::InsufficientShares {
                    symbol: symbol.to_string(),
                    requested: shares,
                    held: held.max(0),
                });
            }
            let cash = checked_sum(snapshot.cash, total)?;
            to_cents(cash)?;
            Ok(cash)
        }
    }
}
