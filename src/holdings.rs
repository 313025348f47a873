// src/holdings.rs
//! Read-time projection of the transaction log into per-symbol share counts.

use crate::models::Transaction;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Net signed shares for every symbol that appears in the log.
pub fn net_positions(transactions: &[Transaction]) -> BTreeMap<String, i64> {
    let mut positions = BTreeMap::new();
    for tx in transactions {
        *positions.entry(tx.symbol.clone()).or_insert(0) += tx.signed_shares;
    }
    positions
}

/// Symbols with a strictly positive aggregate. Divested symbols are omitted.
pub fn current_holdings(transactions: &[Transaction]) -> BTreeMap<String, i64> {
    net_positions(transactions)
        .into_iter()
        .filter(|(_, shares)| *shares > 0)
        .collect()
}

/// The real aggregate for one symbol; zero or negative when nothing is held.
pub fn share_count_for(transactions: &[Transaction], symbol: &str) -> i64 {
    transactions
        .iter()
        .filter(|tx| tx.symbol == symbol)
        .map(|tx| tx.signed_shares)
        .sum()
}

/// Cash implied by replaying the log on top of `opening_cash`.
pub fn replay_cash(opening_cash: Decimal, transactions: &[Transaction]) -> Decimal {
    transactions
        .iter()
        .fold(opening_cash, |cash, tx| cash + tx.cash_delta())
}
