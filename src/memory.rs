// src/memory.rs
use crate::db::{validate_cash, validate_commit, validate_username, LedgerStore};
use crate::error::{FinanceError, Result};
use crate::models::{LedgerCommit, LedgerSnapshot, Transaction, TransactionId, UserId};
use crate::money::to_cents;
use async_trait::async_trait;
use log::info;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;

#[derive(Debug)]
struct AccountRecord {
    username: String,
    cash: Decimal,
    version: u64,
    ledger: Vec<Transaction>,
}

/// Process-local ledger. Every commit checks the version, appends and moves
/// the balance under one write lock.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    accounts: RwLock<HashMap<UserId, AccountRecord>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Cash must fit the integer-cents column the durable backend uses.
fn representable(cash: Decimal) -> Result<()> {
    to_cents(cash).map(|_| ())
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn create_user(&self, username: &str, initial_cash: Decimal) -> Result<UserId> {
        let username = validate_username(username)?;
        validate_cash(initial_cash)?;
        representable(initial_cash)?;

        let mut accounts = self.accounts.write();
        if accounts.values().any(|a| a.username == username) {
            return Err(FinanceError::Validation(format!(
                "username {} is already taken",
                username
            )));
        }
        let user_id = UserId::generate();
        accounts.insert(
            user_id.clone(),
            AccountRecord {
                username: username.to_string(),
                cash: initial_cash,
                version: 0,
                ledger: Vec::new(),
            },
        );
        info!("Created account {} for {}", user_id, username);
        Ok(user_id)
    }

    async fn snapshot(&self, user_id: &UserId) -> Result<LedgerSnapshot> {
        let accounts = self.accounts.read();
        let account = accounts
            .get(user_id)
            .ok_or_else(|| FinanceError::NotFound(user_id.clone()))?;
        Ok(LedgerSnapshot {
            user_id: user_id.clone(),
            cash: account.cash,
            version: account.version,
            transactions: account.ledger.clone(),
        })
    }

    async fn append_transaction(&self, commit: LedgerCommit) -> Result<TransactionId> {
        validate_commit(&commit)?;
        representable(commit.new_cash)?;

        let mut accounts = self.accounts.write();
        let account = accounts
            .get_mut(&commit.user_id)
            .ok_or_else(|| FinanceError::NotFound(commit.user_id.clone()))?;
        if account.version != commit.expected_version {
            return Err(FinanceError::Conflict(commit.user_id));
        }

        let mut transaction = commit.to_transaction();
        // Same version means same log, so the snapshot's id already matches.
        transaction.id = TransactionId(account.ledger.len() as u64 + 1);
        let id = transaction.id;

        account.ledger.push(transaction);
        account.cash = commit.new_cash;
        account.version += 1;
        Ok(id)
    }

    async fn set_cash(&self, user_id: &UserId, new_cash: Decimal) -> Result<()> {
        validate_cash(new_cash)?;
        representable(new_cash)?;

        let mut accounts = self.accounts.write();
        let account = accounts
            .get_mut(user_id)
            .ok_or_else(|| FinanceError::NotFound(user_id.clone()))?;
        account.cash = new_cash;
        account.version += 1;
        Ok(())
    }

    async fn get_cash(&self, user_id: &UserId) -> Result<Decimal> {
        self.accounts
            .read()
            .get(user_id)
            .map(|account| account.cash)
            .ok_or_else(|| FinanceError::NotFound(user_id.clone()))
    }
}
