// src/db.rs
use crate::error::{FinanceError, Result};
use crate::models::{LedgerCommit, LedgerSnapshot, Transaction, TransactionId, UserId};
use crate::money::{from_cents, to_cents};
use async_trait::async_trait;
use log::{info, warn};
use rust_decimal::Decimal;
use scylla::{frame::response::result::CqlValue, query::Query, Session, SessionBuilder};

/// Durable owner of every account's cash and transaction log.
///
/// `append_transaction` is the only way a trade reaches the ledger: the new
/// entry and the new cash balance land together or not at all, and only if the
/// account is still at `commit.expected_version`.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn create_user(&self, username: &str, initial_cash: Decimal) -> Result<UserId>;

    async fn snapshot(&self, user_id: &UserId) -> Result<LedgerSnapshot>;

    async fn append_transaction(&self, commit: LedgerCommit) -> Result<TransactionId>;

    async fn set_cash(&self, user_id: &UserId, new_cash: Decimal) -> Result<()>;

    async fn get_cash(&self, user_id: &UserId) -> Result<Decimal> {
        Ok(self.snapshot(user_id).await?.cash)
    }

    async fn list_transactions(&self, user_id: &UserId) -> Result<Vec<Transaction>> {
        Ok(self.snapshot(user_id).await?.transactions)
    }
}

/// Checks applied by every backend before anything is written.
pub(crate) fn validate_commit(commit: &LedgerCommit) -> Result<()> {
    if commit.transaction.signed_shares == 0 {
        return Err(FinanceError::Validation(
            "a transaction must move at least one share".to_string(),
        ));
    }
    if commit.transaction.symbol.trim().is_empty() {
        return Err(FinanceError::Validation("symbol is empty".to_string()));
    }
    if commit.transaction.price <= Decimal::ZERO {
        return Err(FinanceError::Validation(format!(
            "price must be positive, got {}",
            commit.transaction.price
        )));
    }
    validate_cash(commit.new_cash)
}

pub(crate) fn validate_cash(cash: Decimal) -> Result<()> {
    if cash < Decimal::ZERO {
        return Err(FinanceError::Validation(format!(
            "cash may not be negative, got {}",
            cash
        )));
    }
    Ok(())
}

pub(crate) fn validate_username(username: &str) -> Result<&str> {
    let username = username.trim();
    if username.is_empty() {
        return Err(FinanceError::Validation("username is empty".to_string()));
    }
    Ok(username)
}

const SET_CASH_ATTEMPTS: usize = 5;

/// ScyllaDB-backed ledger. Each account is one row; the log is a list of
/// JSON-encoded transactions so that a single lightweight transaction can
/// append to it and move the balance at once.
pub struct ScyllaLedger {
    session: Session,
}

impl ScyllaLedger {
    pub async fn connect(node: &str) -> Result<Self> {
        let session = SessionBuilder::new()
            .known_node(node)
            .build()
            .await
            .map_err(FinanceError::storage)?;

        session.query("CREATE KEYSPACE IF NOT EXISTS finance WITH REPLICATION = {'class': 'SimpleStrategy', 'replication_factor': 1}", &[]).await.map_err(FinanceError::storage)?;
        session.query("CREATE TABLE IF NOT EXISTS finance.accounts (user_id TEXT PRIMARY KEY, username TEXT, cash_cents BIGINT, version BIGINT, ledger LIST<TEXT>)", &[]).await.map_err(FinanceError::storage)?;
        session
            .query(
                "CREATE TABLE IF NOT EXISTS finance.usernames (username TEXT PRIMARY KEY, user_id TEXT)",
                &[],
            )
            .await
            .map_err(FinanceError::storage)?;

        info!("Successfully connected to ScyllaDB at {}.", node);
        Ok(ScyllaLedger { session })
    }

    /// Runs a conditional statement and reports whether it was applied. A
    /// rejected condition on a missing row comes back with null columns.
    async fn execute_lwt(
        &self,
        query: Query,
        values: impl scylla::frame::value::ValueList,
    ) -> Result<LwtOutcome> {
        let result = self
            .session
            .query(query, values)
            .await
            .map_err(FinanceError::storage)?;
        let row = result
            .rows
            .and_then(|rows| rows.into_iter().next())
            .ok_or_else(|| FinanceError::Storage("conditional write returned no rows".into()))?;

        match row.columns.first() {
            Some(Some(CqlValue::Boolean(true))) => Ok(LwtOutcome::Applied),
            Some(Some(CqlValue::Boolean(false))) => {
                let row_exists = matches!(row.columns.get(1), Some(Some(_)));
                Ok(if row_exists {
                    LwtOutcome::Rejected
                } else {
                    LwtOutcome::Missing
                })
            }
            other => Err(FinanceError::Storage(format!(
                "unexpected [applied] column: {:?}",
                other
            ))),
        }
    }

    /// Frees a username claimed by `user_id`, leaving anyone else's claim alone.
    async fn release_username(&self, username: &str, user_id: &UserId) -> Result<()> {
        let release = Query::new("DELETE FROM finance.usernames WHERE username = ? IF user_id = ?");
        self.execute_lwt(release, (username, user_id.as_str()))
            .await
            .map(|_| ())
    }
}

enum LwtOutcome {
    Applied,
    Rejected,
    Missing,
}

#[async_trait]
impl LedgerStore for ScyllaLedger {
    async fn create_user(&self, username: &str, initial_cash: Decimal) -> Result<UserId> {
        let username = validate_username(username)?;
        validate_cash(initial_cash)?;
        let cents = to_cents(initial_cash)?;
        let user_id = UserId::generate();

        let claim = Query::new(
            "INSERT INTO finance.usernames (username, user_id) VALUES (?, ?) IF NOT EXISTS",
        );
        match self
            .execute_lwt(claim, (username, user_id.as_str()))
            .await?
        {
            LwtOutcome::Applied => {}
            _ => {
                return Err(FinanceError::Validation(format!(
                    "username {} is already taken",
                    username
                )))
            }
        }

        let insert = Query::new("INSERT INTO finance.accounts (user_id, username, cash_cents, version) VALUES (?, ?, ?, 0) IF NOT EXISTS");
        let failure = match self
            .execute_lwt(insert, (user_id.as_str(), username, cents))
            .await
        {
            Ok(LwtOutcome::Applied) => {
                info!("Created account {} for {}", user_id, username);
                return Ok(user_id);
            }
            Ok(_) => FinanceError::Storage(format!("account id collision for {}", user_id)),
            Err(e) => e,
        };

        if let Err(e) = self.release_username(username, &user_id).await {
            warn!("Could not release username {} after failed signup: {}", username, e);
        }
        Err(failure)
    }

    async fn snapshot(&self, user_id: &UserId) -> Result<LedgerSnapshot> {
        let query =
            Query::new("SELECT cash_cents, version, ledger FROM finance.accounts WHERE user_id = ?");
        let row = self
            .session
            .query(query, (user_id.as_str(),))
            .await
            .map_err(FinanceError::storage)?
            .rows
            .and_then(|rows| rows.into_iter().next())
            .ok_or_else(|| FinanceError::NotFound(user_id.clone()))?;

        decode_account(user_id, &row.columns)
    }

    async fn append_transaction(&self, commit: LedgerCommit) -> Result<TransactionId> {
        validate_commit(&commit)?;
        let cents = to_cents(commit.new_cash)?;
        let entry = serde_json::to_string(&commit.to_transaction()).map_err(FinanceError::storage)?;

        let query = Query::new("UPDATE finance.accounts SET cash_cents = ?, version = ?, ledger = ledger + ? WHERE user_id = ? IF version = ?");
        let outcome = self
            .execute_lwt(
                query,
                (
                    cents,
                    commit.expected_version as i64 + 1,
                    vec![entry],
                    commit.user_id.as_str(),
                    commit.expected_version as i64,
                ),
            )
            .await?;

        match outcome {
            LwtOutcome::Applied => Ok(commit.id),
            LwtOutcome::Rejected => Err(FinanceError::Conflict(commit.user_id)),
            LwtOutcome::Missing => Err(FinanceError::NotFound(commit.user_id)),
        }
    }

    async fn set_cash(&self, user_id: &UserId, new_cash: Decimal) -> Result<()> {
        validate_cash(new_cash)?;
        let cents = to_cents(new_cash)?;

        for _ in 0..SET_CASH_ATTEMPTS {
            let version = self.snapshot(user_id).await?.version as i64;
            let query = Query::new(
                "UPDATE finance.accounts SET cash_cents = ?, version = ? WHERE user_id = ? IF version = ?",
            );
            match self
                .execute_lwt(query, (cents, version + 1, user_id.as_str(), version))
                .await?
            {
                LwtOutcome::Applied => return Ok(()),
                LwtOutcome::Missing => return Err(FinanceError::NotFound(user_id.clone())),
                LwtOutcome::Rejected => {
                    warn!("Cash update for {} lost a race, retrying", user_id);
                }
            }
        }
        Err(FinanceError::Conflict(user_id.clone()))
    }

    async fn get_cash(&self, user_id: &UserId) -> Result<Decimal> {
        let query = Query::new("SELECT cash_cents FROM finance.accounts WHERE user_id = ?");
        let row = self
            .session
            .query(query, (user_id.as_str(),))
            .await
            .map_err(FinanceError::storage)?
            .rows
            .and_then(|rows| rows.into_iter().next())
            .ok_or_else(|| FinanceError::NotFound(user_id.clone()))?;
        match row.columns.first() {
            Some(Some(CqlValue::BigInt(cents))) => Ok(from_cents(*cents)),
            other => Err(FinanceError::Storage(format!(
                "account {} has malformed cash: {:?}",
                user_id, other
            ))),
        }
    }
}

/// Decodes a `cash_cents, version, ledger` row.
fn decode_account(user_id: &UserId, columns: &[Option<CqlValue>]) -> Result<LedgerSnapshot> {
    let cash_cents = match columns.first() {
        Some(Some(CqlValue::BigInt(cents))) => *cents,
        other => {
            return Err(FinanceError::Storage(format!(
                "account {} has malformed cash: {:?}",
                user_id, other
            )))
        }
    };
    let version = match columns.get(1) {
        Some(Some(CqlValue::BigInt(v))) if *v >= 0 => *v as u64,
        other => {
            return Err(FinanceError::Storage(format!(
                "account {} has malformed version: {:?}",
                user_id, other
            )))
        }
    };
    // Cassandra stores an empty list as null.
    let transactions = match columns.get(2) {
        Some(Some(CqlValue::List(items))) => items
            .iter()
            .map(|item| match item {
                CqlValue::Text(json) => {
                    serde_json::from_str::<Transaction>(json).map_err(FinanceError::storage)
                }
                other => Err(FinanceError::Storage(format!(
                    "ledger entry is not text: {:?}",
                    other
                ))),
            })
            .collect::<Result<Vec<_>>>()?,
        _ => Vec::new(),
    };

    Ok(LedgerSnapshot {
        user_id: user_id.clone(),
        cash: from_cents(cash_cents),
        version,
        transactions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn decodes_account_rows() {
        let user = UserId::new("u1");
        let entry = r#"{"id":1,"user_id":"u1","symbol":"AAPL","signed_shares":10,"price":"150.00","timestamp":"2024-05-01T12:00:00Z"}"#;
        let columns = vec![
            Some(CqlValue::BigInt(850_000)),
            Some(CqlValue::BigInt(1)),
            Some(CqlValue::List(vec![CqlValue::Text(entry.to_string())])),
        ];
        let snapshot = decode_account(&user, &columns).unwrap();
        assert_eq!(snapshot.cash, dec!(8500));
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.transactions[0].price, dec!(150));

        let empty_log = vec![Some(CqlValue::BigInt(100)), Some(CqlValue::BigInt(0)), None];
        assert!(decode_account(&user, &empty_log).unwrap().transactions.is_empty());
    }

    #[test]
    fn malformed_version_is_a_storage_error() {
        let user = UserId::new("u1");
        for version in [None, Some(CqlValue::Int(3)), Some(CqlValue::BigInt(-1))] {
            let columns = vec![Some(CqlValue::BigInt(100)), version, None];
            assert!(matches!(
                decode_account(&user, &columns),
                Err(FinanceError::Storage(_))
            ));
        }
    }

    #[tokio::test]
    #[ignore = "requires a ScyllaDB node on 127.0.0.1:9042"]
    async fn scylla_commit_is_conditional_on_version() {
        let ledger = ScyllaLedger::connect("127.0.0.1:9042").await.unwrap();
        let name = format!("it-{}", UserId::generate());
        let user = ledger.create_user(&name, dec!(1000)).await.unwrap();
        let snapshot = ledger.snapshot(&user).await.unwrap();

        let tx = crate::models::NewTransaction {
            symbol: "AAPL".into(),
            signed_shares: 2,
            price: dec!(100),
        };
        let first = snapshot.commit(tx.clone(), dec!(800));
        assert_eq!(ledger.append_transaction(first).await.unwrap().0, 1);

        let stale = snapshot.commit(tx, dec!(800));
        assert!(matches!(
            ledger.append_transaction(stale).await,
            Err(FinanceError::Conflict(_))
        ));
        assert_eq!(ledger.get_cash(&user).await.unwrap(), dec!(800));
        assert_eq!(ledger.list_transactions(&user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    #[ignore = "requires a ScyllaDB node on 127.0.0.1:9042"]
    async fn released_usernames_can_be_claimed_again() {
        let ledger = ScyllaLedger::connect("127.0.0.1:9042").await.unwrap();
        let name = format!("it-{}", UserId::generate());
        let user = ledger.create_user(&name, dec!(10)).await.unwrap();
        assert!(matches!(
            ledger.create_user(&name, dec!(10)).await,
            Err(FinanceError::Validation(_))
        ));

        ledger
            .release_username(&name, &UserId::new("someone-else"))
            .await
            .unwrap();
        assert!(ledger.create_user(&name, dec!(10)).await.is_err());

        ledger.release_username(&name, &user).await.unwrap();
        assert!(ledger.create_user(&name, dec!(10)).await.is_ok());
    }
}
