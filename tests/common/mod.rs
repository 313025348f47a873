#![allow(dead_code)]

use async_trait::async_trait;
use finance::config::EngineConfig;
use finance::models::{LedgerCommit, LedgerSnapshot, Quote, TransactionId, UserId};
use finance::{
    FinanceError, FixedQuoteSource, InMemoryLedger, LedgerStore, QuoteGateway, QuoteSource,
    Result, TransactionEngine,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub engine: Arc<TransactionEngine>,
    pub store: Arc<FaultyLedger>,
    pub quotes: Arc<FixedQuoteSource>,
    pub feed: Arc<QuoteFeed>,
}

pub fn harness() -> Harness {
    harness_with(EngineConfig::default())
}

pub fn harness_with(config: EngineConfig) -> Harness {
    let store = Arc::new(FaultyLedger::new());
    let quotes = Arc::new(FixedQuoteSource::new());
    let feed = Arc::new(QuoteFeed::new(quotes.clone()));
    let gateway = QuoteGateway::new(feed.clone(), QUOTE_TIMEOUT);
    let engine = Arc::new(TransactionEngine::new(store.clone(), gateway, &config));
    Harness {
        engine,
        store,
        quotes,
        feed,
    }
}

pub const QUOTE_TIMEOUT: Duration = Duration::from_millis(200);

/// Price table in front of the gateway that can go down or stall on demand.
pub struct QuoteFeed {
    prices: Arc<FixedQuoteSource>,
    down: AtomicBool,
    stall: Mutex<Option<Duration>>,
}

impl QuoteFeed {
    pub fn new(prices: Arc<FixedQuoteSource>) -> Self {
        QuoteFeed {
            prices,
            down: AtomicBool::new(false),
            stall: Mutex::new(None),
        }
    }

    pub fn go_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn stall(&self, delay: Option<Duration>) {
        *self.stall.lock() = delay;
    }
}

#[async_trait]
impl QuoteSource for QuoteFeed {
    async fn lookup(&self, symbol: &str) -> Result<Option<Quote>> {
        let stall = *self.stall.lock();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(FinanceError::UpstreamUnavailable(
                "Our standard API call frequency is 5 calls per minute".into(),
            ));
        }
        self.prices.lookup(symbol).await
    }
}

/// Wraps the in-memory ledger with switchable failures.
#[derive(Default)]
pub struct FaultyLedger {
    inner: InMemoryLedger,
    fail_commits: AtomicBool,
    conflicts_to_inject: AtomicUsize,
    commit_delay: Mutex<Option<Duration>>,
}

impl FaultyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn inject_conflicts(&self, count: usize) {
        self.conflicts_to_inject.store(count, Ordering::SeqCst);
    }

    pub fn delay_commits(&self, delay: Duration) {
        *self.commit_delay.lock() = Some(delay);
    }
}

#[async_trait]
impl LedgerStore for FaultyLedger {
    async fn create_user(&self, username: &str, initial_cash: Decimal) -> Result<UserId> {
        self.inner.create_user(username, initial_cash).await
    }

    async fn snapshot(&self, user_id: &UserId) -> Result<LedgerSnapshot> {
        self.inner.snapshot(user_id).await
    }

    async fn append_transaction(&self, commit: LedgerCommit) -> Result<TransactionId> {
        let delay = *self.commit_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(FinanceError::Storage("disk on fire".into()));
        }
        let injected = self
            .conflicts_to_inject
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(FinanceError::Conflict(commit.user_id));
        }
        self.inner.append_transaction(commit).await
    }

    async fn set_cash(&self, user_id: &UserId, new_cash: Decimal) -> Result<()> {
        self.inner.set_cash(user_id, new_cash).await
    }
}
