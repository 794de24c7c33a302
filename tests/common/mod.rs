#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use ledger_sync::application::{Collaborators, Services};
use ledger_sync::config::ServiceConfig;
use ledger_sync::domain::accrual::{AccrualStatus, InterestAccrual, InterestRate, Period};
use ledger_sync::domain::identity::{Credential, Identity};
use ledger_sync::domain::page::Page;
use ledger_sync::domain::ports::{
    AccrualStore, BalanceSnapshot, Cache, CacheRef, LedgerGateway, SettlementInstruction,
    SettlementReceipt, TransactionStore,
};
use ledger_sync::domain::transaction::{
    Transaction, TransactionRequest, TransactionStats, TransactionStatus, TransactionType,
};
use ledger_sync::error::{CacheError, GatewayError, StoreError};
use ledger_sync::infrastructure::cache::InMemoryCache;
use ledger_sync::infrastructure::in_memory::{
    FixedAverageBalance, InMemoryAccrualStore, InMemoryLedger, InMemoryTransactionStore,
    StaticRateTable, StaticTokenVerifier,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

pub const ALICE: &str = "alice-token";
pub const BOB: &str = "bob-token";
pub const ADMIN: &str = "admin-token";
pub const ALICE_ACCOUNT: &str = "acc-alice";
pub const BOB_ACCOUNT: &str = "acc-bob";

/// How the scripted gateway answers `settle`.
#[derive(Debug, Clone)]
pub enum SettleMode {
    Pass,
    Fail(GatewayError),
    /// Never answers; the settlement timeout decides.
    Hang,
    /// Answers after a delay.
    Slow(Duration),
}

/// Ledger double: delegates to an [`InMemoryLedger`] unless scripted
/// otherwise, and counts calls.
pub struct ScriptedGateway {
    pub ledger: InMemoryLedger,
    mode: Mutex<SettleMode>,
    fail_balance: AtomicBool,
    pub balance_calls: AtomicUsize,
    pub settle_calls: AtomicUsize,
    fail_keys: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    pub fn new(ledger: InMemoryLedger) -> Self {
        Self {
            ledger,
            mode: Mutex::new(SettleMode::Pass),
            fail_balance: AtomicBool::new(false),
            balance_calls: AtomicUsize::new(0),
            settle_calls: AtomicUsize::new(0),
            fail_keys: Mutex::new(Vec::new()),
        }
    }

    pub fn set_mode(&self, mode: SettleMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn fail_balance_queries(&self, fail: bool) {
        self.fail_balance.store(fail, Ordering::SeqCst);
    }

    /// Rejects settlement for one specific idempotency key.
    pub fn reject_key(&self, key: impl Into<String>) {
        self.fail_keys.lock().unwrap().push(key.into());
    }

    pub fn settle_calls(&self) -> usize {
        self.settle_calls.load(Ordering::SeqCst)
    }

    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerGateway for ScriptedGateway {
    async fn balance(
        &self,
        account_id: &str,
        credential: &Credential,
    ) -> Result<BalanceSnapshot, GatewayError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_balance.load(Ordering::SeqCst) {
            return Err(GatewayError::Unreachable("balance service down".into()));
        }
        self.ledger.balance(account_id, credential).await
    }

    async fn settle(
        &self,
        instruction: &SettlementInstruction,
        credential: &Credential,
    ) -> Result<SettlementReceipt, GatewayError> {
        self.settle_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_keys
            .lock()
            .unwrap()
            .contains(&instruction.idempotency_key)
        {
            return Err(GatewayError::Rejected("scripted rejection".into()));
        }
        let mode = self.mode.lock().unwrap().clone();
        match mode {
            SettleMode::Pass => self.ledger.settle(instruction, credential).await,
            SettleMode::Fail(e) => Err(e),
            SettleMode::Hang => std::future::pending().await,
            SettleMode::Slow(delay) => {
                tokio::time::sleep(delay).await;
                self.ledger.settle(instruction, credential).await
            }
        }
    }
}

/// Transaction store double that can fail inserts or a number of status
/// updates, counts reads and can pause a read mid-flight.
#[derive(Default)]
pub struct FlakyTransactionStore {
    pub inner: InMemoryTransactionStore,
    fail_inserts: AtomicBool,
    failing_updates: AtomicU32,
    pub gets: AtomicUsize,
    pub list_calls: AtomicUsize,
    get_hold: Mutex<Option<Pause>>,
    list_hold: Mutex<Option<Pause>>,
}

type Pause = (oneshot::Sender<()>, oneshot::Receiver<()>);

/// Pauses one store read after it has loaded its rows.
pub struct Hold {
    /// Fires once the read has happened.
    pub reached: oneshot::Receiver<()>,
    /// Lets the paused read return.
    pub release: oneshot::Sender<()>,
}

impl Hold {
    fn arm(slot: &Mutex<Option<Pause>>) -> Self {
        let (reached_tx, reached) = oneshot::channel();
        let (release, release_rx) = oneshot::channel();
        *slot.lock().unwrap() = Some((reached_tx, release_rx));
        Hold { reached, release }
    }
}

async fn pause_if_held(slot: &Mutex<Option<Pause>>) {
    let pause = slot.lock().unwrap().take();
    if let Some((reached, release)) = pause {
        let _ = reached.send(());
        let _ = release.await;
    }
}

impl FlakyTransactionStore {
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// The next `n` status updates fail with `Unavailable`.
    pub fn fail_next_updates(&self, n: u32) {
        self.failing_updates.store(n, Ordering::SeqCst);
    }

    pub fn hold_next_get(&self) -> Hold {
        Hold::arm(&self.get_hold)
    }

    pub fn hold_next_list(&self) -> Hold {
        Hold::arm(&self.list_hold)
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn take_update_failure(&self) -> bool {
        self.failing_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl TransactionStore for FlakyTransactionStore {
    async fn insert(&self, tx: &Transaction) -> Result<(), StoreError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("scripted insert failure".into()));
        }
        self.inner.insert(tx).await
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
        at: DateTime<Utc>,
    ) -> Result<Transaction, StoreError> {
        if self.take_update_failure() {
            return Err(StoreError::Unavailable("scripted update failure".into()));
        }
        self.inner.update_status(id, status, at).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let row = self.inner.get(id).await;
        pause_if_held(&self.get_hold).await;
        row
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        page: Page,
    ) -> Result<Vec<Transaction>, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let rows = self.inner.list_for_user(user_id, page).await;
        pause_if_held(&self.list_hold).await;
        rows
    }

    async fn list_by_status(
        &self,
        status: TransactionStatus,
    ) -> Result<Vec<Transaction>, StoreError> {
        self.inner.list_by_status(status).await
    }

    async fn stats_for_user(&self, user_id: &str) -> Result<TransactionStats, StoreError> {
        self.inner.stats_for_user(user_id).await
    }
}

/// Accrual store double that can fail a number of status updates.
#[derive(Default)]
pub struct FlakyAccrualStore {
    pub inner: InMemoryAccrualStore,
    failing_updates: AtomicU32,
}

impl FlakyAccrualStore {
    pub fn fail_next_updates(&self, n: u32) {
        self.failing_updates.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl AccrualStore for FlakyAccrualStore {
    async fn insert(&self, accrual: &InterestAccrual) -> Result<(), StoreError> {
        self.inner.insert(accrual).await
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: AccrualStatus,
        at: DateTime<Utc>,
    ) -> Result<InterestAccrual, StoreError> {
        if self
            .failing_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Unavailable("scripted update failure".into()));
        }
        self.inner.update_status(id, status, at).await
    }

    async fn find_by_period(
        &self,
        user_id: &str,
        account_id: &str,
        period: Period,
    ) -> Result<Option<InterestAccrual>, StoreError> {
        self.inner.find_by_period(user_id, account_id, period).await
    }

    async fn list_pending(&self) -> Result<Vec<InterestAccrual>, StoreError> {
        self.inner.list_pending().await
    }

    async fn history_for_user(
        &self,
        user_id: &str,
        page: Page,
    ) -> Result<Vec<InterestAccrual>, StoreError> {
        self.inner.history_for_user(user_id, page).await
    }
}

/// Cache whose every operation fails.
pub struct BrokenCache;

#[async_trait]
impl Cache for BrokenCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Err(CacheError::Unavailable("cache down".into()))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("cache down".into()))
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("cache down".into()))
    }

    async fn delete_prefix(&self, _prefix: &str) -> Result<usize, CacheError> {
        Err(CacheError::Unavailable("cache down".into()))
    }
}

pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.gateway.balance_timeout_ms = 200;
    config.gateway.settle_timeout_ms = 200;
    config.gateway.finalize_attempts = 3;
    config
}

pub fn savings_rate(annual: Decimal) -> InterestRate {
    InterestRate {
        category: "SAVINGS".into(),
        annual_rate: annual,
        effective_from: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
        effective_to: None,
    }
}

pub struct Harness {
    pub services: Services,
    pub gateway: Arc<ScriptedGateway>,
    pub transactions: Arc<FlakyTransactionStore>,
    pub accruals: Arc<FlakyAccrualStore>,
    pub rates: StaticRateTable,
    pub cache: InMemoryCache,
}

pub struct HarnessBuilder {
    config: ServiceConfig,
    cache: Option<CacheRef>,
    average_balance: Decimal,
    rates: Vec<InterestRate>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            config: test_config(),
            cache: None,
            average_balance: dec!(1000.00),
            rates: vec![savings_rate(dec!(6.0))],
        }
    }

    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cache(mut self, cache: CacheRef) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn average_balance(mut self, balance: Decimal) -> Self {
        self.average_balance = balance;
        self
    }

    pub fn rates(mut self, rates: Vec<InterestRate>) -> Self {
        self.rates = rates;
        self
    }

    pub async fn build(self) -> Harness {
        let ledger = InMemoryLedger::new();
        ledger.open_account(ALICE_ACCOUNT, dec!(1000.00), "USD").await;
        ledger.open_account(BOB_ACCOUNT, dec!(500.00), "USD").await;

        let auth = StaticTokenVerifier::new();
        auth.grant(ALICE, Identity::from_claims("alice", ["ROLE_USER"], true))
            .await;
        auth.grant(BOB, Identity::from_claims("bob", ["USER"], true))
            .await;
        auth.grant(ADMIN, Identity::from_claims("ops", ["ROLE_ADMIN"], true))
            .await;

        let gateway = Arc::new(ScriptedGateway::new(ledger));
        let transactions = Arc::new(FlakyTransactionStore::default());
        let accruals = Arc::new(FlakyAccrualStore::default());
        let rates = StaticRateTable::new(self.rates);
        let cache = InMemoryCache::new();

        let collaborators = Collaborators {
            transactions: transactions.clone(),
            accruals: accruals.clone(),
            rates: Arc::new(rates.clone()),
            gateway: gateway.clone(),
            auth: Arc::new(auth),
            balances: Arc::new(FixedAverageBalance::new(self.average_balance)),
            cache: self.cache.unwrap_or_else(|| Arc::new(cache.clone())),
        };

        Harness {
            services: Services::build(collaborators, &self.config),
            gateway,
            transactions,
            accruals,
            rates,
            cache,
        }
    }
}

pub async fn harness() -> Harness {
    HarnessBuilder::new().build().await
}

pub fn request(
    kind: TransactionType,
    user: &str,
    account: &str,
    amount: Decimal,
    token: &str,
) -> TransactionRequest {
    TransactionRequest::new(user, account, amount, "USD", kind, Credential::new(token))
}

pub fn deposit(amount: Decimal) -> TransactionRequest {
    request(TransactionType::Deposit, "alice", ALICE_ACCOUNT, amount, ALICE)
}

pub fn withdrawal(amount: Decimal) -> TransactionRequest {
    request(TransactionType::Withdrawal, "alice", ALICE_ACCOUNT, amount, ALICE)
}

pub fn credential(token: &str) -> Credential {
    Credential::new(token)
}

pub fn period(raw: &str) -> Period {
    raw.parse().unwrap()
}
