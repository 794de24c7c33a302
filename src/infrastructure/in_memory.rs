use crate::domain::accrual::{AccrualStatus, InterestAccrual, InterestRate, Period};
use crate::domain::identity::{Credential, Identity};
use crate::domain::page::Page;
use crate::domain::ports::{
    AccrualStore, AuthVerifier, AverageBalanceSource, BalanceSnapshot, LedgerGateway, RateTable,
    SettlementInstruction, SettlementReceipt, TransactionStore,
};
use crate::domain::transaction::{
    Transaction, TransactionStats, TransactionStatus, TransactionType,
};
use crate::error::{AuthError, GatewayError, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Rows keyed by id, remembering insertion order so listings are stable even
/// when two records share a timestamp.
struct Table<T> {
    rows: HashMap<Uuid, (u64, T)>,
    next_seq: u64,
}

impl<T: Clone> Table<T> {
    fn insert(&mut self, id: Uuid, row: T) -> Result<(), StoreError> {
        if self.rows.contains_key(&id) {
            return Err(StoreError::Duplicate(id.to_string()));
        }
        self.rows.insert(id, (self.next_seq, row));
        self.next_seq += 1;
        Ok(())
    }

    fn oldest_first(&self, filter: impl Fn(&T) -> bool) -> Vec<T> {
        let mut matching: Vec<&(u64, T)> = self.rows.values().filter(|(_, r)| filter(r)).collect();
        matching.sort_by_key(|(seq, _)| *seq);
        matching.into_iter().map(|(_, r)| r.clone()).collect()
    }

    fn newest_first(&self, filter: impl Fn(&T) -> bool) -> Vec<T> {
        let mut rows = self.oldest_first(filter);
        rows.reverse();
        rows
    }
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: HashMap::new(),
            next_seq: 0,
        }
    }
}

/// A thread-safe in-memory store for transactions.
///
/// Uses `Arc<RwLock<..>>` so clones share the same rows.
#[derive(Default, Clone)]
pub struct InMemoryTransactionStore {
    transactions: Arc<RwLock<Table<Transaction>>>,
}

impl InMemoryTransactionStore {
    /// Creates a new, empty in-memory transaction store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, tx: &Transaction) -> Result<(), StoreError> {
        let mut transactions = self.transactions.write().await;
        transactions.insert(tx.id, tx.clone())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
        at: DateTime<Utc>,
    ) -> Result<Transaction, StoreError> {
        let mut transactions = self.transactions.write().await;
        let (_, tx) = transactions
            .rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::Missing(id.to_string()))?;
        tx.transition(status, at)?;
        Ok(tx.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>, StoreError> {
        let transactions = self.transactions.read().await;
        Ok(transactions.rows.get(&id).map(|(_, tx)| tx.clone()))
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        page: Page,
    ) -> Result<Vec<Transaction>, StoreError> {
        let transactions = self.transactions.read().await;
        Ok(page.slice(transactions.newest_first(|tx| tx.user_id == user_id)))
    }

    async fn list_by_status(
        &self,
        status: TransactionStatus,
    ) -> Result<Vec<Transaction>, StoreError> {
        let transactions = self.transactions.read().await;
        Ok(transactions.oldest_first(|tx| tx.status == status))
    }

    async fn stats_for_user(&self, user_id: &str) -> Result<TransactionStats, StoreError> {
        let transactions = self.transactions.read().await;
        Ok(TransactionStats::from_records(
            transactions
                .rows
                .values()
                .map(|(_, tx)| tx)
                .filter(|tx| tx.user_id == user_id),
        ))
    }
}

/// A thread-safe in-memory store for interest accruals.
#[derive(Default, Clone)]
pub struct InMemoryAccrualStore {
    accruals: Arc<RwLock<Table<InterestAccrual>>>,
}

impl InMemoryAccrualStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccrualStore for InMemoryAccrualStore {
    async fn insert(&self, accrual: &InterestAccrual) -> Result<(), StoreError> {
        let mut accruals = self.accruals.write().await;
        accruals.insert(accrual.id, accrual.clone())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: AccrualStatus,
        at: DateTime<Utc>,
    ) -> Result<InterestAccrual, StoreError> {
        let mut accruals = self.accruals.write().await;
        let (_, accrual) = accruals
            .rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::Missing(id.to_string()))?;
        accrual.transition(status, at)?;
        Ok(accrual.clone())
    }

    async fn find_by_period(
        &self,
        user_id: &str,
        account_id: &str,
        period: Period,
    ) -> Result<Option<InterestAccrual>, StoreError> {
        let accruals = self.accruals.read().await;
        Ok(accruals
            .rows
            .values()
            .map(|(_, a)| a)
            .find(|a| a.user_id == user_id && a.account_id == account_id && a.period == period)
            .cloned())
    }

    async fn list_pending(&self) -> Result<Vec<InterestAccrual>, StoreError> {
        let accruals = self.accruals.read().await;
        Ok(accruals.oldest_first(|a| a.status == AccrualStatus::Pending))
    }

    async fn history_for_user(
        &self,
        user_id: &str,
        page: Page,
    ) -> Result<Vec<InterestAccrual>, StoreError> {
        let accruals = self.accruals.read().await;
        Ok(page.slice(accruals.newest_first(|a| a.user_id == user_id)))
    }
}

/// Rate table backed by a fixed list of rates.
#[derive(Default, Clone)]
pub struct StaticRateTable {
    rates: Arc<RwLock<Vec<InterestRate>>>,
}

impl StaticRateTable {
    pub fn new(rates: impl IntoIterator<Item = InterestRate>) -> Self {
        Self {
            rates: Arc::new(RwLock::new(rates.into_iter().collect())),
        }
    }

    pub async fn add(&self, rate: InterestRate) {
        self.rates.write().await.push(rate);
    }
}

#[async_trait]
impl RateTable for StaticRateTable {
    /// Picks the most recently started rate that covers `as_of`.
    async fn effective_rate(
        &self,
        category: &str,
        as_of: NaiveDate,
    ) -> Result<Option<InterestRate>, StoreError> {
        let rates = self.rates.read().await;
        Ok(rates
            .iter()
            .filter(|r| r.category.eq_ignore_ascii_case(category) && r.is_effective_on(as_of))
            .max_by_key(|r| r.effective_from)
            .cloned())
    }
}

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<String, BalanceSnapshot>,
    receipts: HashMap<String, SettlementReceipt>,
}

impl LedgerState {
    fn account_mut(&mut self, id: &str) -> Result<&mut BalanceSnapshot, GatewayError> {
        self.accounts
            .get_mut(id)
            .ok_or_else(|| GatewayError::UnknownAccount(id.to_string()))
    }
}

/// Simulated ledger holding balances in memory.
///
/// Settlements are deduplicated on `idempotency_key`: replaying an instruction
/// returns the first receipt without moving money again. Debits that would
/// overdraw the available balance are rejected.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open_account(
        &self,
        id: impl Into<String>,
        available: Decimal,
        currency: impl Into<String>,
    ) {
        let mut state = self.state.write().await;
        state.accounts.insert(
            id.into(),
            BalanceSnapshot {
                available,
                locked: Decimal::ZERO,
                currency: currency.into(),
            },
        );
    }

    pub async fn lock_funds(&self, id: &str, locked: Decimal) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        state.account_mut(id)?.locked = locked;
        Ok(())
    }

    /// Number of distinct settlements applied.
    pub async fn settled_count(&self) -> usize {
        self.state.read().await.receipts.len()
    }
}

#[async_trait]
impl LedgerGateway for InMemoryLedger {
    async fn balance(
        &self,
        account_id: &str,
        credential: &Credential,
    ) -> Result<BalanceSnapshot, GatewayError> {
        if credential.is_empty() {
            return Err(GatewayError::Rejected("missing credential".into()));
        }
        let state = self.state.read().await;
        state
            .accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownAccount(account_id.to_string()))
    }

    async fn settle(
        &self,
        instruction: &SettlementInstruction,
        credential: &Credential,
    ) -> Result<SettlementReceipt, GatewayError> {
        if credential.is_empty() {
            return Err(GatewayError::Rejected("missing credential".into()));
        }
        let mut state = self.state.write().await;
        if let Some(receipt) = state.receipts.get(&instruction.idempotency_key) {
            return Ok(receipt.clone());
        }

        let amount = instruction.amount.value();
        let from = instruction.from_account.as_deref();
        let to = instruction.to_account.as_deref();
        match instruction.kind {
            TransactionType::Deposit | TransactionType::Interest => {
                let to = to.ok_or_else(|| GatewayError::Rejected("credit without target".into()))?;
                state.account_mut(to)?.available += amount;
            }
            TransactionType::Withdrawal | TransactionType::Transfer => {
                let from =
                    from.ok_or_else(|| GatewayError::Rejected("debit without source".into()))?;
                if let Some(to) = to {
                    state.account_mut(to)?;
                }
                let source = state.account_mut(from)?;
                if source.available < amount {
                    return Err(GatewayError::Rejected(format!(
                        "insufficient funds on {}",
                        from
                    )));
                }
                source.available -= amount;
                if let Some(to) = to {
                    state.account_mut(to)?.available += amount;
                }
            }
        }

        let primary = instruction
            .primary_account()
            .ok_or_else(|| GatewayError::Rejected("no primary account".into()))?;
        let receipt = SettlementReceipt {
            status: "SETTLED".into(),
            new_balance: state.account_mut(primary)?.available,
        };
        state
            .receipts
            .insert(instruction.idempotency_key.clone(), receipt.clone());
        Ok(receipt)
    }
}

#[derive(Clone)]
struct Grant {
    identity: Identity,
    expires_at: Option<DateTime<Utc>>,
}

/// Verifier backed by a fixed token table.
#[derive(Default, Clone)]
pub struct StaticTokenVerifier {
    grants: Arc<RwLock<HashMap<String, Grant>>>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn grant(&self, token: impl Into<String>, identity: Identity) {
        self.insert(token.into(), identity, None).await;
    }

    pub async fn grant_until(
        &self,
        token: impl Into<String>,
        identity: Identity,
        expires_at: DateTime<Utc>,
    ) {
        self.insert(token.into(), identity, Some(expires_at)).await;
    }

    async fn insert(&self, token: String, identity: Identity, expires_at: Option<DateTime<Utc>>) {
        self.grants.write().await.insert(
            token,
            Grant {
                identity,
                expires_at,
            },
        );
    }
}

#[async_trait]
impl AuthVerifier for StaticTokenVerifier {
    async fn verify(&self, credential: &Credential) -> Result<Identity, AuthError> {
        if credential.is_empty() {
            return Err(AuthError::Missing);
        }
        let token = credential.as_str().trim();
        if token.chars().any(char::is_whitespace) {
            return Err(AuthError::Malformed);
        }
        let grants = self.grants.read().await;
        let grant = grants.get(token).ok_or(AuthError::InvalidToken)?;
        if grant.expires_at.is_some_and(|at| at <= Utc::now()) {
            return Err(AuthError::Expired);
        }
        if !grant.identity.active {
            return Err(AuthError::Inactive);
        }
        Ok(grant.identity.clone())
    }
}

/// Average-balance source returning configured constants.
#[derive(Clone)]
pub struct FixedAverageBalance {
    default: Decimal,
    per_account: HashMap<String, Decimal>,
}

impl FixedAverageBalance {
    pub const DEFAULT_BALANCE: Decimal = Decimal::ONE_THOUSAND;

    pub fn new(default: Decimal) -> Self {
        Self {
            default,
            per_account: HashMap::new(),
        }
    }

    pub fn with_account(mut self, account_id: impl Into<String>, balance: Decimal) -> Self {
        self.per_account.insert(account_id.into(), balance);
        self
    }
}

impl Default for FixedAverageBalance {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BALANCE)
    }
}

#[async_trait]
impl AverageBalanceSource for FixedAverageBalance {
    async fn average_balance(
        &self,
        account_id: &str,
        _period: Period,
    ) -> Result<Decimal, GatewayError> {
        Ok(self
            .per_account
            .get(account_id)
            .copied()
            .unwrap_or(self.default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::Role;
    use crate::domain::money::Amount;
    use crate::domain::transaction::TransactionRequest;
    use rust_decimal_macros::dec;

    fn pending_tx(user: &str) -> Transaction {
        TransactionRequest::new(
            user,
            "acc-1",
            dec!(10),
            "USD",
            TransactionType::Deposit,
            Credential::new("t"),
        )
        .validate()
        .unwrap()
    }

    fn instruction(kind: TransactionType, key: &str, amount: Decimal) -> SettlementInstruction {
        let (from, to) = match kind {
            TransactionType::Deposit | TransactionType::Interest => (None, Some("acc-1".into())),
            _ => (Some("acc-1".into()), None),
        };
        SettlementInstruction {
            from_account: from,
            to_account: to,
            amount: Amount::new(amount).unwrap(),
            currency: "USD".into(),
            kind,
            description: String::new(),
            reference: String::new(),
            idempotency_key: key.into(),
        }
    }

    #[tokio::test]
    async fn test_in_memory_transaction_store() {
        let store = InMemoryTransactionStore::new();
        let tx = pending_tx("alice");

        store.insert(&tx).await.unwrap();
        assert_eq!(store.get(tx.id).await.unwrap().unwrap(), tx);
        assert!(matches!(
            store.insert(&tx).await,
            Err(StoreError::Duplicate(_))
        ));
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_status_is_one_way() {
        let store = InMemoryTransactionStore::new();
        let tx = pending_tx("alice");
        store.insert(&tx).await.unwrap();

        let done = store
            .update_status(tx.id, TransactionStatus::Completed, Utc::now())
            .await
            .unwrap();
        assert_eq!(done.status, TransactionStatus::Completed);

        let again = store
            .update_status(tx.id, TransactionStatus::Failed, Utc::now())
            .await;
        assert!(matches!(again, Err(StoreError::Transition(_))));

        let missing = store
            .update_status(Uuid::new_v4(), TransactionStatus::Failed, Utc::now())
            .await;
        assert!(matches!(missing, Err(StoreError::Missing(_))));
    }

    #[tokio::test]
    async fn test_listing_order_and_paging() {
        let store = InMemoryTransactionStore::new();
        let first = pending_tx("alice");
        let second = pending_tx("alice");
        let other = pending_tx("bob");
        for tx in [&first, &second, &other] {
            store.insert(tx).await.unwrap();
        }

        let listed = store.list_for_user("alice", Page::default()).await.unwrap();
        assert_eq!(
            listed.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![second.id, first.id]
        );

        let paged = store
            .list_for_user("alice", Page::new(1, 1).unwrap())
            .await
            .unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].id, first.id);

        let pending = store
            .list_by_status(TransactionStatus::Pending)
            .await
            .unwrap();
        assert_eq!(pending.first().map(|t| t.id), Some(first.id));
        assert_eq!(pending.len(), 3);
    }

    #[tokio::test]
    async fn test_rate_table_picks_latest_effective() {
        let day = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        let table = StaticRateTable::new([
            InterestRate {
                category: "SAVINGS".into(),
                annual_rate: dec!(4.0),
                effective_from: day(2023, 1, 1),
                effective_to: None,
            },
            InterestRate {
                category: "SAVINGS".into(),
                annual_rate: dec!(6.0),
                effective_from: day(2024, 1, 1),
                effective_to: None,
            },
        ]);

        let rate = table
            .effective_rate("savings", day(2024, 1, 31))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rate.annual_rate, dec!(6.0));

        let older = table
            .effective_rate("SAVINGS", day(2023, 6, 30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(older.annual_rate, dec!(4.0));

        assert!(
            table
                .effective_rate("CHECKING", day(2024, 1, 31))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_ledger_settles_once_per_key() {
        let ledger = InMemoryLedger::new();
        ledger.open_account("acc-1", dec!(1000.00), "USD").await;
        let credential = Credential::new("t");

        let deposit = instruction(TransactionType::Deposit, "k1", dec!(100.00));
        let receipt = ledger.settle(&deposit, &credential).await.unwrap();
        assert_eq!(receipt.new_balance, dec!(1100.00));

        let replay = ledger.settle(&deposit, &credential).await.unwrap();
        assert_eq!(replay.new_balance, dec!(1100.00));
        assert_eq!(ledger.settled_count().await, 1);

        let overdraw = instruction(TransactionType::Withdrawal, "k2", dec!(5000));
        assert!(matches!(
            ledger.settle(&overdraw, &credential).await,
            Err(GatewayError::Rejected(_))
        ));
        let snapshot = ledger.balance("acc-1", &credential).await.unwrap();
        assert_eq!(snapshot.available, dec!(1100.00));
    }

    #[tokio::test]
    async fn test_ledger_unknown_account() {
        let ledger = InMemoryLedger::new();
        let result = ledger
            .settle(
                &instruction(TransactionType::Deposit, "k", dec!(1)),
                &Credential::new("t"),
            )
            .await;
        assert!(matches!(result, Err(GatewayError::UnknownAccount(_))));
    }

    #[tokio::test]
    async fn test_token_verifier() {
        let verifier = StaticTokenVerifier::new();
        verifier
            .grant("alice-token", Identity::new("alice", [Role::Customer]))
            .await;
        let mut dormant = Identity::new("dora", [Role::Customer]);
        dormant.active = false;
        verifier.grant("dora-token", dormant).await;
        verifier
            .grant_until(
                "old-token",
                Identity::new("olga", [Role::Customer]),
                Utc::now() - chrono::Duration::minutes(1),
            )
            .await;

        let alice = verifier
            .verify(&Credential::new("alice-token"))
            .await
            .unwrap();
        assert_eq!(alice.user_id, "alice");
        assert_eq!(
            verifier.verify(&Credential::new("")).await,
            Err(AuthError::Missing)
        );
        assert_eq!(
            verifier.verify(&Credential::new("a b")).await,
            Err(AuthError::Malformed)
        );
        assert_eq!(
            verifier.verify(&Credential::new("nope")).await,
            Err(AuthError::InvalidToken)
        );
        assert_eq!(
            verifier.verify(&Credential::new("dora-token")).await,
            Err(AuthError::Inactive)
        );
        assert_eq!(
            verifier.verify(&Credential::new("old-token")).await,
            Err(AuthError::Expired)
        );
    }

    #[tokio::test]
    async fn test_fixed_average_balance() {
        let source = FixedAverageBalance::default().with_account("rich", dec!(50000));
        let period: Period = "2024-01".parse().unwrap();
        assert_eq!(
            source.average_balance("acc-1", period).await.unwrap(),
            dec!(1000)
        );
        assert_eq!(
            source.average_balance("rich", period).await.unwrap(),
            dec!(50000)
        );
    }
}
