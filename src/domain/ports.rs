use super::accrual::{AccrualStatus, InterestAccrual, InterestRate, Period};
use super::identity::{Credential, Identity};
use super::money::Amount;
use super::page::Page;
use super::transaction::{Transaction, TransactionStats, TransactionStatus, TransactionType};
use crate::error::{AuthError, CacheError, GatewayError, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert(&self, tx: &Transaction) -> Result<(), StoreError>;
    /// Moves a record to `status`; refuses to touch a terminal record.
    async fn update_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
        at: DateTime<Utc>,
    ) -> Result<Transaction, StoreError>;
    async fn get(&self, id: Uuid) -> Result<Option<Transaction>, StoreError>;
    /// Newest first.
    async fn list_for_user(&self, user_id: &str, page: Page)
    -> Result<Vec<Transaction>, StoreError>;
    /// Oldest first.
    async fn list_by_status(
        &self,
        status: TransactionStatus,
    ) -> Result<Vec<Transaction>, StoreError>;
    async fn stats_for_user(&self, user_id: &str) -> Result<TransactionStats, StoreError>;
}

#[async_trait]
pub trait AccrualStore: Send + Sync {
    async fn insert(&self, accrual: &InterestAccrual) -> Result<(), StoreError>;
    async fn update_status(
        &self,
        id: Uuid,
        status: AccrualStatus,
        at: DateTime<Utc>,
    ) -> Result<InterestAccrual, StoreError>;
    async fn find_by_period(
        &self,
        user_id: &str,
        account_id: &str,
        period: Period,
    ) -> Result<Option<InterestAccrual>, StoreError>;
    /// Every PENDING accrual, oldest first.
    async fn list_pending(&self) -> Result<Vec<InterestAccrual>, StoreError>;
    /// Newest first.
    async fn history_for_user(
        &self,
        user_id: &str,
        page: Page,
    ) -> Result<Vec<InterestAccrual>, StoreError>;
}

#[async_trait]
pub trait RateTable: Send + Sync {
    async fn effective_rate(
        &self,
        category: &str,
        as_of: NaiveDate,
    ) -> Result<Option<InterestRate>, StoreError>;
}

/// Balance snapshot reported by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub available: Decimal,
    pub locked: Decimal,
    pub currency: String,
}

/// Everything the ledger needs to move value for one local record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementInstruction {
    pub from_account: Option<String>,
    pub to_account: Option<String>,
    pub amount: Amount,
    pub currency: String,
    pub kind: TransactionType,
    pub description: String,
    pub reference: String,
    /// Id of the local record; stable across retries of the same intent.
    pub idempotency_key: String,
}

impl SettlementInstruction {
    /// The account whose balance the receipt reports.
    pub fn primary_account(&self) -> Option<&str> {
        match self.kind {
            TransactionType::Deposit | TransactionType::Interest => self.to_account.as_deref(),
            TransactionType::Withdrawal | TransactionType::Transfer => {
                self.from_account.as_deref()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub status: String,
    pub new_balance: Decimal,
}

/// The remote system of record for balances.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    async fn balance(
        &self,
        account_id: &str,
        credential: &Credential,
    ) -> Result<BalanceSnapshot, GatewayError>;
    async fn settle(
        &self,
        instruction: &SettlementInstruction,
        credential: &Credential,
    ) -> Result<SettlementReceipt, GatewayError>;
}

#[async_trait]
pub trait AuthVerifier: Send + Sync {
    async fn verify(&self, credential: &Credential) -> Result<Identity, AuthError>;
}

/// Average principal held on an account over a period. The averaging
/// algorithm belongs to the implementation.
#[async_trait]
pub trait AverageBalanceSource: Send + Sync {
    async fn average_balance(&self, account_id: &str, period: Period)
    -> Result<Decimal, GatewayError>;
}

/// Best-effort key/value projection store. Never authoritative.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    /// Returns the number of keys removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError>;
}

pub type TransactionStoreRef = Arc<dyn TransactionStore>;
pub type AccrualStoreRef = Arc<dyn AccrualStore>;
pub type RateTableRef = Arc<dyn RateTable>;
pub type LedgerGatewayRef = Arc<dyn LedgerGateway>;
pub type AuthVerifierRef = Arc<dyn AuthVerifier>;
pub type AverageBalanceSourceRef = Arc<dyn AverageBalanceSource>;
pub type CacheRef = Arc<dyn Cache>;
