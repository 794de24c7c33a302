use crate::domain::accrual::{AccrualStatus, InterestAccrual, Period};
use crate::domain::page::Page;
use crate::domain::ports::{AccrualStore, TransactionStore};
use crate::domain::transaction::{Transaction, TransactionStats, TransactionStatus};
use crate::error::{StoreError, TransitionError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Column Family for transaction records.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Column Family for interest accruals.
pub const CF_ACCRUALS: &str = "accruals";

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Unavailable(format!("RocksDB error: {}", e))
    }
}

/// A persistent store implementation using RocksDB.
///
/// Transactions and accruals live in separate Column Families, keyed by the
/// record's UUID bytes and encoded as JSON.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
/// Writes go through a shared lock so an insert check or a status
/// transition cannot interleave with another write to the same row.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    writes: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_transactions = ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Options::default());
        let cf_accruals = ColumnFamilyDescriptor::new(CF_ACCRUALS, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_transactions, cf_accruals])?;

        Ok(Self {
            db: Arc::new(db),
            writes: Arc::new(Mutex::new(())),
        })
    }

    async fn put_new<T: Serialize>(
        &self,
        cf_name: &str,
        id: Uuid,
        row: &T,
    ) -> Result<(), StoreError> {
        let _guard = self.writes.lock().await;
        let cf = self.cf(cf_name)?;
        if self.db.get_pinned_cf(cf, id.as_bytes())?.is_some() {
            return Err(StoreError::Duplicate(id.to_string()));
        }
        let value = serde_json::to_vec(row)
            .map_err(|e| StoreError::Codec(format!("Serialization error: {}", e)))?;
        self.db.put_cf(cf, id.as_bytes(), value)?;
        Ok(())
    }

    fn put<T: Serialize>(&self, cf_name: &str, id: Uuid, row: &T) -> Result<(), StoreError> {
        let cf = self.cf(cf_name)?;
        let value = serde_json::to_vec(row)
            .map_err(|e| StoreError::Codec(format!("Serialization error: {}", e)))?;
        self.db.put_cf(cf, id.as_bytes(), value)?;
        Ok(())
    }

    /// Loads a row, applies `change` and writes it back, all under the write
    /// lock.
    async fn modify<T, F>(&self, cf_name: &str, id: Uuid, change: F) -> Result<T, StoreError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> Result<(), TransitionError>,
    {
        let _guard = self.writes.lock().await;
        let mut row: T = self
            .load(cf_name, id)?
            .ok_or_else(|| StoreError::Missing(id.to_string()))?;
        change(&mut row)?;
        self.put(cf_name, id, &row)?;
        Ok(row)
    }

    fn load<T: DeserializeOwned>(&self, cf_name: &str, id: Uuid) -> Result<Option<T>, StoreError> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>, StoreError> {
        let cf = self.cf(cf_name)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = item?;
            rows.push(decode(&value)?);
        }
        Ok(rows)
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Unavailable(format!("{} column family not found", name)))
    }

    fn transactions(&self) -> Result<Vec<Transaction>, StoreError> {
        let mut rows: Vec<Transaction> = self.scan(CF_TRANSACTIONS)?;
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    fn accruals(&self) -> Result<Vec<InterestAccrual>, StoreError> {
        let mut rows: Vec<InterestAccrual> = self.scan(CF_ACCRUALS)?;
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes)
        .map_err(|e| StoreError::Codec(format!("Deserialization error: {}", e)))
}

#[async_trait]
impl TransactionStore for RocksDBStore {
    async fn insert(&self, tx: &Transaction) -> Result<(), StoreError> {
        self.put_new(CF_TRANSACTIONS, tx.id, tx).await
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
        at: DateTime<Utc>,
    ) -> Result<Transaction, StoreError> {
        self.modify(CF_TRANSACTIONS, id, |tx: &mut Transaction| {
            tx.transition(status, at)
        })
        .await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>, StoreError> {
        self.load(CF_TRANSACTIONS, id)
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        page: Page,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = self.transactions()?;
        Ok(page.slice(rows.into_iter().rev().filter(|tx| tx.user_id == user_id)))
    }

    async fn list_by_status(
        &self,
        status: TransactionStatus,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = self.transactions()?;
        Ok(rows.into_iter().filter(|tx| tx.status == status).collect())
    }

    async fn stats_for_user(&self, user_id: &str) -> Result<TransactionStats, StoreError> {
        let rows = self.transactions()?;
        Ok(TransactionStats::from_records(
            rows.iter().filter(|tx| tx.user_id == user_id),
        ))
    }
}

#[async_trait]
impl AccrualStore for RocksDBStore {
    async fn insert(&self, accrual: &InterestAccrual) -> Result<(), StoreError> {
        self.put_new(CF_ACCRUALS, accrual.id, accrual).await
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: AccrualStatus,
        at: DateTime<Utc>,
    ) -> Result<InterestAccrual, StoreError> {
        self.modify(CF_ACCRUALS, id, |accrual: &mut InterestAccrual| {
            accrual.transition(status, at)
        })
        .await
    }

    async fn find_by_period(
        &self,
        user_id: &str,
        account_id: &str,
        period: Period,
    ) -> Result<Option<InterestAccrual>, StoreError> {
        Ok(self
            .accruals()?
            .into_iter()
            .find(|a| a.user_id == user_id && a.account_id == account_id && a.period == period))
    }

    async fn list_pending(&self) -> Result<Vec<InterestAccrual>, StoreError> {
        Ok(self
            .accruals()?
            .into_iter()
            .filter(|a| a.status == AccrualStatus::Pending)
            .collect())
    }

    async fn history_for_user(
        &self,
        user_id: &str,
        page: Page,
    ) -> Result<Vec<InterestAccrual>, StoreError> {
        let rows = self.accruals()?;
        Ok(page.slice(rows.into_iter().rev().filter(|a| a.user_id == user_id)))
    }
}
