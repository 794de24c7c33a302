use super::access;
use super::cancel::CancelToken;
use super::projection::{Projection, STATS_VIEW};
use super::settlement::{Finalizer, SettlementPath};
use crate::domain::identity::Credential;
use crate::domain::metadata::MetadataKey;
use crate::domain::page::Page;
use crate::domain::ports::{
    AuthVerifierRef, BalanceSnapshot, LedgerGatewayRef, SettlementInstruction, TransactionStoreRef,
};
use crate::domain::transaction::{
    Transaction, TransactionRequest, TransactionStats, TransactionStatus, TransactionType,
    validate_identifier,
};
use crate::error::{BusinessRuleError, GatewayError, Result, ServiceError, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A settled transaction and the balance the ledger reported for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionOutcome {
    pub transaction: Transaction,
    pub new_balance: Decimal,
}

/// Drives one transaction from request to terminal status.
///
/// The orchestrator owns no in-process state; everything it knows lives in
/// the transaction store, the ledger, or the cache projection.
pub struct TransactionOrchestrator {
    transactions: TransactionStoreRef,
    gateway: LedgerGatewayRef,
    auth: AuthVerifierRef,
    projection: Projection,
    settlement: SettlementPath,
    balance_timeout: Duration,
}

impl TransactionOrchestrator {
    pub fn new(
        transactions: TransactionStoreRef,
        gateway: LedgerGatewayRef,
        auth: AuthVerifierRef,
        projection: Projection,
        settlement: SettlementPath,
        balance_timeout: Duration,
    ) -> Self {
        Self {
            transactions,
            gateway,
            auth,
            projection,
            settlement,
            balance_timeout,
        }
    }

    /// Validates, authorizes, persists as PENDING, settles, and records the
    /// terminal status.
    ///
    /// Nothing is written before the request passes validation, identity
    /// checks and (for withdrawals) the balance check. The balance check and
    /// the settlement are not atomic; the ledger remains the final arbiter.
    ///
    /// Once the PENDING record exists the terminal write always happens, even
    /// if `cancel` fires while the ledger call is in flight.
    pub async fn process_transaction(
        &self,
        request: TransactionRequest,
        cancel: &CancelToken,
    ) -> Result<TransactionOutcome> {
        let draft = request.validate()?;
        cancel.check()?;

        let identity = access::authenticate(self.auth.as_ref(), &request.credential).await?;
        access::require_same_user(&identity, &draft.user_id)?;

        if draft.kind == TransactionType::Withdrawal {
            let snapshot = self
                .balance(&draft.account_id, &request.credential, cancel)
                .await?;
            if snapshot.available < draft.amount.value() {
                info!(
                    user_id = %draft.user_id,
                    account_id = %draft.account_id,
                    available = %snapshot.available,
                    requested = %draft.amount,
                    "Withdrawal rejected before persisting"
                );
                return Err(BusinessRuleError::InsufficientBalance {
                    available: snapshot.available,
                    requested: draft.amount.value(),
                }
                .into());
            }
        }

        cancel.check()?;
        self.transactions.insert(&draft).await?;
        debug!(
            transaction_id = %draft.id,
            user_id = %draft.user_id,
            kind = %draft.kind,
            "Transaction persisted as PENDING"
        );

        let id = draft.id;
        let finalized = self
            .settlement
            .settle_and_finalize(
                instruction_for(&draft),
                request.credential.clone(),
                TransactionFinalizer {
                    store: self.transactions.clone(),
                    id,
                },
            )
            .await;

        self.projection.invalidate_transaction(draft.id).await;
        self.projection.invalidate_user(&draft.user_id).await;

        let finalized = finalized?;
        match finalized.receipt {
            Ok(receipt) => {
                info!(
                    transaction_id = %id,
                    status = %finalized.record.status,
                    "Transaction completed"
                );
                Ok(TransactionOutcome {
                    transaction: finalized.record,
                    new_balance: receipt.new_balance,
                })
            }
            Err(e) => {
                warn!(transaction_id = %id, error = %e, "Transaction marked FAILED");
                Err(ServiceError::Downstream(e))
            }
        }
    }

    /// Reads one transaction, cache first. The credential is always verified
    /// and ownership checked, whether the record came from cache or store.
    pub async fn get_transaction(&self, id: Uuid, credential: &Credential) -> Result<Transaction> {
        let identity = access::authenticate(self.auth.as_ref(), credential).await?;
        let key = Projection::transaction_key(id);

        if let Some(cached) = self.projection.read::<Transaction>(&key).await {
            access::require_owner_or_admin(&identity, &cached.user_id)?;
            return Ok(cached);
        }

        let tx = self
            .transactions
            .get(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("transaction {}", id)))?;
        access::require_owner_or_admin(&identity, &tx.user_id)?;
        // PENDING records still change; only terminal ones are cached.
        if tx.status.is_terminal() {
            self.projection.write(&key, &tx).await;
        }
        Ok(tx)
    }

    /// Newest first, one cache entry per (user, limit, offset).
    pub async fn user_transactions(
        &self,
        user_id: &str,
        page: Page,
        credential: &Credential,
    ) -> Result<Vec<Transaction>> {
        validate_identifier("user ID", user_id)?;
        let identity = access::authenticate(self.auth.as_ref(), credential).await?;
        access::require_owner_or_admin(&identity, user_id)?;

        let key = self
            .projection
            .user_key(user_id, &Projection::transactions_view(page))
            .await;
        if let Some(cached) = self.projection.read(&key).await {
            return Ok(cached);
        }
        let rows = self.transactions.list_for_user(user_id, page).await?;
        self.projection.write(&key, &rows).await;
        Ok(rows)
    }

    pub async fn transaction_stats(
        &self,
        user_id: &str,
        credential: &Credential,
    ) -> Result<TransactionStats> {
        validate_identifier("user ID", user_id)?;
        let identity = access::authenticate(self.auth.as_ref(), credential).await?;
        access::require_owner_or_admin(&identity, user_id)?;

        let key = self.projection.user_key(user_id, STATS_VIEW).await;
        if let Some(cached) = self.projection.read(&key).await {
            return Ok(cached);
        }
        let stats = self.transactions.stats_for_user(user_id).await?;
        self.projection.write_stats(&key, &stats).await;
        Ok(stats)
    }

    /// Admin-only audit view of records still PENDING, oldest first. These
    /// are never retried automatically.
    pub async fn pending_transactions(&self, credential: &Credential) -> Result<Vec<Transaction>> {
        let identity = access::authenticate(self.auth.as_ref(), credential).await?;
        access::require_admin(&identity)?;
        Ok(self
            .transactions
            .list_by_status(TransactionStatus::Pending)
            .await?)
    }

    async fn balance(
        &self,
        account_id: &str,
        credential: &Credential,
        cancel: &CancelToken,
    ) -> Result<BalanceSnapshot> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ServiceError::Cancelled),
            result = tokio::time::timeout(self.balance_timeout, self.gateway.balance(account_id, credential)) => {
                match result {
                    Ok(snapshot) => Ok(snapshot?),
                    Err(_) => Err(GatewayError::Timeout(self.balance_timeout).into()),
                }
            }
        }
    }
}

struct TransactionFinalizer {
    store: TransactionStoreRef,
    id: Uuid,
}

#[async_trait]
impl Finalizer for TransactionFinalizer {
    type Record = Transaction;

    async fn finalize(&self, success: bool) -> std::result::Result<Transaction, StoreError> {
        self.store
            .update_status(self.id, TransactionStatus::settled(success), Utc::now())
            .await
    }

    async fn already_settled(
        &self,
        success: bool,
    ) -> std::result::Result<Option<Transaction>, StoreError> {
        let status = TransactionStatus::settled(success);
        Ok(self.store.get(self.id).await?.filter(|tx| tx.status == status))
    }
}

/// Routes a record to the ledger: credits go to the account, debits come
/// from it, and transfers credit the counterparty when one is named.
fn instruction_for(tx: &Transaction) -> SettlementInstruction {
    let account = Some(tx.account_id.clone());
    let (from_account, to_account) = match tx.kind {
        TransactionType::Deposit | TransactionType::Interest => (None, account),
        TransactionType::Withdrawal => (account, None),
        TransactionType::Transfer => (
            account,
            tx.metadata
                .get(MetadataKey::Counterparty)
                .map(str::to_string),
        ),
    };
    SettlementInstruction {
        from_account,
        to_account,
        amount: tx.amount,
        currency: tx.currency.clone(),
        kind: tx.kind,
        description: tx.description.clone(),
        reference: tx.reference.clone(),
        idempotency_key: tx.id.to_string(),
    }
}
