//! The settle-then-finalize step shared by transactions and accruals.

use crate::domain::identity::Credential;
use crate::domain::ports::{LedgerGatewayRef, SettlementInstruction, SettlementReceipt};
use crate::error::{GatewayError, ServiceError, StoreError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{error, info, warn};

/// Outcome of a settlement whose terminal status has been durably written.
#[derive(Debug)]
pub struct Finalized<T> {
    /// The record as persisted in its terminal state.
    pub record: T,
    pub receipt: Result<SettlementReceipt, GatewayError>,
}

/// Writes the terminal status of one record once its settlement outcome is
/// known.
#[async_trait]
pub trait Finalizer: Send + Sync + 'static {
    type Record: Send + 'static;

    async fn finalize(&self, success: bool) -> Result<Self::Record, StoreError>;

    /// The stored record, if it already holds the terminal status matching
    /// `success`.
    async fn already_settled(&self, success: bool) -> Result<Option<Self::Record>, StoreError>;
}

#[derive(Clone)]
pub struct SettlementPath {
    gateway: LedgerGatewayRef,
    settle_timeout: Duration,
    finalize_attempts: u32,
}

impl SettlementPath {
    pub fn new(
        gateway: LedgerGatewayRef,
        settle_timeout: Duration,
        finalize_attempts: u32,
    ) -> Self {
        Self {
            gateway,
            settle_timeout,
            finalize_attempts: finalize_attempts.max(1),
        }
    }

    /// Calls the ledger, treating a missed deadline as a failed settlement.
    pub async fn settle(
        &self,
        instruction: &SettlementInstruction,
        credential: &Credential,
    ) -> Result<SettlementReceipt, GatewayError> {
        tokio::time::timeout(self.settle_timeout, self.gateway.settle(instruction, credential))
            .await
            .unwrap_or(Err(GatewayError::Timeout(self.settle_timeout)))
    }

    /// Settles `instruction` and then writes the terminal status through
    /// `finalizer`.
    ///
    /// Both steps run in their own task, so once the ledger has been called
    /// the terminal write completes even if the caller's future is dropped.
    /// If the write still fails after every attempt the record stays PENDING
    /// for the audit listing and the caller gets `Persistence`.
    ///
    /// A concurrent run that already recorded the same outcome counts as
    /// success: the ledger deduplicates on the idempotency key, so both runs
    /// describe one settlement.
    pub async fn settle_and_finalize<F: Finalizer>(
        &self,
        instruction: SettlementInstruction,
        credential: Credential,
        finalizer: F,
    ) -> Result<Finalized<F::Record>, ServiceError> {
        let path = self.clone();
        let task = tokio::spawn(async move {
            let receipt = path.settle(&instruction, &credential).await;
            match &receipt {
                Ok(r) => info!(
                    record_id = %instruction.idempotency_key,
                    kind = %instruction.kind,
                    new_balance = %r.new_balance,
                    "Settlement accepted"
                ),
                Err(e) => warn!(
                    record_id = %instruction.idempotency_key,
                    kind = %instruction.kind,
                    error = %e,
                    "Settlement failed"
                ),
            }
            let written = path
                .write_terminal(&instruction.idempotency_key, receipt.is_ok(), &finalizer)
                .await;
            (receipt, written)
        });

        let (receipt, written) = task
            .await
            .map_err(|e| ServiceError::Internal(format!("settlement task aborted: {}", e)))?;

        match written {
            Ok(record) => Ok(Finalized { record, receipt }),
            Err(e) => Err(ServiceError::Persistence(e)),
        }
    }

    async fn write_terminal<F: Finalizer>(
        &self,
        record_id: &str,
        success: bool,
        finalizer: &F,
    ) -> Result<F::Record, StoreError> {
        let mut attempt = 1;
        loop {
            match finalizer.finalize(success).await {
                Ok(record) => return Ok(record),
                Err(e @ StoreError::Transition(_)) => {
                    return match finalizer.already_settled(success).await {
                        Ok(Some(record)) => {
                            info!(
                                record_id,
                                settled = success,
                                "Terminal status already recorded"
                            );
                            Ok(record)
                        }
                        Ok(None) => {
                            error!(record_id, error = %e, "Terminal status rejected");
                            Err(e)
                        }
                        Err(reload) => {
                            error!(
                                record_id,
                                error = %e,
                                reload_error = %reload,
                                "Terminal status rejected"
                            );
                            Err(e)
                        }
                    };
                }
                Err(e) if attempt < self.finalize_attempts => {
                    warn!(record_id, attempt, error = %e, "Retrying terminal status write");
                    tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        record_id,
                        attempts = attempt,
                        settled = success,
                        error = %e,
                        "Terminal status write failed; record left PENDING"
                    );
                    return Err(e);
                }
            }
        }
    }
}
