use super::access;
use super::cancel::CancelToken;
use super::projection::Projection;
use super::settlement::{Finalizer, SettlementPath};
use crate::config::{InterestConfig, RateAnchor};
use crate::domain::accrual::{
    AccrualStatus, InterestAccrual, InterestCalculation, Period, monthly_interest,
};
use crate::domain::identity::Credential;
use crate::domain::money::Amount;
use crate::domain::page::Page;
use crate::domain::ports::{
    AccrualStoreRef, AuthVerifierRef, AverageBalanceSourceRef, RateTableRef,
    SettlementInstruction,
};
use crate::domain::transaction::{TransactionType, validate_identifier};
use crate::error::{BusinessRuleError, Result, ServiceError, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

/// Result of one accrual visited by the reconciliation sweep.
#[derive(Debug)]
pub struct AccrualResult {
    pub accrual_id: Uuid,
    pub user_id: String,
    pub account_id: String,
    pub period: Period,
    pub amount: Decimal,
    pub error: Option<ServiceError>,
}

impl AccrualResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub results: Vec<AccrualResult>,
    pub total: usize,
    pub success_count: usize,
    pub failure_count: usize,
}

/// Computes monthly interest and applies it through the ledger.
pub struct InterestEngine {
    accruals: AccrualStoreRef,
    rates: RateTableRef,
    balances: AverageBalanceSourceRef,
    auth: AuthVerifierRef,
    projection: Projection,
    settlement: SettlementPath,
    config: InterestConfig,
}

impl InterestEngine {
    pub fn new(
        accruals: AccrualStoreRef,
        rates: RateTableRef,
        balances: AverageBalanceSourceRef,
        auth: AuthVerifierRef,
        projection: Projection,
        settlement: SettlementPath,
        config: InterestConfig,
    ) -> Self {
        Self {
            accruals,
            rates,
            balances,
            auth,
            projection,
            settlement,
            config,
        }
    }

    /// Pure calculation: nothing is persisted.
    ///
    /// Fails with `DuplicatePeriod` if an accrual in any status already exists
    /// for the (user, account, period).
    pub async fn calculate_monthly_interest(
        &self,
        user_id: &str,
        account_id: &str,
        period: Period,
    ) -> Result<InterestCalculation> {
        validate_identifier("user ID", user_id)?;
        validate_identifier("account ID", account_id)?;

        let as_of = match self.config.rate_anchor {
            RateAnchor::PeriodEnd => period.last_day(),
            RateAnchor::Now => Utc::now().date_naive(),
        };
        let rate = self
            .rates
            .effective_rate(&self.config.account_category, as_of)
            .await?
            .ok_or_else(|| BusinessRuleError::NoApplicableRate {
                category: self.config.account_category.clone(),
            })?;

        if self
            .accruals
            .find_by_period(user_id, account_id, period)
            .await?
            .is_some()
        {
            return Err(BusinessRuleError::DuplicatePeriod {
                period: period.to_string(),
            }
            .into());
        }

        let principal = self.balances.average_balance(account_id, period).await?;
        Ok(InterestCalculation {
            user_id: user_id.to_string(),
            account_id: account_id.to_string(),
            period,
            principal,
            interest: monthly_interest(principal, rate.annual_rate),
            rate: rate.annual_rate,
        })
    }

    /// Calculates, persists a PENDING accrual, and settles it as an INTEREST
    /// credit. The caller must own the account or be an administrator.
    pub async fn apply_interest(
        &self,
        user_id: &str,
        account_id: &str,
        period: Period,
        credential: &Credential,
        cancel: &CancelToken,
    ) -> Result<InterestAccrual> {
        cancel.check()?;
        let identity = access::authenticate(self.auth.as_ref(), credential).await?;
        access::require_owner_or_admin(&identity, user_id)?;

        let calculation = self
            .calculate_monthly_interest(user_id, account_id, period)
            .await?;
        let interest = Amount::new(calculation.interest).map_err(|_| {
            BusinessRuleError::NothingToAccrue {
                period: period.to_string(),
            }
        })?;

        cancel.check()?;
        let accrual = InterestAccrual::pending(&calculation, interest);
        self.accruals.insert(&accrual).await?;
        info!(
            accrual_id = %accrual.id,
            user_id,
            account_id,
            period = %period,
            interest = %interest,
            "Accrual persisted as PENDING"
        );

        self.settle_accrual(&accrual, credential).await
    }

    /// Reconciliation sweep: retries settlement of every PENDING accrual,
    /// oldest first, using the amount already stored on it.
    ///
    /// Safe to re-run: terminal accruals are never selected, and the ledger
    /// sees the same idempotency key on every retry. Administrators only.
    pub async fn process_pending_accruals(
        &self,
        credential: &Credential,
        cancel: &CancelToken,
    ) -> Result<SweepReport> {
        let identity = access::authenticate(self.auth.as_ref(), credential).await?;
        access::require_admin(&identity)?;

        let pending = self.accruals.list_pending().await?;
        let mut report = SweepReport {
            total: pending.len(),
            ..SweepReport::default()
        };

        for accrual in pending {
            let error = if cancel.is_cancelled() {
                Some(ServiceError::Cancelled)
            } else {
                self.settle_accrual(&accrual, credential).await.err()
            };
            if let Some(e) = &error {
                warn!(accrual_id = %accrual.id, error = %e, "Sweep could not apply accrual");
            }
            report.results.push(AccrualResult {
                accrual_id: accrual.id,
                user_id: accrual.user_id,
                account_id: accrual.account_id,
                period: accrual.period,
                amount: accrual.interest.value(),
                error,
            });
        }

        report.success_count = report.results.iter().filter(|r| r.is_success()).count();
        report.failure_count = report.total - report.success_count;
        info!(
            total = report.total,
            applied = report.success_count,
            failed = report.failure_count,
            "Accrual sweep finished"
        );
        Ok(report)
    }

    /// Newest first, cached per (user, limit, offset).
    pub async fn accrual_history(
        &self,
        user_id: &str,
        page: Page,
        credential: &Credential,
    ) -> Result<Vec<InterestAccrual>> {
        validate_identifier("user ID", user_id)?;
        let identity = access::authenticate(self.auth.as_ref(), credential).await?;
        access::require_owner_or_admin(&identity, user_id)?;

        let key = self
            .projection
            .user_key(user_id, &Projection::accruals_view(page))
            .await;
        if let Some(cached) = self.projection.read(&key).await {
            return Ok(cached);
        }
        let rows = self.accruals.history_for_user(user_id, page).await?;
        self.projection.write(&key, &rows).await;
        Ok(rows)
    }

    async fn settle_accrual(
        &self,
        accrual: &InterestAccrual,
        credential: &Credential,
    ) -> Result<InterestAccrual> {
        let key = accrual.id.to_string();
        let instruction = SettlementInstruction {
            from_account: None,
            to_account: Some(accrual.account_id.clone()),
            amount: accrual.interest,
            currency: self.config.currency.clone(),
            kind: TransactionType::Interest,
            description: format!("Interest for {}", accrual.period),
            reference: key.clone(),
            idempotency_key: key,
        };

        let id = accrual.id;
        let finalizer = AccrualFinalizer {
            store: self.accruals.clone(),
            id,
            user_id: accrual.user_id.clone(),
            account_id: accrual.account_id.clone(),
            period: accrual.period,
        };
        let finalized = self
            .settlement
            .settle_and_finalize(instruction, credential.clone(), finalizer)
            .await;

        self.projection.invalidate_user(&accrual.user_id).await;

        let finalized = finalized?;
        match finalized.receipt {
            Ok(_) => {
                info!(accrual_id = %id, "Accrual applied");
                Ok(finalized.record)
            }
            Err(e) => Err(ServiceError::Downstream(e)),
        }
    }
}

struct AccrualFinalizer {
    store: AccrualStoreRef,
    id: Uuid,
    user_id: String,
    account_id: String,
    period: Period,
}

#[async_trait]
impl Finalizer for AccrualFinalizer {
    type Record = InterestAccrual;

    async fn finalize(&self, success: bool) -> std::result::Result<InterestAccrual, StoreError> {
        self.store
            .update_status(self.id, AccrualStatus::settled(success), Utc::now())
            .await
    }

    async fn already_settled(
        &self,
        success: bool,
    ) -> std::result::Result<Option<InterestAccrual>, StoreError> {
        let status = AccrualStatus::settled(success);
        Ok(self
            .store
            .find_by_period(&self.user_id, &self.account_id, self.period)
            .await?
            .filter(|a| a.id == self.id && a.status == status))
    }
}
