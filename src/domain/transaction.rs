use super::identity::Credential;
use super::metadata::Metadata;
use super::money::Amount;
use crate::error::{ServiceError, TransitionError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub enum TransactionType {
    #[serde(rename = "DEPOSIT", alias = "deposit")]
    Deposit,
    #[serde(rename = "WITHDRAWAL", alias = "withdrawal")]
    Withdrawal,
    #[serde(rename = "TRANSFER", alias = "transfer")]
    Transfer,
    #[serde(rename = "INTEREST", alias = "interest")]
    Interest,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Withdrawal => "WITHDRAWAL",
            TransactionType::Transfer => "TRANSFER",
            TransactionType::Interest => "INTEREST",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a transaction: `Pending` moves exactly once to a terminal state.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        *self == TransactionStatus::Pending && next.is_terminal()
    }

    /// Terminal status for a settlement outcome.
    pub fn settled(success: bool) -> Self {
        if success {
            TransactionStatus::Completed
        } else {
            TransactionStatus::Failed
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A locally owned record of one money movement.
///
/// Created `Pending` before settlement is attempted and kept afterwards as an
/// audit entry; only [`Transaction::transition`] mutates it.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: String,
    pub account_id: String,
    pub amount: Amount,
    pub currency: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub status: TransactionStatus,
    pub description: String,
    pub reference: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn transition(
        &mut self,
        next: TransactionStatus,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = at;
        Ok(())
    }
}

/// Caller input for `process_transaction`.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionRequest {
    pub user_id: String,
    pub account_id: String,
    pub amount: Decimal,
    pub currency: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub description: String,
    pub reference: String,
    pub metadata: BTreeMap<String, String>,
    #[serde(skip)]
    pub credential: Credential,
}

impl TransactionRequest {
    pub fn new(
        user_id: impl Into<String>,
        account_id: impl Into<String>,
        amount: Decimal,
        currency: impl Into<String>,
        kind: TransactionType,
        credential: Credential,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            account_id: account_id.into(),
            amount,
            currency: currency.into(),
            kind,
            description: String::new(),
            reference: String::new(),
            metadata: BTreeMap::new(),
            credential,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Checks every input constraint and yields the provisional record.
    ///
    /// Has no side effects, so it is safe to call before authentication.
    pub fn validate(&self) -> Result<Transaction, ServiceError> {
        let amount = Amount::new(self.amount)?;
        validate_identifier("user ID", &self.user_id)?;
        validate_identifier("account ID", &self.account_id)?;
        if self.currency.trim().is_empty() {
            return Err(ServiceError::validation("currency is required"));
        }
        if self.credential.is_empty() {
            return Err(ServiceError::validation("access token is required"));
        }
        let metadata = Metadata::from_raw(&self.metadata, self.kind)?;

        let now = Utc::now();
        Ok(Transaction {
            id: Uuid::new_v4(),
            user_id: self.user_id.clone(),
            account_id: self.account_id.clone(),
            amount,
            currency: self.currency.trim().to_ascii_uppercase(),
            kind: self.kind,
            status: TransactionStatus::Pending,
            description: self.description.clone(),
            reference: self.reference.clone(),
            metadata,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Identifiers are embedded in cache keys, so `:` and whitespace are refused.
pub fn validate_identifier(label: &str, value: &str) -> Result<(), ServiceError> {
    if value.is_empty() {
        return Err(ServiceError::validation(format!("{} is required", label)));
    }
    if value.contains(':') || value.chars().any(char::is_whitespace) {
        return Err(ServiceError::validation(format!(
            "{} must not contain ':' or whitespace",
            label
        )));
    }
    Ok(())
}

/// Aggregate view over a user's transactions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransactionStats {
    pub total_count: u64,
    pub completed_count: u64,
    pub failed_count: u64,
    pub pending_count: u64,
    pub total_deposits: Decimal,
    pub total_withdrawals: Decimal,
    pub net_flow: Decimal,
}

impl TransactionStats {
    /// Only COMPLETED deposits and withdrawals count towards the money totals.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Transaction>) -> Self {
        let mut stats = Self::default();
        for tx in records {
            stats.total_count += 1;
            match tx.status {
                TransactionStatus::Pending => stats.pending_count += 1,
                TransactionStatus::Failed => stats.failed_count += 1,
                TransactionStatus::Completed => {
                    stats.completed_count += 1;
                    match tx.kind {
                        TransactionType::Deposit => stats.total_deposits += tx.amount.value(),
                        TransactionType::Withdrawal => {
                            stats.total_withdrawals += tx.amount.value()
                        }
                        TransactionType::Transfer | TransactionType::Interest => {}
                    }
                }
            }
        }
        stats.net_flow = stats.total_deposits - stats.total_withdrawals;
        stats
    }
}
