use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

/// Caller-visible failure of a service operation.
///
/// Cache failures are deliberately absent: [`CacheError`] has no conversion
/// into this type, so a cache problem can never become an operation's result.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("access denied: {0}")]
    Authorization(String),
    #[error(transparent)]
    BusinessRule(#[from] BusinessRuleError),
    #[error("ledger gateway failed: {0}")]
    Downstream(#[from] GatewayError),
    #[error("storage failed: {0}")]
    Persistence(#[from] StoreError),
    #[error("{0} not found")]
    NotFound(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("credential is missing")]
    Missing,
    #[error("credential is malformed")]
    Malformed,
    #[error("credential is invalid")]
    InvalidToken,
    #[error("credential has expired")]
    Expired,
    #[error("account is inactive")]
    Inactive,
    #[error("user ID mismatch: request names {requested}, credential belongs to {verified}")]
    IdentityMismatch { requested: String, verified: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BusinessRuleError {
    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        available: Decimal,
        requested: Decimal,
    },
    #[error("interest already calculated for period {period}")]
    DuplicatePeriod { period: String },
    #[error("no interest rate found for account category {category}")]
    NoApplicableRate { category: String },
    #[error("computed interest for period {period} is zero")]
    NothingToAccrue { period: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("ledger unreachable: {0}")]
    Unreachable(String),
    #[error("ledger rejected the request: {0}")]
    Rejected(String),
    #[error("ledger did not answer within {0:?}")]
    Timeout(Duration),
    #[error("unknown account {0}")]
    UnknownAccount(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("record {0} not found")]
    Missing(String),
    #[error("record {0} already exists")]
    Duplicate(String),
    #[error("encoding error: {0}")]
    Codec(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Attempt to move a record out of a terminal state, or back to PENDING.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("illegal status transition {from} -> {to}")]
pub struct TransitionError {
    pub from: String,
    pub to: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cache payload could not be encoded: {0}")]
    Codec(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
