use super::money::{Amount, round_currency};
use crate::error::{ServiceError, TransitionError};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A calendar month, written `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Self, ServiceError> {
        if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(ServiceError::validation(format!(
                "invalid period {:04}-{:02}",
                year, month
            )));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(&self) -> NaiveDate {
        let (year, month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1)
            .and_then(|next| next.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }
}

impl FromStr for Period {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let date = NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d")
            .map_err(|_| ServiceError::validation(format!("period '{}' is not YYYY-MM", s)))?;
        if s.len() != 7 {
            return Err(ServiceError::validation(format!(
                "period '{}' is not YYYY-MM",
                s
            )));
        }
        Self::new(date.year(), date.month())
    }
}

impl TryFrom<String> for Period {
    type Error = ServiceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.to_string()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccrualStatus {
    Pending,
    Applied,
    Failed,
}

impl AccrualStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccrualStatus::Pending => "PENDING",
            AccrualStatus::Applied => "APPLIED",
            AccrualStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AccrualStatus::Pending)
    }

    pub fn can_transition_to(&self, next: AccrualStatus) -> bool {
        *self == AccrualStatus::Pending && next.is_terminal()
    }

    pub fn settled(success: bool) -> Self {
        if success {
            AccrualStatus::Applied
        } else {
            AccrualStatus::Failed
        }
    }
}

impl fmt::Display for AccrualStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Annual rate in percent, valid for an account category over a date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestRate {
    pub category: String,
    pub annual_rate: Decimal,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
}

impl InterestRate {
    pub fn is_effective_on(&self, date: NaiveDate) -> bool {
        self.effective_from <= date && self.effective_to.is_none_or(|to| date <= to)
    }
}

/// Result of a pure interest calculation; nothing is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestCalculation {
    pub user_id: String,
    pub account_id: String,
    pub period: Period,
    pub principal: Decimal,
    pub interest: Decimal,
    pub rate: Decimal,
}

/// `principal × (annual_rate / 12 / 100)`, rounded to currency precision.
pub fn monthly_interest(principal: Decimal, annual_rate: Decimal) -> Decimal {
    let monthly_rate = annual_rate / Decimal::from(12) / Decimal::ONE_HUNDRED;
    round_currency(principal * monthly_rate)
}

/// Interest computed for one (user, account, period).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestAccrual {
    pub id: Uuid,
    pub user_id: String,
    pub account_id: String,
    pub period: Period,
    pub principal: Decimal,
    pub interest: Amount,
    pub rate: Decimal,
    pub status: AccrualStatus,
    pub applied_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl InterestAccrual {
    pub fn pending(calculation: &InterestCalculation, interest: Amount) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: calculation.user_id.clone(),
            account_id: calculation.account_id.clone(),
            period: calculation.period,
            principal: calculation.principal,
            interest,
            rate: calculation.rate,
            status: AccrualStatus::Pending,
            applied_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn transition(
        &mut self,
        next: AccrualStatus,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        if next == AccrualStatus::Applied {
            self.applied_at = Some(at);
        }
        Ok(())
    }
}
