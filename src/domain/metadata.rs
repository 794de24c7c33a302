//! Schema-checked key/value metadata attached to transactions.

use super::transaction::TransactionType;
use crate::error::ServiceError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const MAX_VALUE_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataKey {
    Channel,
    ClientRef,
    Note,
    Counterparty,
    AccrualId,
    Period,
}

impl MetadataKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataKey::Channel => "channel",
            MetadataKey::ClientRef => "client_ref",
            MetadataKey::Note => "note",
            MetadataKey::Counterparty => "counterparty",
            MetadataKey::AccrualId => "accrual_id",
            MetadataKey::Period => "period",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "channel" => Some(MetadataKey::Channel),
            "client_ref" => Some(MetadataKey::ClientRef),
            "note" => Some(MetadataKey::Note),
            "counterparty" => Some(MetadataKey::Counterparty),
            "accrual_id" => Some(MetadataKey::AccrualId),
            "period" => Some(MetadataKey::Period),
            _ => None,
        }
    }

    pub fn allowed_for(&self, kind: TransactionType) -> bool {
        match self {
            MetadataKey::Channel | MetadataKey::ClientRef | MetadataKey::Note => true,
            MetadataKey::Counterparty => kind == TransactionType::Transfer,
            MetadataKey::AccrualId | MetadataKey::Period => kind == TransactionType::Interest,
        }
    }
}

impl fmt::Display for MetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<MetadataKey, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a raw, caller-supplied bag against the schema for `kind`.
    pub fn from_raw<I, K, V>(raw: I, kind: TransactionType) -> Result<Self, ServiceError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut metadata = Self::new();
        for (key, value) in raw {
            let key = MetadataKey::parse(key.as_ref()).ok_or_else(|| {
                ServiceError::validation(format!("unknown metadata key '{}'", key.as_ref()))
            })?;
            metadata.insert(key, value, kind)?;
        }
        Ok(metadata)
    }

    pub fn insert(
        &mut self,
        key: MetadataKey,
        value: impl Into<String>,
        kind: TransactionType,
    ) -> Result<(), ServiceError> {
        if !key.allowed_for(kind) {
            return Err(ServiceError::validation(format!(
                "metadata key '{}' is not allowed on {} transactions",
                key, kind
            )));
        }
        let value = value.into();
        if value.trim().is_empty() || value.len() > MAX_VALUE_LEN {
            return Err(ServiceError::validation(format!(
                "metadata value for '{}' must be 1..={} characters",
                key, MAX_VALUE_LEN
            )));
        }
        self.0.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: MetadataKey) -> Option<&str> {
        self.0.get(&key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetadataKey, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }
}
