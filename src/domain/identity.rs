use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Opaque bearer credential presented by a caller.
///
/// `Debug` never prints the token itself.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("Credential(<empty>)")
        } else {
            f.write_str("Credential(<redacted>)")
        }
    }
}

/// Canonical role set. Verifiers translate whatever claim strings their
/// identity provider emits into these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Admin,
}

impl Role {
    /// Normalizes a raw role claim (`ADMIN`, `ROLE_ADMIN`, `role_user`, ...).
    pub fn from_claim(claim: &str) -> Option<Self> {
        let upper = claim.trim().to_ascii_uppercase();
        let name = upper.strip_prefix("ROLE_").unwrap_or(&upper);
        match name {
            "ADMIN" => Some(Role::Admin),
            "USER" | "CUSTOMER" => Some(Role::Customer),
            _ => None,
        }
    }
}

/// A verified caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub roles: BTreeSet<Role>,
    pub active: bool,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            user_id: user_id.into(),
            roles: roles.into_iter().collect(),
            active: true,
        }
    }

    /// Builds an identity from raw claims, dropping unknown roles.
    pub fn from_claims<'a>(
        user_id: impl Into<String>,
        claims: impl IntoIterator<Item = &'a str>,
        active: bool,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            roles: claims.into_iter().filter_map(Role::from_claim).collect(),
            active,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Admin)
    }

    /// Owners may read their own records; admins may read anyone's.
    pub fn may_access(&self, owner_id: &str) -> bool {
        self.user_id == owner_id || self.is_admin()
    }
}
