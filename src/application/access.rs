use crate::domain::identity::{Credential, Identity};
use crate::domain::ports::AuthVerifier;
use crate::error::{AuthError, ServiceError};

/// Verifies `credential` and refuses inactive identities even if the
/// verifier let them through.
pub async fn authenticate(
    verifier: &dyn AuthVerifier,
    credential: &Credential,
) -> Result<Identity, ServiceError> {
    if credential.is_empty() {
        return Err(AuthError::Missing.into());
    }
    let identity = verifier.verify(credential).await?;
    if !identity.active {
        return Err(AuthError::Inactive.into());
    }
    Ok(identity)
}

pub fn require_same_user(identity: &Identity, user_id: &str) -> Result<(), ServiceError> {
    if identity.user_id != user_id {
        return Err(AuthError::IdentityMismatch {
            requested: user_id.to_string(),
            verified: identity.user_id.clone(),
        }
        .into());
    }
    Ok(())
}

pub fn require_owner_or_admin(identity: &Identity, owner_id: &str) -> Result<(), ServiceError> {
    if identity.may_access(owner_id) {
        Ok(())
    } else {
        Err(ServiceError::Authorization(format!(
            "{} may not access records of {}",
            identity.user_id, owner_id
        )))
    }
}

pub fn require_admin(identity: &Identity) -> Result<(), ServiceError> {
    if identity.is_admin() {
        Ok(())
    } else {
        Err(ServiceError::Authorization(format!(
            "{} is not an administrator",
            identity.user_id
        )))
    }
}
