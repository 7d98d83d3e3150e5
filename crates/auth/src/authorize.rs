use thiserror::Error;

use crate::{Actor, Permission};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Check that `actor` holds `required` (or the wildcard).
///
/// No IO, no panics, no business logic.
pub fn authorize(actor: &Actor, required: &Permission) -> Result<(), AuthzError> {
    if actor.has_capability(required) {
        Ok(())
    } else {
        tracing::debug!(user_id = %actor.user_id, permission = %required, "capability denied");
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

/// Check that `actor` holds at least one of `any_of`.
///
/// The error names the first permission in the list.
pub fn authorize_any(actor: &Actor, any_of: &[Permission]) -> Result<(), AuthzError> {
    if any_of.iter().any(|p| actor.has_capability(p)) {
        return Ok(());
    }
    let first = any_of.first().map(|p| p.as_str()).unwrap_or("*");
    tracing::debug!(user_id = %actor.user_id, permission = first, "capability denied");
    Err(AuthzError::Forbidden(first.to_string()))
}
