use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::permissions::{capabilities, Permission};

/// Role identifier used for RBAC.
///
/// Roles are opaque strings; [`default_role_permissions`] supplies the stock
/// mapping, and deployments may grant permissions directly instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stock role → permission mapping for the back office.
pub fn default_role_permissions(role: &str) -> Vec<Permission> {
    match role {
        "admin" => vec![capabilities::WILDCARD],
        "project_manager" => vec![
            capabilities::EXPENSE_VIEW_ALL,
            capabilities::EXPENSE_APPROVE,
        ],
        "accountant" => vec![
            capabilities::EXPENSE_VIEW_ALL,
            capabilities::EXPENSE_MANAGE,
        ],
        "site_chief" => vec![
            capabilities::EXPENSE_CREATE,
            capabilities::EXPENSE_VIEW_OWN,
        ],
        "staff" => vec![capabilities::EXPENSE_VIEW_OWN],
        _ => vec![],
    }
}
