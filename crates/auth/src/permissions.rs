use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission (capability) identifier.
///
/// Permissions are opaque strings such as `"expense.approve"`. The wildcard
/// `"*"` grants everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Named capabilities checked by the expense-declaration workflow.
pub mod capabilities {
    use super::Permission;

    pub const WILDCARD: Permission = Permission::from_static("*");

    /// Submit declarations and edit/delete one's own pending ones.
    pub const EXPENSE_CREATE: Permission = Permission::from_static("expense.create");
    pub const EXPENSE_VIEW_OWN: Permission = Permission::from_static("expense.view_own");
    pub const EXPENSE_VIEW_ALL: Permission = Permission::from_static("expense.view_all");
    /// Approve or reject pending declarations.
    pub const EXPENSE_APPROVE: Permission = Permission::from_static("expense.approve");
    /// Record payments; delete any pending or rejected declaration.
    pub const EXPENSE_MANAGE: Permission = Permission::from_static("expense.manage");
}
