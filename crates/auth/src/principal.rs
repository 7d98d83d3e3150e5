use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use sitedesk_core::UserId;

use crate::{Permission, Role, default_role_permissions};

/// The authenticated user on whose behalf an operation runs.
///
/// Identity and display name come from the identity provider; capabilities
/// are resolved up front so checks stay pure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub display_name: String,
    pub permissions: BTreeSet<Permission>,
}

impl Actor {
    pub fn new(
        user_id: UserId,
        display_name: impl Into<String>,
        permissions: impl IntoIterator<Item = Permission>,
    ) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            permissions: permissions.into_iter().collect(),
        }
    }

    /// Build an actor whose permissions are the union of the stock role grants.
    pub fn with_roles<'a>(
        user_id: UserId,
        display_name: impl Into<String>,
        roles: impl IntoIterator<Item = &'a Role>,
    ) -> Self {
        let permissions = roles
            .into_iter()
            .flat_map(|r| default_role_permissions(r.as_str()));
        Self::new(user_id, display_name, permissions)
    }

    pub fn has_capability(&self, permission: &Permission) -> bool {
        self.permissions.iter().any(|p| p.is_wildcard() || p == permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities;

    #[test]
    fn roles_are_merged_into_capabilities() {
        let roles = [Role::new("site_chief"), Role::new("accountant")];
        let actor = Actor::with_roles(UserId::new(), "Ayşe", roles.iter());

        assert!(actor.has_capability(&capabilities::EXPENSE_CREATE));
        assert!(actor.has_capability(&capabilities::EXPENSE_MANAGE));
        assert!(!actor.has_capability(&capabilities::EXPENSE_APPROVE));
    }

    #[test]
    fn wildcard_grants_everything() {
        let actor = Actor::new(UserId::new(), "root", [capabilities::WILDCARD]);
        assert!(actor.has_capability(&capabilities::EXPENSE_APPROVE));
        assert!(actor.has_capability(&Permission::new("payroll.run")));
    }
}
