//! `sitedesk-auth`: capability checks for the back-office workflows.
//!
//! Pure policy: no IO, no session state. Callers build an [`Actor`] from the
//! identity provider and pass it explicitly into every operation.

pub mod authorize;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{authorize, authorize_any, AuthzError};
pub use permissions::{capabilities, Permission};
pub use principal::Actor;
pub use roles::{default_role_permissions, Role};
