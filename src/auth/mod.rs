/*!
 * # Permissions
 *
 * The engine does not authenticate anyone; the host passes an [`Actor`]
 * (id, display name, role) with each call and the injected
 * [`PermissionOracle`] answers "may this role perform this action".
 * A default role table for the pharmacy roles ships with the crate.
 */

use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Permission string constants for compile-time safety.
pub mod consts {
    pub const STOCK_READ: &str = "stock:read";
    pub const STOCK_ADJUST: &str = "stock:adjust";
    pub const STOCK_APPROVE: &str = "stock:approve";
    pub const STOCK_RECEIVE: &str = "stock:receive";
    pub const SALES_CREATE: &str = "sales:create";
    pub const PRODUCTS_MANAGE: &str = "products:manage";
}

/// Role names the default table knows about.
pub mod roles {
    pub const ADMIN: &str = "admin";
    pub const PHARMACIST: &str = "pharmacist";
    pub const CASHIER: &str = "cashier";
    pub const SYSTEM: &str = "system";
}

/// The identity a host passes along with each mutating call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: Option<Uuid>,
    pub name: String,
    pub role: String,
}

impl Actor {
    pub fn new(id: Uuid, name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            name: name.into(),
            role: role.into(),
        }
    }

    /// The internal identity used by automated flows (migration, purchase
    /// receiving). Holds the privileged `system` role; every call site that
    /// self-approves does so visibly through this constructor.
    pub fn system() -> Self {
        Self {
            id: None,
            name: "system".to_string(),
            role: roles::SYSTEM.to_string(),
        }
    }
}

/// "May this role perform this action" oracle.
pub trait PermissionOracle: Send + Sync {
    fn can(&self, role: &str, action: &str) -> bool;
}

lazy_static! {
    static ref ROLE_GRANTS: HashMap<&'static str, HashSet<&'static str>> = {
        let mut grants: HashMap<&'static str, HashSet<&'static str>> = HashMap::new();
        grants.insert(roles::ADMIN, ["admin:*"].into_iter().collect());
        grants.insert(roles::SYSTEM, ["admin:*"].into_iter().collect());
        grants.insert(
            roles::PHARMACIST,
            [
                consts::STOCK_READ,
                consts::STOCK_ADJUST,
                consts::STOCK_APPROVE,
                consts::STOCK_RECEIVE,
                consts::SALES_CREATE,
                consts::PRODUCTS_MANAGE,
            ]
            .into_iter()
            .collect(),
        );
        grants.insert(
            roles::CASHIER,
            [consts::STOCK_READ, consts::STOCK_ADJUST, consts::SALES_CREATE]
                .into_iter()
                .collect(),
        );
        grants
    };
}

/// Default oracle backed by the role table above. Unknown roles hold no
/// permissions: an actor without a resolvable identity never approves
/// anything implicitly.
#[derive(Debug, Clone, Default)]
pub struct RolePermissions;

impl RolePermissions {
    pub fn new() -> Self {
        Self
    }

    /// Check whether a held permission implies a required one.
    /// Supports `resource:*`, `admin:*` and the global `*` wildcards.
    fn is_implied(held: &str, required: &str) -> bool {
        if held == required || held == "*" {
            return true;
        }

        let held_parts: Vec<&str> = held.split(':').collect();
        let required_parts: Vec<&str> = required.split(':').collect();
        if held_parts.len() == 2 && required_parts.len() == 2 {
            if held_parts[0] == required_parts[0] && held_parts[1] == "*" {
                return true;
            }
            if held_parts[0] == "admin" && held_parts[1] == "*" {
                return true;
            }
        }

        false
    }
}

impl PermissionOracle for RolePermissions {
    fn can(&self, role: &str, action: &str) -> bool {
        let Some(held) = ROLE_GRANTS.get(role) else {
            return false;
        };
        held.iter().any(|perm| Self::is_implied(perm, action))
    }
}

/// Oracle that denies everything; handy in tests that exercise the
/// pending-movement path.
#[derive(Debug, Clone, Default)]
pub struct DenyAll;

impl PermissionOracle for DenyAll {
    fn can(&self, _role: &str, _action: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pharmacist_approves_cashier_does_not() {
        let oracle = RolePermissions::new();
        assert!(oracle.can(roles::PHARMACIST, consts::STOCK_APPROVE));
        assert!(oracle.can(roles::CASHIER, consts::STOCK_ADJUST));
        assert!(!oracle.can(roles::CASHIER, consts::STOCK_APPROVE));
    }

    #[test]
    fn admin_wildcard_implies_everything() {
        let oracle = RolePermissions::new();
        assert!(oracle.can(roles::ADMIN, consts::STOCK_APPROVE));
        assert!(oracle.can(roles::ADMIN, consts::SALES_CREATE));
        assert!(oracle.can(roles::SYSTEM, consts::STOCK_RECEIVE));
    }

    #[test]
    fn unknown_role_holds_nothing() {
        let oracle = RolePermissions::new();
        assert!(!oracle.can("", consts::STOCK_APPROVE));
        assert!(!oracle.can("intern", consts::STOCK_READ));
    }

    #[test]
    fn wildcard_implication_rules() {
        assert!(RolePermissions::is_implied("stock:*", consts::STOCK_ADJUST));
        assert!(RolePermissions::is_implied("admin:*", "sales:create"));
        assert!(!RolePermissions::is_implied("stock:*", "sales:create"));
    }
}
