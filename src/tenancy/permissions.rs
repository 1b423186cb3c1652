//! Permission catalog and role templates.
//!
//! Roles are closed sum types; their integer encodings only exist at the
//! Postgres boundary (`store::postgres`).

use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt, str::FromStr};
use utoipa::ToSchema;

/// Fine-grained, store-scoped capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "String", into = "String")]
pub enum Permission {
    ProductsRead,
    ProductsWrite,
    OrdersRead,
    OrdersWrite,
    CustomersRead,
    CustomersWrite,
    StorefrontRead,
    StorefrontWrite,
    SettingsRead,
    SettingsWrite,
    ReportsRead,
    StaffManage,
}

impl Permission {
    pub const ALL: [Self; 12] = [
        Self::ProductsRead,
        Self::ProductsWrite,
        Self::OrdersRead,
        Self::OrdersWrite,
        Self::CustomersRead,
        Self::CustomersWrite,
        Self::StorefrontRead,
        Self::StorefrontWrite,
        Self::SettingsRead,
        Self::SettingsWrite,
        Self::ReportsRead,
        Self::StaffManage,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProductsRead => "products.read",
            Self::ProductsWrite => "products.write",
            Self::OrdersRead => "orders.read",
            Self::OrdersWrite => "orders.write",
            Self::CustomersRead => "customers.read",
            Self::CustomersWrite => "customers.write",
            Self::StorefrontRead => "storefront.read",
            Self::StorefrontWrite => "storefront.write",
            Self::SettingsRead => "settings.read",
            Self::SettingsWrite => "settings.write",
            Self::ReportsRead => "reports.read",
            Self::StaffManage => "staff.manage",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown permission: {0}")]
pub struct UnknownPermission(pub String);

impl FromStr for Permission {
    type Err = UnknownPermission;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|permission| permission.as_str() == value)
            .ok_or_else(|| UnknownPermission(value.to_string()))
    }
}

impl TryFrom<String> for Permission {
    type Error = UnknownPermission;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Permission> for String {
    fn from(permission: Permission) -> Self {
        permission.as_str().to_string()
    }
}

/// Coarse role a user holds within one store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StoreRole {
    Owner,
    Admin,
    Staff,
    Custom,
}

impl StoreRole {
    /// Permissions implied by the role before explicit grants are merged in.
    #[must_use]
    pub fn template(self) -> BTreeSet<Permission> {
        match self {
            Self::Owner | Self::Admin => Permission::ALL.into_iter().collect(),
            Self::Staff => [
                Permission::ProductsRead,
                Permission::OrdersRead,
                Permission::CustomersRead,
                Permission::StorefrontRead,
                Permission::ReportsRead,
            ]
            .into_iter()
            .collect(),
            Self::Custom => BTreeSet::new(),
        }
    }
}

/// Role that applies across every store on the platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PlatformRole {
    Owner,
    Staff,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_codes_round_trip_through_from_str() {
        for permission in Permission::ALL {
            assert_eq!(permission.as_str().parse::<Permission>(), Ok(permission));
        }
    }

    #[test]
    fn unknown_permission_is_rejected() {
        assert_eq!(
            "orders.delete".parse::<Permission>(),
            Err(UnknownPermission("orders.delete".to_string()))
        );
    }

    #[test]
    fn owner_and_admin_get_the_full_catalog() {
        assert_eq!(StoreRole::Owner.template().len(), Permission::ALL.len());
        assert_eq!(StoreRole::Admin.template(), StoreRole::Owner.template());
    }

    #[test]
    fn staff_template_is_read_mostly() {
        let staff = StoreRole::Staff.template();
        assert!(staff.contains(&Permission::OrdersRead));
        assert!(!staff.contains(&Permission::OrdersWrite));
        assert!(!staff.contains(&Permission::ProductsWrite));
        assert!(!staff.contains(&Permission::StaffManage));
    }

    #[test]
    fn custom_template_is_empty() {
        assert!(StoreRole::Custom.template().is_empty());
    }

    #[test]
    fn permission_serializes_as_code() -> anyhow::Result<()> {
        let value = serde_json::to_value(Permission::ProductsWrite)?;
        assert_eq!(value, serde_json::json!("products.write"));
        let parsed: Permission = serde_json::from_value(serde_json::json!("staff.manage"))?;
        assert_eq!(parsed, Permission::StaffManage);
        Ok(())
    }
}
