//! Per-request identity and permission resolution.
//!
//! Nothing here is cached: every request re-reads roles and grants, so a
//! revoked grant stops working on the very next request.

use anyhow::Result;
use std::{collections::BTreeSet, sync::Arc};
use tracing::warn;
use uuid::Uuid;

use super::permissions::{Permission, PlatformRole, StoreRole};
use crate::{store::CredentialStore, token::TokenService};

/// Authenticated caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
    /// Access token the request presented.
    pub token_id: Uuid,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TenancyContext {
    pub principal: Option<Principal>,
    pub store_id: Option<Uuid>,
    pub store_role: Option<StoreRole>,
    pub permissions: BTreeSet<Permission>,
    pub platform_owner: bool,
    pub platform_staff: bool,
}

impl TenancyContext {
    #[must_use]
    pub fn anonymous(store_id: Option<Uuid>) -> Self {
        Self {
            store_id,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }

    #[must_use]
    pub fn user_id(&self) -> Option<Uuid> {
        self.principal.as_ref().map(|p| p.user_id)
    }

    #[must_use]
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.store_id.is_some() && self.permissions.contains(&permission)
    }
}

#[derive(Clone)]
pub struct TenancyResolver {
    store: Arc<dyn CredentialStore>,
    tokens: TokenService,
}

impl TenancyResolver {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>, tokens: TokenService) -> Self {
        Self { store, tokens }
    }

    /// Build the context for one request. A missing or unusable bearer token
    /// yields an anonymous context rather than an error.
    ///
    /// # Errors
    /// Returns an error only if the store cannot be read.
    pub async fn resolve(
        &self,
        bearer: Option<&str>,
        store_id: Option<Uuid>,
    ) -> Result<TenancyContext> {
        let Some(bearer) = bearer.map(str::trim).filter(|b| !b.is_empty()) else {
            return Ok(TenancyContext::anonymous(store_id));
        };
        let Some(token) = self.tokens.authenticate(bearer).await? else {
            return Ok(TenancyContext::anonymous(store_id));
        };
        let Some(user) = self.store.find_user_by_id(token.user_id).await? else {
            return Ok(TenancyContext::anonymous(store_id));
        };

        let platform_roles = self.store.list_platform_roles(user.id).await?;
        let mut context = TenancyContext {
            principal: Some(Principal {
                user_id: user.id,
                email: user.email,
                token_id: token.id,
            }),
            store_id,
            platform_owner: platform_roles.contains(&PlatformRole::Owner),
            platform_staff: platform_roles.contains(&PlatformRole::Staff),
            ..TenancyContext::default()
        };

        if let Some(store_id) = store_id {
            let (role, permissions) = self.effective_permissions(store_id, user.id).await?;
            context.store_role = role;
            context.permissions = permissions;
        }
        Ok(context)
    }

    /// Role template plus explicit grants for one (store, user) pair.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn effective_permissions(
        &self,
        store_id: Uuid,
        user_id: Uuid,
    ) -> Result<(Option<StoreRole>, BTreeSet<Permission>)> {
        let role = self.store.find_store_role(store_id, user_id).await?;
        let mut permissions = role.map(StoreRole::template).unwrap_or_default();

        for grant in self.store.list_store_grants(store_id, user_id).await? {
            match grant.parse::<Permission>() {
                Ok(permission) => {
                    permissions.insert(permission);
                }
                Err(err) => warn!(%store_id, %user_id, "Ignoring stored grant: {err}"),
            }
        }
        Ok((role, permissions))
    }
}
