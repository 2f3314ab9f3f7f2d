use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::cache::CacheLayer;
use crate::keys::AuthorizedKey;
use crate::storage::models::{Account, Permission, PermissionScope};
use crate::storage::{DatabaseError, KeyStore};

#[derive(Debug, Error)]
pub enum ResolveError {
    /// Every matching key was dropped by the signed-only policy
    #[error("Not Acceptable: FORCE_SIGNED_KEY is true and no signed key matches")]
    SignedKeysRequired,
    #[error(transparent)]
    Storage(#[from] DatabaseError),
}

/// Output filtering applied after resolution
#[derive(Debug, Clone, Copy, Default)]
pub struct Policy {
    pub signed_only: bool,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub from_cache: bool,
    pub keys: Vec<AuthorizedKey>,
    /// False when the policy dropped at least one key
    pub satisfied: bool,
}

/// Turns permission rows into the key set a login may use
#[derive(Clone)]
pub struct AuthorizationResolver {
    cache: CacheLayer,
    store: Arc<dyn KeyStore>,
}

impl AuthorizationResolver {
    pub fn new(store: Arc<dyn KeyStore>, cache: CacheLayer) -> Self {
        Self { cache, store }
    }

    /// Keys authorized for `user` on `host`.
    ///
    /// The unfiltered set is cached; `policy` is applied on every call so a
    /// cached entry serves both signed-only and unrestricted callers.
    pub async fn resolve(
        &self,
        user: &str,
        host: &str,
        policy: Policy,
    ) -> Result<Resolution, ResolveError> {
        let cache_key = serde_json::json!(["keys", user, host]).to_string();
        let cached = self
            .cache
            .get_or_compute(&cache_key, || self.collect(user, host))
            .await?;

        let mut keys = cached.value;
        let found = keys.len();
        if policy.signed_only {
            keys.retain(AuthorizedKey::is_signed);
        }
        let dropped = found - keys.len();

        if dropped > 0 {
            debug!(user = %user, host = %host, dropped, "Unsigned keys withheld");
            if keys.is_empty() {
                return Err(ResolveError::SignedKeysRequired);
            }
        }

        Ok(Resolution {
            from_cache: cached.from_cache,
            keys,
            satisfied: dropped == 0,
        })
    }

    async fn collect(&self, user: &str, host: &str) -> Result<Vec<AuthorizedKey>, DatabaseError> {
        let permissions = self.store.permissions_for(user, host).await?;

        // Direct grants are walked first so their options win on duplicates
        let (direct, via_group): (Vec<Permission>, Vec<Permission>) = permissions
            .into_iter()
            .partition(|p| matches!(p.scope, PermissionScope::Account(_)));

        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        let mut owners: HashMap<u64, Option<Account>> = HashMap::new();

        for permission in &direct {
            let PermissionScope::Account(account_id) = permission.scope else {
                continue;
            };
            let owner = match owners.get(&account_id) {
                Some(cached) => cached.clone(),
                None => {
                    let account = self.store.account(account_id).await?;
                    owners.insert(account_id, account.clone());
                    account
                }
            };
            match owner {
                Some(account) if account.active => {
                    self.push_keys(&account, permission, &mut seen, &mut keys)
                        .await?;
                }
                _ => {}
            }
        }

        for permission in &via_group {
            let PermissionScope::Group(group_id) = permission.scope else {
                continue;
            };
            for account in self.store.active_members_of_group(group_id).await? {
                self.push_keys(&account, permission, &mut seen, &mut keys)
                    .await?;
            }
        }

        debug!(user = %user, host = %host, keys = keys.len(), "Resolved authorized keys");
        Ok(keys)
    }

    async fn push_keys(
        &self,
        owner: &Account,
        permission: &Permission,
        seen: &mut HashSet<String>,
        out: &mut Vec<AuthorizedKey>,
    ) -> Result<(), DatabaseError> {
        for key in self.store.keys_for_account(owner.id).await? {
            if seen.insert(key.fingerprint.clone()) {
                out.push(AuthorizedKey::new(
                    &key,
                    owner,
                    permission.ssh_options.as_deref(),
                ));
            }
        }
        Ok(())
    }
}
