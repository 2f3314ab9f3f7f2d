use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{AuthContext, TokenTable, TrustTier};
use crate::config::AuthConfig;

/// Lookup form of a [`TokenTable`]
struct CompiledTable {
    admins: HashMap<String, String>,
    clients: HashSet<String>,
    source: TokenTable,
}

impl CompiledTable {
    fn compile(table: TokenTable) -> Self {
        Self {
            admins: table
                .admins
                .iter()
                .map(|a| (a.token.clone(), a.assignee.clone()))
                .collect(),
            clients: table.clients.iter().cloned().collect(),
            source: table,
        }
    }
}

/// Locally held credentials.
///
/// The core token and the legacy admin token are fixed at boot. The admin and
/// client tables are swapped as a unit, so a reader sees either the old table
/// or the new one.
pub struct TrustStore {
    core_token: Option<String>,
    legacy_admin_token: Option<String>,
    table: RwLock<Arc<CompiledTable>>,
}

impl TrustStore {
    pub fn new(
        core_token: Option<String>,
        legacy_admin_token: Option<String>,
        table: TokenTable,
    ) -> Self {
        Self {
            core_token,
            legacy_admin_token,
            table: RwLock::new(Arc::new(CompiledTable::compile(table))),
        }
    }

    /// Boot tables from configuration, or `persisted` when one was pushed earlier
    pub fn from_config(auth: &AuthConfig, persisted: Option<TokenTable>) -> Self {
        let table = persisted.unwrap_or_else(|| TokenTable {
            admins: auth.admin_tokens.clone(),
            clients: auth.client_tokens.clone(),
        });
        Self::new(auth.core_token.clone(), auth.admin_token.clone(), table)
    }

    pub fn core_token(&self) -> Option<&str> {
        self.core_token.as_deref()
    }

    /// Install a new admin/client table in place of the current one
    pub async fn replace(&self, table: TokenTable) {
        let compiled = Arc::new(CompiledTable::compile(table));
        *self.table.write().await = compiled;
    }

    /// The table currently installed
    pub async fn snapshot(&self) -> TokenTable {
        self.table.read().await.source.clone()
    }

    /// Classify a token against the local tables, in precedence order
    pub async fn classify(&self, token: &str, on_behalf_of: Option<&str>) -> AuthContext {
        if self.core_token.as_deref() == Some(token) {
            return AuthContext::new(TrustTier::Core, on_behalf_of.unwrap_or("core"));
        }
        if self.legacy_admin_token.as_deref() == Some(token) {
            return AuthContext::new(TrustTier::Admin, "admin");
        }

        let table = Arc::clone(&*self.table.read().await);
        if let Some(assignee) = table.admins.get(token) {
            return AuthContext::new(TrustTier::Admin, assignee.as_str());
        }
        if table.clients.contains(token) {
            return AuthContext::new(TrustTier::Client, token);
        }
        AuthContext::unauthorized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::AdminToken;

    fn store() -> TrustStore {
        TrustStore::new(
            Some("c0re".to_string()),
            Some("legacy".to_string()),
            TokenTable {
                admins: vec![AdminToken {
                    assignee: "alice".to_string(),
                    token: "xYxYxY".to_string(),
                }],
                clients: vec!["ababab".to_string()],
            },
        )
    }

    #[tokio::test]
    async fn test_classify_precedence() {
        let store = store();

        let ctx = store.classify("c0re", None).await;
        assert_eq!(ctx, AuthContext::new(TrustTier::Core, "core"));
        let ctx = store.classify("c0re", Some("bob")).await;
        assert_eq!(ctx.acting_identity.as_deref(), Some("bob"));

        assert_eq!(
            store.classify("legacy", None).await,
            AuthContext::new(TrustTier::Admin, "admin")
        );
        assert_eq!(
            store.classify("xYxYxY", Some("ignored")).await,
            AuthContext::new(TrustTier::Admin, "alice")
        );
        assert_eq!(
            store.classify("ababab", None).await,
            AuthContext::new(TrustTier::Client, "ababab")
        );
        assert_eq!(store.classify("nope", None).await, AuthContext::unauthorized());
    }

    #[tokio::test]
    async fn test_replace_swaps_whole_table() {
        let store = store();
        let next = TokenTable {
            admins: vec![],
            clients: vec!["efefef".to_string()],
        };
        store.replace(next.clone()).await;

        assert_eq!(store.classify("xYxYxY", None).await.tier, TrustTier::Unauthorized);
        assert_eq!(store.classify("ababab", None).await.tier, TrustTier::Unauthorized);
        assert_eq!(store.classify("efefef", None).await.tier, TrustTier::Client);
        // Boot-time credentials survive a push
        assert_eq!(store.classify("c0re", None).await.tier, TrustTier::Core);
        assert_eq!(store.classify("legacy", None).await.tier, TrustTier::Admin);
        assert_eq!(store.snapshot().await, next);
    }

    #[tokio::test]
    async fn test_persisted_table_wins_over_config() {
        let auth = AuthConfig {
            client_tokens: vec!["from-env".to_string()],
            ..Default::default()
        };
        let persisted = TokenTable {
            admins: vec![],
            clients: vec!["pushed".to_string()],
        };
        let store = TrustStore::from_config(&auth, Some(persisted));
        assert_eq!(store.classify("from-env", None).await.tier, TrustTier::Unauthorized);
        assert_eq!(store.classify("pushed", None).await.tier, TrustTier::Client);

        let store = TrustStore::from_config(&auth, None);
        assert_eq!(store.classify("from-env", None).await.tier, TrustTier::Client);
    }
}
