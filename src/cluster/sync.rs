use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::ClusterMode;
use crate::cache::CacheLayer;
use crate::storage::Database;
use crate::trust::{TokenTable, TrustStore};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("No core token configured")]
    NoCoreToken,
    #[error("Replica rejected push with status {0}")]
    Rejected(StatusCode),
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Body of `POST /tokens`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPush {
    pub tokens: TokenTable,
}

/// Result of pushing to one replica
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushOutcome {
    pub error: Option<String>,
    pub ok: bool,
    pub status: Option<u16>,
    pub target: String,
}

impl PushOutcome {
    fn from_result(target: String, result: Result<StatusCode, SyncError>) -> Self {
        match result {
            Ok(status) => Self {
                error: None,
                ok: true,
                status: Some(status.as_u16()),
                target,
            },
            Err(e) => Self {
                status: match &e {
                    SyncError::Rejected(status) => Some(status.as_u16()),
                    _ => None,
                },
                error: Some(e.to_string()),
                ok: false,
                target,
            },
        }
    }
}

/// Applies token tables locally and, on a core instance, fans them out
pub struct ClusterSync {
    // Held across swap and persist so the stored table matches the live one
    apply_lock: Mutex<()>,
    cache: CacheLayer,
    client: reqwest::Client,
    db: Database,
    mode: ClusterMode,
    push_timeout: Duration,
    replicas: Vec<String>,
    trust: Arc<TrustStore>,
}

impl ClusterSync {
    pub fn new(
        mode: ClusterMode,
        replicas: Vec<String>,
        push_timeout: Duration,
        trust: Arc<TrustStore>,
        db: Database,
        cache: CacheLayer,
        client: reqwest::Client,
    ) -> Self {
        Self {
            apply_lock: Mutex::new(()),
            cache,
            client,
            db,
            mode,
            push_timeout,
            replicas,
            trust,
        }
    }

    pub fn mode(&self) -> ClusterMode {
        self.mode
    }

    /// Install `table` as this node's admin/client table.
    ///
    /// The swap is atomic. Persisting it for restarts and flushing the cache
    /// are best-effort.
    pub async fn apply_token_table(&self, table: TokenTable) {
        let admins = table.admins.len();
        let clients = table.clients.len();
        let _guard = self.apply_lock.lock().await;

        self.trust.replace(table.clone()).await;

        let db = self.db.clone();
        match tokio::task::spawn_blocking(move || db.put_token_table(&table)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Failed to persist token table"),
            Err(e) => error!(error = %e, "Token table persist task panicked"),
        }

        self.cache.flush().await;
        info!(admins, clients, "Token table applied");
    }

    /// Apply locally, then push to every configured replica when running as core
    pub async fn distribute(&self, table: TokenTable) -> Vec<PushOutcome> {
        self.apply_token_table(table.clone()).await;

        if self.mode != ClusterMode::Core {
            return Vec::new();
        }
        self.push_token_table(&table, &self.replicas).await
    }

    /// Post `table` to each target concurrently. One outcome per target, in order.
    pub async fn push_token_table(&self, table: &TokenTable, targets: &[String]) -> Vec<PushOutcome> {
        let Some(core_token) = self.trust.core_token().map(str::to_string) else {
            return targets
                .iter()
                .map(|t| PushOutcome::from_result(t.clone(), Err(SyncError::NoCoreToken)))
                .collect();
        };

        let body = Arc::new(TokenPush {
            tokens: table.clone(),
        });

        let mut handles = Vec::with_capacity(targets.len());
        for target in targets {
            let client = self.client.clone();
            let body = Arc::clone(&body);
            let token = core_token.clone();
            let target = target.clone();
            let timeout = self.push_timeout;

            handles.push((
                target.clone(),
                tokio::spawn(async move { send_push(&client, &target, &token, &body, timeout).await }),
            ));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (target, handle) in handles {
            let outcome = match handle.await {
                Ok(result) => PushOutcome::from_result(target, result),
                Err(e) => PushOutcome {
                    error: Some(format!("push task failed: {e}")),
                    ok: false,
                    status: None,
                    target,
                },
            };
            if outcome.ok {
                debug!(target = %outcome.target, "Token table pushed");
            } else {
                warn!(
                    target = %outcome.target,
                    error = outcome.error.as_deref().unwrap_or_default(),
                    "Token table push failed"
                );
            }
            outcomes.push(outcome);
        }
        outcomes
    }
}

async fn send_push(
    client: &reqwest::Client,
    target: &str,
    core_token: &str,
    body: &TokenPush,
    timeout: Duration,
) -> Result<StatusCode, SyncError> {
    let url = format!("{}/tokens", target.trim_end_matches('/'));
    let response = client
        .post(&url)
        .bearer_auth(core_token)
        .timeout(timeout)
        .json(body)
        .send()
        .await?;

    let status = response.status();
    if status.is_success() {
        Ok(status)
    } else {
        Err(SyncError::Rejected(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::setup_db;
    use crate::trust::{AdminToken, TrustTier};

    fn table(client: &str) -> TokenTable {
        TokenTable {
            admins: vec![AdminToken {
                assignee: "ops".to_string(),
                token: format!("admin-{client}"),
            }],
            clients: vec![client.to_string()],
        }
    }

    fn sync(db: &Database, mode: ClusterMode, core_token: Option<&str>) -> (ClusterSync, Arc<TrustStore>) {
        let trust = Arc::new(TrustStore::new(
            core_token.map(str::to_string),
            None,
            table("old"),
        ));
        let sync = ClusterSync::new(
            mode,
            vec![],
            Duration::from_millis(500),
            Arc::clone(&trust),
            db.clone(),
            CacheLayer::disabled(),
            reqwest::Client::new(),
        );
        (sync, trust)
    }

    #[tokio::test]
    async fn test_apply_replaces_and_persists() {
        let (db, _temp) = setup_db();
        let (sync, trust) = sync(&db, ClusterMode::Replica, Some("c0re"));

        sync.apply_token_table(table("new")).await;

        assert_eq!(trust.classify("old", None).await.tier, TrustTier::Unauthorized);
        assert_eq!(trust.classify("new", None).await.tier, TrustTier::Client);
        assert_eq!(trust.classify("admin-new", None).await.tier, TrustTier::Admin);
        assert_eq!(db.get_token_table().unwrap(), Some(table("new")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_applies_leave_store_and_db_in_step() {
        let (db, _temp) = setup_db();
        let (sync, trust) = sync(&db, ClusterMode::Replica, Some("c0re"));
        let sync = Arc::new(sync);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let sync = Arc::clone(&sync);
                tokio::spawn(async move { sync.apply_token_table(table(&format!("t{i}"))).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let live = trust.snapshot().await;
        assert_ne!(live, table("old"));
        assert_eq!(db.get_token_table().unwrap(), Some(live));
    }

    #[tokio::test]
    async fn test_distribute_on_replica_does_not_push() {
        let (db, _temp) = setup_db();
        let (sync, _trust) = sync(&db, ClusterMode::Replica, Some("c0re"));
        assert!(sync.distribute(table("new")).await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_target_reported() {
        let (db, _temp) = setup_db();
        let (sync, _trust) = sync(&db, ClusterMode::Core, Some("c0re"));

        // Port 9 (discard) on localhost is expected to refuse connections
        let targets = vec!["http://127.0.0.1:9".to_string()];
        let outcomes = sync.push_token_table(&table("new"), &targets).await;
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].ok);
        assert!(outcomes[0].status.is_none());
        assert!(outcomes[0].error.is_some());
    }

    #[tokio::test]
    async fn test_push_without_core_token() {
        let (db, _temp) = setup_db();
        let (sync, _trust) = sync(&db, ClusterMode::Standalone, None);

        let targets = vec!["http://a".to_string(), "http://b".to_string()];
        let outcomes = sync.push_token_table(&table("new"), &targets).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| !o.ok));
        assert_eq!(outcomes[1].target, "http://b");
    }
}
