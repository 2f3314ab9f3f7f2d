//! keyhub - centralized SSH authorized_keys service
//!
//! This crate provides:
//! - Key resolution for (user, host) logins from account and group permissions
//! - A cache-aside layer (in-process or Redis) flushed on every mutation
//! - Core / admin / client bearer token tiers with an optional external authorizer
//! - Push distribution of the token table from a core instance to replicas
//! - redb embedded database (ACID, MVCC, crash-safe)
//! - REST API

pub mod api;
pub mod authz;
pub mod cache;
pub mod cluster;
pub mod config;
pub mod dns;
pub mod keys;
pub mod storage;
#[cfg(test)]
pub mod testutil;
pub mod trust;

use std::sync::Arc;
use std::time::Duration;

use authz::{AuditSink, AuthorizationResolver, LogAudit, RemoteLogger};
use cache::CacheLayer;
use cluster::ClusterSync;
use config::Config;
use dns::{HostResolver, SystemResolver};
use storage::{Database, DatabaseError};
use trust::{HttpAuthorizer, TrustAuthority, TrustStore};

/// Shared application state
pub struct AppState {
    pub audit: Arc<dyn AuditSink>,
    pub cache: CacheLayer,
    pub cluster: ClusterSync,
    pub config: Config,
    pub db: Database,
    pub dns: Arc<dyn HostResolver>,
    pub http_client: reqwest::Client,
    pub resolver: AuthorizationResolver,
    pub trust: TrustAuthority,
}

impl AppState {
    /// Wire every component from configuration.
    ///
    /// A token table persisted by an earlier push takes precedence over the
    /// tables in `config`, so a restart does not bring back revoked tokens.
    pub fn new(
        config: Config,
        db: Database,
        cache: CacheLayer,
        http_client: reqwest::Client,
    ) -> Result<Self, DatabaseError> {
        let persisted = db.get_token_table()?;
        if persisted.is_some() {
            tracing::info!("Using persisted token table");
        }
        let store = Arc::new(TrustStore::from_config(&config.auth, persisted));

        let mut trust = TrustAuthority::new(Arc::clone(&store));
        if let Some(url) = &config.integrations.authorizer_url {
            tracing::info!(url = %url, "External authorizer enabled");
            trust = trust.with_authorizer(
                Arc::new(HttpAuthorizer::new(http_client.clone(), url.clone())),
                Duration::from_millis(config.integrations.authorizer_timeout_ms),
            );
        }

        let audit: Arc<dyn AuditSink> = match &config.integrations.audit_url {
            Some(url) => Arc::new(RemoteLogger::new(http_client.clone(), url.clone())),
            None => Arc::new(LogAudit),
        };

        let cluster = ClusterSync::new(
            config.cluster.mode,
            config.cluster.replicas.clone(),
            Duration::from_millis(config.cluster.push_timeout_ms),
            store,
            db.clone(),
            cache.clone(),
            http_client.clone(),
        );

        let resolver = AuthorizationResolver::new(Arc::new(db.clone()), cache.clone());

        Ok(Self {
            audit,
            cache,
            cluster,
            config,
            db,
            dns: Arc::new(SystemResolver),
            http_client,
            resolver,
            trust,
        })
    }
}
