use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::keys::AuthorizedKey;

/// A login observed with a key we served
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub email: String,
    pub host: String,
    pub timestamp: DateTime<Utc>,
    pub user: String,
}

/// Destination for audit records. Delivery failures are the sink's problem.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log(&self, record: AuditRecord);
}

/// Writes records to the `audit` tracing target
pub struct LogAudit;

#[async_trait]
impl AuditSink for LogAudit {
    async fn log(&self, record: AuditRecord) {
        info!(
            target: "audit",
            user = %record.user,
            host = %record.host,
            email = %record.email,
            timestamp = %record.timestamp,
            "Key used"
        );
    }
}

/// POSTs records as JSON to a remote collector
pub struct RemoteLogger {
    client: reqwest::Client,
    url: String,
}

impl RemoteLogger {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl AuditSink for RemoteLogger {
    async fn log(&self, record: AuditRecord) {
        let result = self
            .client
            .post(&self.url)
            .json(&record)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        if let Err(e) = result {
            warn!(error = %e, user = %record.user, host = %record.host, "Audit delivery failed");
        }
    }
}

/// If `fingerprint` is among `keys`, hand an audit record to `sink` on a
/// background task. Never blocks or fails the caller.
pub fn check_fingerprint(
    sink: Arc<dyn AuditSink>,
    user: &str,
    host: &str,
    fingerprint: &str,
    keys: &[AuthorizedKey],
) -> Option<tokio::task::JoinHandle<()>> {
    let Some(key) = keys.iter().find(|k| k.fingerprint == fingerprint) else {
        debug!(
            user = %user,
            host = %host,
            fingerprint = %fingerprint,
            "No public key found for fingerprint"
        );
        return None;
    };

    let record = AuditRecord {
        email: key.email.clone(),
        host: host.to_string(),
        timestamp: Utc::now(),
        user: user.to_string(),
    };
    Some(tokio::spawn(async move { sink.log(record).await }))
}
