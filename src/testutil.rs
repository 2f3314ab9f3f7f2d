//! Shared test helpers, available to all `#[cfg(test)]` modules in the crate.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tempfile::TempDir;

use crate::cache::CacheLayer;
use crate::config::Config;
use crate::keys::fingerprint;
use crate::storage::models::{NewAccount, NewPermission, NewPublicKey, PermissionScope};
use crate::storage::Database;
use crate::AppState;

pub const CLIENT_TOKEN: &str = "ababab";
pub const ADMIN_TOKEN: &str = "admin-secret";
pub const CORE_TOKEN: &str = "core-secret";

/// Open a fresh database in a temporary directory.
///
/// Returns both the `Database` and the `TempDir` guard; the caller must
/// keep the `TempDir` alive for the duration of the test.
pub fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open(temp_dir.path()).unwrap();
    (db, temp_dir)
}

/// A standalone `Config` with one token per tier and an in-process cache.
pub fn test_config() -> Config {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("NODE_ID", "test-node"),
        ("DATA_DIR", "/tmp/test"),
        ("CLIENT_TOKENS", CLIENT_TOKEN),
        ("ADMIN_TOKENS", "admin-secret:ops@example.com"),
        ("CORE_TOKEN", CORE_TOKEN),
        ("CACHE_ENABLED", "memory"),
    ]);
    Config::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap()
}

/// Build a full `Arc<AppState>` around the given database.
///
/// Uses a `reqwest::Client` with proxy disabled
/// (avoids macOS system-configuration panics in sandboxed tests).
pub async fn test_state(db: Database, config: Config) -> Arc<AppState> {
    let cache = CacheLayer::from_config(&config.cache).await.unwrap();
    let http_client = reqwest::Client::builder().no_proxy().build().unwrap();
    Arc::new(AppState::new(config, db, cache, http_client).unwrap())
}

pub fn new_account(name: &str, email: &str) -> NewAccount {
    NewAccount {
        email: email.to_string(),
        name: name.to_string(),
    }
}

/// A well-formed ed25519 key blob whose 32 key bytes are all `seed`
pub fn key_blob(seed: u8) -> Vec<u8> {
    let mut blob = Vec::new();
    blob.extend_from_slice(&11u32.to_be_bytes());
    blob.extend_from_slice(b"ssh-ed25519");
    blob.extend_from_slice(&32u32.to_be_bytes());
    blob.extend_from_slice(&[seed; 32]);
    blob
}

/// `ssh-ed25519 <base64> <comment>` for [`key_blob`]
pub fn key_line(seed: u8, comment: &str) -> String {
    format!("ssh-ed25519 {} {}", STANDARD.encode(key_blob(seed)), comment)
}

pub fn new_key(seed: u8, signed: bool) -> NewPublicKey {
    let blob = key_blob(seed);
    NewPublicKey {
        comment: Some(format!("key-{seed}")),
        data: STANDARD.encode(&blob),
        fingerprint: fingerprint(&blob),
        key_type: "ssh-ed25519".to_string(),
        signature: signed.then(|| "sig".to_string()),
    }
}

pub fn account_permission(account_id: u64, user: &str, host: &str) -> NewPermission {
    NewPermission {
        host: host.to_string(),
        scope: PermissionScope::Account(account_id),
        ssh_options: None,
        user: user.to_string(),
    }
}
