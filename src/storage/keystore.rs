use async_trait::async_trait;

use super::db::{Database, DatabaseError};
use super::models::{Account, Permission, PublicKey};

/// Read side of the key store consumed by the authorization resolver
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Permissions whose user and host both match exactly
    async fn permissions_for(&self, user: &str, host: &str)
        -> Result<Vec<Permission>, DatabaseError>;

    async fn keys_for_account(&self, account_id: u64) -> Result<Vec<PublicKey>, DatabaseError>;

    /// Active accounts of a group; empty when the group itself is inactive
    async fn active_members_of_group(&self, group_id: u64) -> Result<Vec<Account>, DatabaseError>;

    async fn account(&self, account_id: u64) -> Result<Option<Account>, DatabaseError>;
}

#[async_trait]
impl KeyStore for Database {
    async fn permissions_for(
        &self,
        user: &str,
        host: &str,
    ) -> Result<Vec<Permission>, DatabaseError> {
        let db = self.clone();
        let (user, host) = (user.to_string(), host.to_string());
        tokio::task::spawn_blocking(move || db.permissions_for(&user, &host)).await?
    }

    async fn keys_for_account(&self, account_id: u64) -> Result<Vec<PublicKey>, DatabaseError> {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.list_keys_for_account(account_id)).await?
    }

    async fn active_members_of_group(&self, group_id: u64) -> Result<Vec<Account>, DatabaseError> {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.active_members_of_group(group_id)).await?
    }

    async fn account(&self, account_id: u64) -> Result<Option<Account>, DatabaseError> {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.get_account(account_id)).await?
    }
}
