use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A person (or service) that owns public keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub email: String,
    pub id: u64,
    pub name: String,
    pub updated_at: Option<DateTime<Utc>>,
}

/// An OpenSSH public key owned by exactly one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicKey {
    pub account_id: u64,
    /// Trailing comment of the key line, if any
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Base64 key blob
    pub data: String,
    /// `SHA256:` fingerprint, unique within the owning account
    pub fingerprint: String,
    pub id: u64,
    /// Key algorithm, e.g. `ssh-ed25519`
    pub key_type: String,
    /// Detached signature over the key, present for signed keys
    pub signature: Option<String>,
}

impl PublicKey {
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// The `type data` form, without comment
    pub fn material(&self) -> String {
        format!("{} {}", self.key_type, self.data)
    }
}

/// A named collection of accounts sharing permissions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub id: u64,
    pub name: String,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Who a permission is granted to. Exactly one of account or group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum PermissionScope {
    Account(u64),
    Group(u64),
}

/// A (user, host) login grant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    pub created_at: DateTime<Utc>,
    pub host: String,
    pub id: u64,
    pub scope: PermissionScope,
    /// authorized_keys option string, e.g. `command="uptime",no-pty`
    pub ssh_options: Option<String>,
    pub user: String,
}

/// Account with everything it owns, as returned by by-id lookups
#[derive(Debug, Clone, Serialize)]
pub struct AccountDetails {
    #[serde(flatten)]
    pub account: Account,
    pub groups: Vec<Group>,
    pub permissions: Vec<Permission>,
    pub public_keys: Vec<PublicKey>,
}

/// Group with its members and permissions
#[derive(Debug, Clone, Serialize)]
pub struct GroupDetails {
    #[serde(flatten)]
    pub group: Group,
    pub accounts: Vec<Account>,
    pub permissions: Vec<Permission>,
}

/// One page of a list query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub limit: usize,
    pub offset: usize,
    pub rows: Vec<T>,
    pub total: usize,
}

/// Fields required to create an account
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub name: String,
}

/// A parsed key ready to be attached to an account
#[derive(Debug, Clone)]
pub struct NewPublicKey {
    pub comment: Option<String>,
    pub data: String,
    pub fingerprint: String,
    pub key_type: String,
    pub signature: Option<String>,
}

/// Fields required to create a permission
#[derive(Debug, Clone)]
pub struct NewPermission {
    pub host: String,
    pub scope: PermissionScope,
    pub ssh_options: Option<String>,
    pub user: String,
}
