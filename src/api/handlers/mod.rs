mod accounts;
mod admin;
mod authorized_keys;
mod groups;
mod tokens;

use serde::Deserialize;

/// Shared pagination query parameters for list endpoints.
/// Zero or missing `limit` means the default page size.
#[derive(Debug, Default, Deserialize)]
pub struct PaginationParams {
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

pub use accounts::{
    add_account_keys, add_account_permission, create_account, delete_account,
    delete_account_key, delete_account_permission, get_account, import_account_keys,
    list_accounts, search_accounts, update_account,
};
pub use admin::health;
pub use authorized_keys::{keys_for_host, keys_for_peer};
pub use groups::{
    add_group_account, add_group_accounts, add_group_permission, create_group, delete_group,
    delete_group_permission, get_group, list_groups, remove_group_account, update_group,
    update_group_permission,
};
pub use tokens::push_tokens;

use crate::trust::AuthContext;

/// Name of the caller for mutation logs
fn actor(ctx: &AuthContext) -> &str {
    ctx.acting_identity.as_deref().unwrap_or("anonymous")
}
