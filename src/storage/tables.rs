use redb::TableDefinition;

/// Accounts: account_id -> Account (msgpack)
pub const ACCOUNTS: TableDefinition<u64, &[u8]> = TableDefinition::new("accounts");

/// Unique index: email -> account_id
pub const ACCOUNT_EMAILS: TableDefinition<&str, u64> = TableDefinition::new("account_emails");

/// Public keys: key_id -> PublicKey (msgpack)
pub const PUBLIC_KEYS: TableDefinition<u64, &[u8]> = TableDefinition::new("public_keys");

/// Secondary index: account_id -> Vec<key_id>
pub const ACCOUNT_KEYS: TableDefinition<u64, &[u8]> = TableDefinition::new("account_keys");

/// Groups: group_id -> Group (msgpack)
pub const GROUPS: TableDefinition<u64, &[u8]> = TableDefinition::new("groups");

/// Unique index: group name -> group_id
pub const GROUP_NAMES: TableDefinition<&str, u64> = TableDefinition::new("group_names");

/// Membership: group_id -> Vec<account_id>
pub const GROUP_MEMBERS: TableDefinition<u64, &[u8]> = TableDefinition::new("group_members");

/// Membership (reverse): account_id -> Vec<group_id>
pub const ACCOUNT_GROUPS: TableDefinition<u64, &[u8]> = TableDefinition::new("account_groups");

/// Permissions: permission_id -> Permission (msgpack)
pub const PERMISSIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("permissions");

/// Secondary index: host -> Vec<permission_id>
pub const HOST_PERMISSIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("host_permissions");

/// Secondary index: account_id -> Vec<permission_id>
pub const ACCOUNT_PERMISSIONS: TableDefinition<u64, &[u8]> =
    TableDefinition::new("account_permissions");

/// Secondary index: group_id -> Vec<permission_id>
pub const GROUP_PERMISSIONS: TableDefinition<u64, &[u8]> =
    TableDefinition::new("group_permissions");

/// Id sequences: entity name -> last issued id
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

/// Node metadata: "token_table" -> TokenTable (msgpack)
pub const NODE_META: TableDefinition<&str, &[u8]> = TableDefinition::new("node_meta");
