use chrono::Utc;
use redb::ReadableTable;

use super::db::{
    clamp_page, decode, encode, index_remove, load, load_ids, next_id, store_ids, Database,
    DatabaseError,
};
use super::models::{Account, AccountDetails, NewAccount, Page, Permission, PublicKey};
use super::tables::*;

impl Database {
    // ========================================================================
    // Account operations
    // ========================================================================

    /// Create an account. Emails are unique.
    pub fn create_account(&self, new: &NewAccount) -> Result<Account, DatabaseError> {
        let email = new.email.trim().to_lowercase();
        let name = new.name.trim().to_string();
        if email.is_empty() || !email.contains('@') {
            return Err(DatabaseError::Invalid("a valid email is required".to_string()));
        }
        if name.is_empty() {
            return Err(DatabaseError::Invalid("name is required".to_string()));
        }

        let write_txn = self.begin_write()?;
        let account = {
            let mut emails = write_txn.open_table(ACCOUNT_EMAILS)?;
            if emails.get(email.as_str())?.is_some() {
                return Err(DatabaseError::Conflict(format!(
                    "Account with email {email} already exists"
                )));
            }

            let account = Account {
                active: true,
                created_at: Utc::now(),
                email,
                id: next_id(&write_txn, "accounts")?,
                name,
                updated_at: None,
            };

            let mut accounts = write_txn.open_table(ACCOUNTS)?;
            let data = encode(&account)?;
            accounts.insert(account.id, data.as_slice())?;
            emails.insert(account.email.as_str(), account.id)?;
            account
        };
        write_txn.commit()?;
        Ok(account)
    }

    /// Get an account by id
    pub fn get_account(&self, id: u64) -> Result<Option<Account>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(ACCOUNTS)?;
        load(&table, id)
    }

    /// Get an account by email
    pub fn get_account_by_email(&self, email: &str) -> Result<Option<Account>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let emails = read_txn.open_table(ACCOUNT_EMAILS)?;
        let id = match emails.get(email.trim().to_lowercase().as_str())? {
            Some(id) => id.value(),
            None => return Ok(None),
        };
        let accounts = read_txn.open_table(ACCOUNTS)?;
        load(&accounts, id)
    }

    /// Get an account together with its keys, direct permissions and groups
    pub fn get_account_details(&self, id: u64) -> Result<AccountDetails, DatabaseError> {
        let read_txn = self.begin_read()?;
        let accounts = read_txn.open_table(ACCOUNTS)?;
        let account: Account = load(&accounts, id)?.ok_or(DatabaseError::NotFound("Account"))?;

        let key_index = read_txn.open_table(ACCOUNT_KEYS)?;
        let keys_table = read_txn.open_table(PUBLIC_KEYS)?;
        let mut public_keys = Vec::new();
        for key_id in load_ids(&key_index, id)? {
            if let Some(key) = load::<PublicKey, _>(&keys_table, key_id)? {
                public_keys.push(key);
            }
        }

        let perm_index = read_txn.open_table(ACCOUNT_PERMISSIONS)?;
        let perms_table = read_txn.open_table(PERMISSIONS)?;
        let mut permissions = Vec::new();
        for perm_id in load_ids(&perm_index, id)? {
            if let Some(perm) = load::<Permission, _>(&perms_table, perm_id)? {
                permissions.push(perm);
            }
        }

        let group_index = read_txn.open_table(ACCOUNT_GROUPS)?;
        let groups_table = read_txn.open_table(GROUPS)?;
        let mut groups = Vec::new();
        for group_id in load_ids(&group_index, id)? {
            if let Some(group) = load(&groups_table, group_id)? {
                groups.push(group);
            }
        }

        Ok(AccountDetails {
            account,
            groups,
            permissions,
            public_keys,
        })
    }

    /// List accounts ordered by name
    pub fn list_accounts(&self, limit: usize, offset: usize) -> Result<Page<Account>, DatabaseError> {
        self.search_accounts(None, None, limit, offset)
    }

    /// Case-insensitive substring search on name and/or email, ordered by name
    pub fn search_accounts(
        &self,
        name: Option<&str>,
        email: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Page<Account>, DatabaseError> {
        let (limit, offset) = clamp_page(limit, offset);
        let name = name.map(str::to_lowercase).filter(|s| !s.is_empty());
        let email = email.map(str::to_lowercase).filter(|s| !s.is_empty());

        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(ACCOUNTS)?;

        let mut found = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            let account: Account = decode(value.value())?;
            if let Some(ref n) = name {
                if !account.name.to_lowercase().contains(n.as_str()) {
                    continue;
                }
            }
            if let Some(ref e) = email {
                if !account.email.contains(e.as_str()) {
                    continue;
                }
            }
            found.push(account);
        }

        found.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        let total = found.len();
        let rows = found.into_iter().skip(offset).take(limit).collect();

        Ok(Page {
            limit,
            offset,
            rows,
            total,
        })
    }

    /// Enable or disable an account. Its permission rows are kept.
    pub fn set_account_active(&self, id: u64, active: bool) -> Result<Account, DatabaseError> {
        let write_txn = self.begin_write()?;
        let account = {
            let mut table = write_txn.open_table(ACCOUNTS)?;
            let mut account: Account =
                load(&table, id)?.ok_or(DatabaseError::NotFound("Account"))?;
            account.active = active;
            account.updated_at = Some(Utc::now());
            let data = encode(&account)?;
            table.insert(id, data.as_slice())?;
            account
        };
        write_txn.commit()?;
        Ok(account)
    }

    /// Delete an account with its keys, direct permissions and memberships
    pub fn delete_account(&self, id: u64) -> Result<(), DatabaseError> {
        let write_txn = self.begin_write()?;
        {
            let mut accounts = write_txn.open_table(ACCOUNTS)?;
            let account: Account =
                load(&accounts, id)?.ok_or(DatabaseError::NotFound("Account"))?;
            accounts.remove(id)?;

            let mut emails = write_txn.open_table(ACCOUNT_EMAILS)?;
            emails.remove(account.email.as_str())?;

            // Keys
            let mut key_index = write_txn.open_table(ACCOUNT_KEYS)?;
            let mut keys = write_txn.open_table(PUBLIC_KEYS)?;
            for key_id in load_ids(&key_index, id)? {
                keys.remove(key_id)?;
            }
            store_ids(&mut key_index, id, &[])?;

            // Direct permissions
            let mut perm_index = write_txn.open_table(ACCOUNT_PERMISSIONS)?;
            let mut perms = write_txn.open_table(PERMISSIONS)?;
            let mut hosts = write_txn.open_table(HOST_PERMISSIONS)?;
            for perm_id in load_ids(&perm_index, id)? {
                if let Some(perm) = load::<Permission, _>(&perms, perm_id)? {
                    super::permissions::host_index_remove(&mut hosts, &perm.host, perm_id)?;
                }
                perms.remove(perm_id)?;
            }
            store_ids(&mut perm_index, id, &[])?;

            // Memberships
            let mut account_groups = write_txn.open_table(ACCOUNT_GROUPS)?;
            let mut members = write_txn.open_table(GROUP_MEMBERS)?;
            for group_id in load_ids(&account_groups, id)? {
                index_remove(&mut members, group_id, id)?;
            }
            store_ids(&mut account_groups, id, &[])?;
        }
        write_txn.commit()?;
        Ok(())
    }
}
