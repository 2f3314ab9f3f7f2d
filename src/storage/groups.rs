use chrono::Utc;
use redb::ReadableTable;

use super::db::{
    clamp_page, decode, encode, index_add, index_remove, load, load_ids, next_id, store_ids,
    Database, DatabaseError,
};
use super::models::{Account, Group, GroupDetails, Page, Permission};
use super::permissions::host_index_remove;
use super::tables::*;

impl Database {
    // ========================================================================
    // Group operations
    // ========================================================================

    /// Create a group. Names are unique.
    pub fn create_group(&self, name: &str, active: bool) -> Result<Group, DatabaseError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DatabaseError::Invalid("name is required".to_string()));
        }

        let write_txn = self.begin_write()?;
        let group = {
            let mut names = write_txn.open_table(GROUP_NAMES)?;
            if names.get(name)?.is_some() {
                return Err(DatabaseError::Conflict(format!(
                    "Group {name} already exists"
                )));
            }

            let group = Group {
                active,
                created_at: Utc::now(),
                id: next_id(&write_txn, "groups")?,
                name: name.to_string(),
                updated_at: None,
            };
            let mut groups = write_txn.open_table(GROUPS)?;
            let data = encode(&group)?;
            groups.insert(group.id, data.as_slice())?;
            names.insert(group.name.as_str(), group.id)?;
            group
        };
        write_txn.commit()?;
        Ok(group)
    }

    /// Get a group by id
    pub fn get_group(&self, id: u64) -> Result<Option<Group>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(GROUPS)?;
        load(&table, id)
    }

    /// Get a group by its unique name
    pub fn get_group_by_name(&self, name: &str) -> Result<Option<Group>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let names = read_txn.open_table(GROUP_NAMES)?;
        let id = match names.get(name)? {
            Some(id) => id.value(),
            None => return Ok(None),
        };
        let groups = read_txn.open_table(GROUPS)?;
        load(&groups, id)
    }

    /// Get a group together with its members and permissions
    pub fn get_group_details(&self, id: u64) -> Result<GroupDetails, DatabaseError> {
        let read_txn = self.begin_read()?;
        let groups = read_txn.open_table(GROUPS)?;
        let group: Group = load(&groups, id)?.ok_or(DatabaseError::NotFound("Group"))?;

        let members = read_txn.open_table(GROUP_MEMBERS)?;
        let accounts_table = read_txn.open_table(ACCOUNTS)?;
        let mut accounts = Vec::new();
        for account_id in load_ids(&members, id)? {
            if let Some(account) = load::<Account, _>(&accounts_table, account_id)? {
                accounts.push(account);
            }
        }
        accounts.sort_by(|a, b| a.name.cmp(&b.name));

        let perm_index = read_txn.open_table(GROUP_PERMISSIONS)?;
        let perms_table = read_txn.open_table(PERMISSIONS)?;
        let mut permissions = Vec::new();
        for perm_id in load_ids(&perm_index, id)? {
            if let Some(perm) = load::<Permission, _>(&perms_table, perm_id)? {
                permissions.push(perm);
            }
        }

        Ok(GroupDetails {
            accounts,
            group,
            permissions,
        })
    }

    /// List groups ordered by name, optionally filtered by a name substring
    pub fn search_groups(
        &self,
        name: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Page<Group>, DatabaseError> {
        let (limit, offset) = clamp_page(limit, offset);
        let name = name.map(str::to_lowercase).filter(|s| !s.is_empty());

        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(GROUPS)?;

        let mut found = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            let group: Group = decode(value.value())?;
            if let Some(ref n) = name {
                if !group.name.to_lowercase().contains(n.as_str()) {
                    continue;
                }
            }
            found.push(group);
        }

        found.sort_by(|a, b| a.name.cmp(&b.name));
        let total = found.len();
        let rows = found.into_iter().skip(offset).take(limit).collect();

        Ok(Page {
            limit,
            offset,
            rows,
            total,
        })
    }

    /// Enable or disable a group
    pub fn set_group_active(&self, id: u64, active: bool) -> Result<Group, DatabaseError> {
        let write_txn = self.begin_write()?;
        let group = {
            let mut table = write_txn.open_table(GROUPS)?;
            let mut group: Group = load(&table, id)?.ok_or(DatabaseError::NotFound("Group"))?;
            group.active = active;
            group.updated_at = Some(Utc::now());
            let data = encode(&group)?;
            table.insert(id, data.as_slice())?;
            group
        };
        write_txn.commit()?;
        Ok(group)
    }

    /// Delete a group with its permissions and memberships. Member accounts stay.
    pub fn delete_group(&self, id: u64) -> Result<(), DatabaseError> {
        let write_txn = self.begin_write()?;
        {
            let mut groups = write_txn.open_table(GROUPS)?;
            let group: Group = load(&groups, id)?.ok_or(DatabaseError::NotFound("Group"))?;
            groups.remove(id)?;

            let mut names = write_txn.open_table(GROUP_NAMES)?;
            names.remove(group.name.as_str())?;

            let mut perm_index = write_txn.open_table(GROUP_PERMISSIONS)?;
            let mut perms = write_txn.open_table(PERMISSIONS)?;
            let mut hosts = write_txn.open_table(HOST_PERMISSIONS)?;
            for perm_id in load_ids(&perm_index, id)? {
                if let Some(perm) = load::<Permission, _>(&perms, perm_id)? {
                    host_index_remove(&mut hosts, &perm.host, perm_id)?;
                }
                perms.remove(perm_id)?;
            }
            store_ids(&mut perm_index, id, &[])?;

            let mut members = write_txn.open_table(GROUP_MEMBERS)?;
            let mut account_groups = write_txn.open_table(ACCOUNT_GROUPS)?;
            for account_id in load_ids(&members, id)? {
                index_remove(&mut account_groups, account_id, id)?;
            }
            store_ids(&mut members, id, &[])?;
        }
        write_txn.commit()?;
        Ok(())
    }

    // ========================================================================
    // Membership operations
    // ========================================================================

    /// Add an account to a group. Returns false if it was already a member.
    pub fn add_group_member(&self, group_id: u64, account_id: u64) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let added = {
            let groups = write_txn.open_table(GROUPS)?;
            if load::<Group, _>(&groups, group_id)?.is_none() {
                return Err(DatabaseError::NotFound("Group"));
            }
            let accounts = write_txn.open_table(ACCOUNTS)?;
            if load::<Account, _>(&accounts, account_id)?.is_none() {
                return Err(DatabaseError::NotFound("Account"));
            }

            let mut members = write_txn.open_table(GROUP_MEMBERS)?;
            let added = index_add(&mut members, group_id, account_id)?;
            let mut account_groups = write_txn.open_table(ACCOUNT_GROUPS)?;
            index_add(&mut account_groups, account_id, group_id)?;
            added
        };
        write_txn.commit()?;
        Ok(added)
    }

    /// Remove an account from a group. Returns false if it was not a member.
    pub fn remove_group_member(
        &self,
        group_id: u64,
        account_id: u64,
    ) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let removed = {
            let mut members = write_txn.open_table(GROUP_MEMBERS)?;
            let removed = index_remove(&mut members, group_id, account_id)?;
            let mut account_groups = write_txn.open_table(ACCOUNT_GROUPS)?;
            index_remove(&mut account_groups, account_id, group_id)?;
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Active accounts of an active group. An inactive group has no effective members.
    pub fn active_members_of_group(&self, group_id: u64) -> Result<Vec<Account>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let groups = read_txn.open_table(GROUPS)?;
        match load::<Group, _>(&groups, group_id)? {
            Some(group) if group.active => {}
            _ => return Ok(Vec::new()),
        }

        let members = read_txn.open_table(GROUP_MEMBERS)?;
        let accounts_table = read_txn.open_table(ACCOUNTS)?;
        let mut accounts = Vec::new();
        for account_id in load_ids(&members, group_id)? {
            if let Some(account) = load::<Account, _>(&accounts_table, account_id)? {
                if account.active {
                    accounts.push(account);
                }
            }
        }
        Ok(accounts)
    }
}
