use chrono::Utc;
use redb::{ReadableTable, Table};

use super::db::{decode, encode, index_add, index_remove, load, load_ids, next_id, Database, DatabaseError};
use super::models::{Account, Group, NewPermission, Permission, PermissionScope};
use super::tables::*;

type HostIndex<'txn> = Table<'txn, &'static str, &'static [u8]>;

impl Database {
    // ========================================================================
    // Permission operations
    // ========================================================================

    /// Grant a (user, host) login to an account or a group
    pub fn create_permission(&self, new: &NewPermission) -> Result<Permission, DatabaseError> {
        let user = new.user.trim();
        let host = new.host.trim();
        if user.is_empty() || host.is_empty() {
            return Err(DatabaseError::Invalid("user and host are required".to_string()));
        }
        let ssh_options = new
            .ssh_options
            .as_deref()
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string);
        if let Some(ref options) = ssh_options {
            validate_ssh_options(options)?;
        }

        let write_txn = self.begin_write()?;
        let permission = {
            match new.scope {
                PermissionScope::Account(id) => {
                    let accounts = write_txn.open_table(ACCOUNTS)?;
                    if load::<Account, _>(&accounts, id)?.is_none() {
                        return Err(DatabaseError::NotFound("Account"));
                    }
                }
                PermissionScope::Group(id) => {
                    let groups = write_txn.open_table(GROUPS)?;
                    if load::<Group, _>(&groups, id)?.is_none() {
                        return Err(DatabaseError::NotFound("Group"));
                    }
                }
            }

            let permission = Permission {
                created_at: Utc::now(),
                host: host.to_string(),
                id: next_id(&write_txn, "permissions")?,
                scope: new.scope,
                ssh_options,
                user: user.to_string(),
            };

            let mut perms = write_txn.open_table(PERMISSIONS)?;
            let data = encode(&permission)?;
            perms.insert(permission.id, data.as_slice())?;

            let mut hosts = write_txn.open_table(HOST_PERMISSIONS)?;
            host_index_add(&mut hosts, &permission.host, permission.id)?;

            let mut owner_index = match permission.scope {
                PermissionScope::Account(_) => write_txn.open_table(ACCOUNT_PERMISSIONS)?,
                PermissionScope::Group(_) => write_txn.open_table(GROUP_PERMISSIONS)?,
            };
            index_add(&mut owner_index, scope_id(permission.scope), permission.id)?;
            permission
        };
        write_txn.commit()?;
        Ok(permission)
    }

    /// Get a permission by id
    pub fn get_permission(&self, id: u64) -> Result<Option<Permission>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(PERMISSIONS)?;
        load(&table, id)
    }

    /// Every permission whose host and user match exactly
    pub fn permissions_for(&self, user: &str, host: &str) -> Result<Vec<Permission>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let hosts = read_txn.open_table(HOST_PERMISSIONS)?;
        let perms = read_txn.open_table(PERMISSIONS)?;

        let ids: Vec<u64> = match hosts.get(host)? {
            Some(data) => decode(data.value())?,
            None => return Ok(Vec::new()),
        };

        let mut matched = Vec::new();
        for id in ids {
            if let Some(perm) = load::<Permission, _>(&perms, id)? {
                if perm.user == user {
                    matched.push(perm);
                }
            }
        }
        Ok(matched)
    }

    /// Permissions owned by an account or group
    pub fn list_permissions(&self, scope: PermissionScope) -> Result<Vec<Permission>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let index = match scope {
            PermissionScope::Account(_) => read_txn.open_table(ACCOUNT_PERMISSIONS)?,
            PermissionScope::Group(_) => read_txn.open_table(GROUP_PERMISSIONS)?,
        };
        let perms = read_txn.open_table(PERMISSIONS)?;

        let mut permissions = Vec::new();
        for id in load_ids(&index, scope_id(scope))? {
            if let Some(perm) = load::<Permission, _>(&perms, id)? {
                permissions.push(perm);
            }
        }
        Ok(permissions)
    }

    /// Replace the SSH option string of a permission owned by `scope`
    pub fn update_permission_options(
        &self,
        scope: PermissionScope,
        id: u64,
        ssh_options: Option<&str>,
    ) -> Result<Permission, DatabaseError> {
        let ssh_options = ssh_options.map(str::trim).filter(|o| !o.is_empty());
        if let Some(options) = ssh_options {
            validate_ssh_options(options)?;
        }

        let write_txn = self.begin_write()?;
        let permission = {
            let mut perms = write_txn.open_table(PERMISSIONS)?;
            let mut permission = match load::<Permission, _>(&perms, id)? {
                Some(p) if p.scope == scope => p,
                _ => return Err(DatabaseError::NotFound("Permission")),
            };
            permission.ssh_options = ssh_options.map(str::to_string);
            let data = encode(&permission)?;
            perms.insert(id, data.as_slice())?;
            permission
        };
        write_txn.commit()?;
        Ok(permission)
    }

    /// Delete a permission owned by `scope`
    pub fn delete_permission(&self, scope: PermissionScope, id: u64) -> Result<(), DatabaseError> {
        let write_txn = self.begin_write()?;
        {
            let mut perms = write_txn.open_table(PERMISSIONS)?;
            let permission = match load::<Permission, _>(&perms, id)? {
                Some(p) if p.scope == scope => p,
                _ => return Err(DatabaseError::NotFound("Permission")),
            };
            perms.remove(id)?;

            let mut hosts = write_txn.open_table(HOST_PERMISSIONS)?;
            host_index_remove(&mut hosts, &permission.host, id)?;

            let mut owner_index = match scope {
                PermissionScope::Account(_) => write_txn.open_table(ACCOUNT_PERMISSIONS)?,
                PermissionScope::Group(_) => write_txn.open_table(GROUP_PERMISSIONS)?,
            };
            index_remove(&mut owner_index, scope_id(scope), id)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

fn scope_id(scope: PermissionScope) -> u64 {
    match scope {
        PermissionScope::Account(id) | PermissionScope::Group(id) => id,
    }
}

/// Options end up verbatim in authorized_keys, so a line break would let a
/// grant inject extra keys.
fn validate_ssh_options(options: &str) -> Result<(), DatabaseError> {
    if options.contains(['\n', '\r']) {
        return Err(DatabaseError::Invalid(
            "ssh_options must be a single line".to_string(),
        ));
    }
    Ok(())
}

fn host_index_add(table: &mut HostIndex<'_>, host: &str, id: u64) -> Result<(), DatabaseError> {
    let mut ids: Vec<u64> = match table.get(host)? {
        Some(data) => decode(data.value())?,
        None => Vec::new(),
    };
    if !ids.contains(&id) {
        ids.push(id);
        let data = encode(&ids)?;
        table.insert(host, data.as_slice())?;
    }
    Ok(())
}

pub(crate) fn host_index_remove(
    table: &mut HostIndex<'_>,
    host: &str,
    id: u64,
) -> Result<(), DatabaseError> {
    let mut ids: Vec<u64> = match table.get(host)? {
        Some(data) => decode(data.value())?,
        None => return Ok(()),
    };
    ids.retain(|v| *v != id);
    if ids.is_empty() {
        table.remove(host)?;
    } else {
        let data = encode(&ids)?;
        table.insert(host, data.as_slice())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{account_permission, new_account, setup_db};

    #[test]
    fn test_permissions_match_user_and_host_exactly() {
        let (db, _temp) = setup_db();
        let account = db.create_account(&new_account("Alice", "alice@example.com")).unwrap();

        db.create_permission(&account_permission(account.id, "deploy", "web1")).unwrap();
        db.create_permission(&account_permission(account.id, "root", "web1")).unwrap();
        db.create_permission(&account_permission(account.id, "deploy", "web2")).unwrap();

        let found = db.permissions_for("deploy", "web1").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].user, "deploy");
        assert_eq!(found[0].host, "web1");

        assert!(db.permissions_for("deploy", "web").unwrap().is_empty());
        assert!(db.permissions_for("deploy", "*").unwrap().is_empty());
    }

    #[test]
    fn test_permission_requires_existing_owner() {
        let (db, _temp) = setup_db();

        let err = db
            .create_permission(&account_permission(7, "deploy", "web1"))
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound("Account")));

        let err = db
            .create_permission(&NewPermission {
                host: "web1".to_string(),
                scope: PermissionScope::Group(7),
                ssh_options: None,
                user: "deploy".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound("Group")));
    }

    #[test]
    fn test_multiline_options_rejected() {
        let (db, _temp) = setup_db();
        let account = db.create_account(&new_account("Alice", "alice@example.com")).unwrap();

        let mut new = account_permission(account.id, "deploy", "web1");
        new.ssh_options = Some("no-pty\nssh-ed25519 AAAA evil".to_string());
        let err = db.create_permission(&new).unwrap_err();
        assert!(matches!(err, DatabaseError::Invalid(_)));
    }

    #[test]
    fn test_delete_permission_respects_scope() {
        let (db, _temp) = setup_db();
        let account = db.create_account(&new_account("Alice", "alice@example.com")).unwrap();
        let group = db.create_group("ops", true).unwrap();
        let perm = db
            .create_permission(&account_permission(account.id, "deploy", "web1"))
            .unwrap();

        let err = db
            .delete_permission(PermissionScope::Group(group.id), perm.id)
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound(_)));

        db.delete_permission(PermissionScope::Account(account.id), perm.id)
            .unwrap();
        assert!(db.permissions_for("deploy", "web1").unwrap().is_empty());
        assert!(db
            .list_permissions(PermissionScope::Account(account.id))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_update_group_permission_options() {
        let (db, _temp) = setup_db();
        let group = db.create_group("ops", true).unwrap();
        let perm = db
            .create_permission(&NewPermission {
                host: "db1".to_string(),
                scope: PermissionScope::Group(group.id),
                ssh_options: None,
                user: "postgres".to_string(),
            })
            .unwrap();

        let updated = db
            .update_permission_options(
                PermissionScope::Group(group.id),
                perm.id,
                Some("command=\"psql\",no-pty"),
            )
            .unwrap();
        assert_eq!(updated.ssh_options.as_deref(), Some("command=\"psql\",no-pty"));

        let cleared = db
            .update_permission_options(PermissionScope::Group(group.id), perm.id, None)
            .unwrap();
        assert!(cleared.ssh_options.is_none());
    }
}
