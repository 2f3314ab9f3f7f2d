use chrono::Utc;

use super::db::{encode, index_add, index_remove, load, load_ids, next_id, Database, DatabaseError};
use super::models::{Account, NewPublicKey, PublicKey};
use super::tables::*;

impl Database {
    // ========================================================================
    // Public key operations
    // ========================================================================

    /// Attach a key to an account. Fingerprints are unique per account.
    pub fn add_public_key(
        &self,
        account_id: u64,
        new: &NewPublicKey,
    ) -> Result<PublicKey, DatabaseError> {
        debug_assert!(!new.fingerprint.is_empty(), "fingerprint must be computed");

        let write_txn = self.begin_write()?;
        let key = {
            let accounts = write_txn.open_table(ACCOUNTS)?;
            if load::<Account, _>(&accounts, account_id)?.is_none() {
                return Err(DatabaseError::NotFound("Account"));
            }

            let mut index = write_txn.open_table(ACCOUNT_KEYS)?;
            let mut keys = write_txn.open_table(PUBLIC_KEYS)?;
            for key_id in load_ids(&index, account_id)? {
                if let Some(existing) = load::<PublicKey, _>(&keys, key_id)? {
                    if existing.fingerprint == new.fingerprint {
                        return Err(DatabaseError::Conflict(format!(
                            "Key {} already exists for this account",
                            new.fingerprint
                        )));
                    }
                }
            }

            let key = PublicKey {
                account_id,
                comment: new.comment.clone(),
                created_at: Utc::now(),
                data: new.data.clone(),
                fingerprint: new.fingerprint.clone(),
                id: next_id(&write_txn, "public_keys")?,
                key_type: new.key_type.clone(),
                signature: new.signature.clone(),
            };
            let data = encode(&key)?;
            keys.insert(key.id, data.as_slice())?;
            index_add(&mut index, account_id, key.id)?;
            key
        };
        write_txn.commit()?;
        Ok(key)
    }

    /// All keys owned by an account
    pub fn list_keys_for_account(&self, account_id: u64) -> Result<Vec<PublicKey>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let index = read_txn.open_table(ACCOUNT_KEYS)?;
        let keys_table = read_txn.open_table(PUBLIC_KEYS)?;

        let mut keys = Vec::new();
        for key_id in load_ids(&index, account_id)? {
            if let Some(key) = load(&keys_table, key_id)? {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    /// Delete a key, which must belong to the given account
    pub fn delete_public_key(&self, account_id: u64, key_id: u64) -> Result<(), DatabaseError> {
        let write_txn = self.begin_write()?;
        {
            let mut keys = write_txn.open_table(PUBLIC_KEYS)?;
            match load::<PublicKey, _>(&keys, key_id)? {
                Some(key) if key.account_id == account_id => {}
                _ => return Err(DatabaseError::NotFound("Public key")),
            }
            keys.remove(key_id)?;

            let mut index = write_txn.open_table(ACCOUNT_KEYS)?;
            index_remove(&mut index, account_id, key_id)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{new_account, new_key, setup_db};

    #[test]
    fn test_add_and_list_keys() {
        let (db, _temp) = setup_db();
        let account = db.create_account(&new_account("Alice", "alice@example.com")).unwrap();

        db.add_public_key(account.id, &new_key(1, false)).unwrap();
        db.add_public_key(account.id, &new_key(2, true)).unwrap();

        let keys = db.list_keys_for_account(account.id).unwrap();
        assert_eq!(keys.len(), 2);
        assert!(!keys[0].is_signed());
        assert!(keys[1].is_signed());
    }

    #[test]
    fn test_duplicate_fingerprint_rejected_per_account() {
        let (db, _temp) = setup_db();
        let alice = db.create_account(&new_account("Alice", "alice@example.com")).unwrap();
        let bob = db.create_account(&new_account("Bob", "bob@example.com")).unwrap();

        db.add_public_key(alice.id, &new_key(1, false)).unwrap();
        let err = db.add_public_key(alice.id, &new_key(1, false)).unwrap_err();
        assert!(matches!(err, DatabaseError::Conflict(_)));

        // Same key under another account is allowed
        db.add_public_key(bob.id, &new_key(1, false)).unwrap();
    }

    #[test]
    fn test_add_key_to_missing_account() {
        let (db, _temp) = setup_db();
        let err = db.add_public_key(42, &new_key(1, false)).unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound(_)));
    }

    #[test]
    fn test_delete_key_checks_owner() {
        let (db, _temp) = setup_db();
        let alice = db.create_account(&new_account("Alice", "alice@example.com")).unwrap();
        let bob = db.create_account(&new_account("Bob", "bob@example.com")).unwrap();
        let key = db.add_public_key(alice.id, &new_key(1, false)).unwrap();

        let err = db.delete_public_key(bob.id, key.id).unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound(_)));

        db.delete_public_key(alice.id, key.id).unwrap();
        assert!(db.list_keys_for_account(alice.id).unwrap().is_empty());
    }
}
