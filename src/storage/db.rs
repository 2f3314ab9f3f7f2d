use redb::{Database as RedbDatabase, ReadTransaction, ReadableTable, Table, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::tables::*;
use crate::trust::TokenTable;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("{0}")]
    Conflict(String),
    #[error("Deserialization error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("Serialization error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("{0}")]
    Invalid(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("Database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),
    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
}

/// Handle to the embedded key store. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    db: Arc<RedbDatabase>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, DatabaseError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db_path = data_dir.as_ref().join("keyhub.redb");
        let db = RedbDatabase::create(db_path)?;

        // Create tables up front so read transactions never miss one
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ACCOUNTS)?;
            let _ = write_txn.open_table(ACCOUNT_EMAILS)?;
            let _ = write_txn.open_table(PUBLIC_KEYS)?;
            let _ = write_txn.open_table(ACCOUNT_KEYS)?;
            let _ = write_txn.open_table(GROUPS)?;
            let _ = write_txn.open_table(GROUP_NAMES)?;
            let _ = write_txn.open_table(GROUP_MEMBERS)?;
            let _ = write_txn.open_table(ACCOUNT_GROUPS)?;
            let _ = write_txn.open_table(PERMISSIONS)?;
            let _ = write_txn.open_table(HOST_PERMISSIONS)?;
            let _ = write_txn.open_table(ACCOUNT_PERMISSIONS)?;
            let _ = write_txn.open_table(GROUP_PERMISSIONS)?;
            let _ = write_txn.open_table(SEQUENCES)?;
            let _ = write_txn.open_table(NODE_META)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Begin a read transaction
    pub fn begin_read(&self) -> Result<ReadTransaction, DatabaseError> {
        Ok(self.db.begin_read()?)
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> Result<WriteTransaction, DatabaseError> {
        Ok(self.db.begin_write()?)
    }

    // ========================================================================
    // Node metadata
    // ========================================================================

    /// Load the last applied token table, if one was ever persisted
    pub fn get_token_table(&self) -> Result<Option<TokenTable>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(NODE_META)?;

        match table.get("token_table")? {
            Some(data) => Ok(Some(decode(data.value())?)),
            None => Ok(None),
        }
    }

    /// Replace the persisted token table
    pub fn put_token_table(&self, tokens: &TokenTable) -> Result<(), DatabaseError> {
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(NODE_META)?;
            let data = encode(tokens)?;
            table.insert("token_table", data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

// ============================================================================
// Transaction helpers shared by the entity modules
// ============================================================================

pub(crate) type IdIndex<'txn> = Table<'txn, u64, &'static [u8]>;

pub(crate) fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, DatabaseError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DatabaseError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Issue the next id for an entity kind
pub(crate) fn next_id(txn: &WriteTransaction, entity: &str) -> Result<u64, DatabaseError> {
    let mut table = txn.open_table(SEQUENCES)?;
    let last = table.get(entity)?.map(|v| v.value()).unwrap_or(0);
    let next = last + 1;
    table.insert(entity, next)?;
    Ok(next)
}

/// Read one msgpack-encoded record from a u64-keyed table
pub(crate) fn load<T, R>(table: &R, id: u64) -> Result<Option<T>, DatabaseError>
where
    T: DeserializeOwned,
    R: ReadableTable<u64, &'static [u8]>,
{
    let value = match table.get(id)? {
        Some(data) => Some(decode(data.value())?),
        None => None,
    };
    Ok(value)
}

/// Read an id list from a u64-keyed index table
pub(crate) fn load_ids<R>(table: &R, key: u64) -> Result<Vec<u64>, DatabaseError>
where
    R: ReadableTable<u64, &'static [u8]>,
{
    let ids = match table.get(key)? {
        Some(data) => decode(data.value())?,
        None => Vec::new(),
    };
    Ok(ids)
}

/// Overwrite an id list in a u64-keyed index table, removing the row when empty
pub(crate) fn store_ids(table: &mut IdIndex<'_>, key: u64, ids: &[u64]) -> Result<(), DatabaseError> {
    if ids.is_empty() {
        table.remove(key)?;
    } else {
        let data = encode(ids)?;
        table.insert(key, data.as_slice())?;
    }
    Ok(())
}

/// Add an id to an index row if not already present
pub(crate) fn index_add(table: &mut IdIndex<'_>, key: u64, id: u64) -> Result<bool, DatabaseError> {
    let mut ids = load_ids(&*table, key)?;
    if ids.contains(&id) {
        return Ok(false);
    }
    ids.push(id);
    store_ids(table, key, &ids)?;
    Ok(true)
}

/// Remove an id from an index row
pub(crate) fn index_remove(
    table: &mut IdIndex<'_>,
    key: u64,
    id: u64,
) -> Result<bool, DatabaseError> {
    let mut ids = load_ids(&*table, key)?;
    let before = ids.len();
    ids.retain(|v| *v != id);
    if ids.len() == before {
        return Ok(false);
    }
    store_ids(table, key, &ids)?;
    Ok(true)
}

/// Clamp list paging parameters: default 10 rows, at most 100
pub(crate) fn clamp_page(limit: usize, offset: usize) -> (usize, usize) {
    const MAX_ROWS: usize = 100;
    const DEFAULT_ROWS: usize = 10;
    let limit = match limit {
        0 => DEFAULT_ROWS,
        l if l > MAX_ROWS => MAX_ROWS,
        l => l,
    };
    (limit, offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::setup_db;
    use crate::trust::AdminToken;

    #[test]
    fn test_token_table_roundtrip() {
        let (db, _temp) = setup_db();
        assert!(db.get_token_table().unwrap().is_none());

        let tokens = TokenTable {
            admins: vec![AdminToken {
                assignee: "ops".to_string(),
                token: "adm1n".to_string(),
            }],
            clients: vec!["c1".to_string(), "c2".to_string()],
        };
        db.put_token_table(&tokens).unwrap();
        assert_eq!(db.get_token_table().unwrap(), Some(tokens));
    }

    #[test]
    fn test_sequences_are_per_entity() {
        let (db, _temp) = setup_db();
        let txn = db.begin_write().unwrap();
        assert_eq!(next_id(&txn, "accounts").unwrap(), 1);
        assert_eq!(next_id(&txn, "accounts").unwrap(), 2);
        assert_eq!(next_id(&txn, "groups").unwrap(), 1);
        txn.commit().unwrap();
    }

    #[test]
    fn test_clamp_page() {
        assert_eq!(clamp_page(0, 0), (10, 0));
        assert_eq!(clamp_page(500, 20), (100, 20));
        assert_eq!(clamp_page(25, 5), (25, 5));
    }
}
