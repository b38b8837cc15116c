use crate::{StoreError, StoreResult};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::sync::Mutex;

/// Batching key-value store the reference index and the inline block store
/// persist into. Keys are `/`-separated strings; values are opaque bytes.
///
/// `delete` reports a typed not-found for an absent key. `put_many` commits
/// atomically relative to the implementation's batch semantics. `query_keys`
/// is a keys-only snapshot scan in the store's native order.
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Vec<u8>>;
    async fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<()>;
    async fn has(&self, key: &str) -> StoreResult<bool>;
    async fn delete(&self, key: &str) -> StoreResult<()>;
    async fn put_many(&self, entries: Vec<(String, Vec<u8>)>) -> StoreResult<()>;
    async fn query_keys(&self, prefix: &str) -> StoreResult<Vec<String>>;

    async fn get_size(&self, key: &str) -> StoreResult<u64> {
        Ok(self.get(key).await?.len() as u64)
    }
}

/// In-memory datastore for composition and tests.
#[derive(Default)]
pub struct MemDatastore {
    map: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemDatastore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Datastore for MemDatastore {
    async fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        let map = self.map.lock().unwrap();
        map.get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("key not found: {}", key)))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        let mut map = self.map.lock().unwrap();
        map.insert(key.to_string(), value);
        Ok(())
    }

    async fn has(&self, key: &str) -> StoreResult<bool> {
        let map = self.map.lock().unwrap();
        Ok(map.contains_key(key))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut map = self.map.lock().unwrap();
        map.remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("key not found: {}", key)))
    }

    async fn put_many(&self, entries: Vec<(String, Vec<u8>)>) -> StoreResult<()> {
        let mut map = self.map.lock().unwrap();
        for (key, value) in entries {
            map.insert(key, value);
        }
        Ok(())
    }

    async fn query_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let map = self.map.lock().unwrap();
        Ok(map
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Durable datastore over a single sqlite table.
pub struct SqliteDatastore {
    pub db_path: String,
    conn: Mutex<Connection>,
}

impl SqliteDatastore {
    pub fn new(db_path: &str) -> StoreResult<Self> {
        debug!("SqliteDatastore: open db path: {}", db_path);
        let conn = Connection::open(db_path).map_err(|e| {
            warn!("SqliteDatastore: open db failed! {}", e);
            StoreError::DbError(e.to_string())
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            )",
            [],
        )
        .map_err(|e| {
            warn!("SqliteDatastore: create table kv failed! {}", e);
            StoreError::DbError(e.to_string())
        })?;

        Ok(Self {
            db_path: db_path.to_string(),
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl Datastore for SqliteDatastore {
    async fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT value FROM kv WHERE key = ?1")
            .map_err(|e| StoreError::DbError(e.to_string()))?;

        stmt.query_row(params![key], |row| row.get::<_, Vec<u8>>(0))
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("key not found: {}", key))
                }
                _ => {
                    warn!("SqliteDatastore: get failed! {}", e);
                    StoreError::DbError(e.to_string())
                }
            })
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .map_err(|e| {
            warn!("SqliteDatastore: put failed! {}", e);
            StoreError::DbError(e.to_string())
        })?;
        Ok(())
    }

    async fn has(&self, key: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT 1 FROM kv WHERE key = ?1")
            .map_err(|e| StoreError::DbError(e.to_string()))?;
        stmt.exists(params![key])
            .map_err(|e| StoreError::DbError(e.to_string()))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let affected = conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(|e| {
                warn!("SqliteDatastore: delete failed! {}", e);
                StoreError::DbError(e.to_string())
            })?;
        if affected == 0 {
            return Err(StoreError::NotFound(format!("key not found: {}", key)));
        }
        Ok(())
    }

    async fn put_many(&self, entries: Vec<(String, Vec<u8>)>) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(|e| {
            warn!("SqliteDatastore: transaction failed! {}", e);
            StoreError::DbError(e.to_string())
        })?;

        for (key, value) in &entries {
            tx.execute(
                "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(|e| {
                warn!("SqliteDatastore: batch put failed! {}", e);
                StoreError::DbError(e.to_string())
            })?;
        }

        tx.commit().map_err(|e| {
            warn!("SqliteDatastore: commit failed! {}", e);
            StoreError::DbError(e.to_string())
        })?;
        Ok(())
    }

    async fn get_size(&self, key: &str) -> StoreResult<u64> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT length(value) FROM kv WHERE key = ?1")
            .map_err(|e| StoreError::DbError(e.to_string()))?;

        stmt.query_row(params![key], |row| row.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("key not found: {}", key))
                }
                _ => StoreError::DbError(e.to_string()),
            })
    }

    async fn query_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT key FROM kv WHERE key LIKE ?1")
            .map_err(|e| StoreError::DbError(e.to_string()))?;

        let rows = stmt
            .query_map(params![format!("{}%", prefix)], |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| StoreError::DbError(e.to_string()))?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row.map_err(|e| StoreError::DbError(e.to_string()))?);
        }
        Ok(keys)
    }
}
