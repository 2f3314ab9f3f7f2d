use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::info;

use super::{CacheBackend, CacheError};

const KEY_PREFIX: &str = "keyhub:";
// Outside the `keyhub:*` pattern so flushes never delete it
const GENERATION_KEY: &str = "keyhub-generation";

/// Shared cache in Redis. Keys are namespaced so a flush only touches ours.
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(uri: &str) -> Result<Self, CacheError> {
        info!(uri = %uri, "Connecting to Redis cache");
        let client = Client::open(uri)?;
        // ConnectionManager reconnects on its own
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(format!("{KEY_PREFIX}{key}"))
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        let seconds = ttl.as_secs().max(1);
        let _: () = redis::cmd("SET")
            .arg(format!("{KEY_PREFIX}{key}"))
            .arg(value)
            .arg("EX")
            .arg(seconds)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn generation(&self) -> Result<u64, CacheError> {
        let mut conn = self.manager.clone();
        let value: Option<u64> = redis::cmd("GET")
            .arg(GENERATION_KEY)
            .query_async(&mut conn)
            .await?;
        Ok(value.unwrap_or(0))
    }

    async fn flush_all(&self) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        // Bump first: writers still holding the old generation miss from here on
        let _: u64 = redis::cmd("INCR")
            .arg(GENERATION_KEY)
            .query_async(&mut conn)
            .await?;

        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(format!("{KEY_PREFIX}*"))
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                let _: () = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(())
    }
}
