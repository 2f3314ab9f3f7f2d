use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;

use super::{CacheBackend, CacheError};

#[derive(Clone)]
struct Entry {
    ttl: Duration,
    value: String,
}

/// Expire each entry after the ttl it was stored with
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process cache bounded by entry count
pub struct MemoryCache {
    entries: Cache<String, Entry>,
    generation: AtomicU64,
}

impl MemoryCache {
    pub fn new(max_entries: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(PerEntryTtl)
            .build();
        Self {
            entries,
            generation: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.get(key).await.map(|e| e.value))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), Entry { ttl, value }).await;
        Ok(())
    }

    async fn generation(&self) -> Result<u64, CacheError> {
        Ok(self.generation.load(Ordering::SeqCst))
    }

    async fn flush_all(&self) -> Result<(), CacheError> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.invalidate_all();
        Ok(())
    }
}
