//! Cache-aside layer in front of key resolution and list queries.
//!
//! Entries are never invalidated individually. Every accepted mutation of
//! accounts, groups, keys, permissions or memberships flushes the whole
//! backend, and so does process start.

mod memory;
mod redis;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{CacheBackendKind, CacheConfig};

pub use self::memory::MemoryCache;
pub use self::redis::RedisCache;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("Cache payload error: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("Cache misconfigured: {0}")]
    Config(String),
}

/// Storage behind the cache layer
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
    /// Counter bumped by every `flush_all`; entries live under it
    async fn generation(&self) -> Result<u64, CacheError>;
    async fn flush_all(&self) -> Result<(), CacheError>;
}

/// A computed or cached value and where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub from_cache: bool,
    pub value: T,
}

#[derive(Clone)]
pub struct CacheLayer {
    backend: Option<Arc<dyn CacheBackend>>,
    ttl: Duration,
}

impl CacheLayer {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self {
            backend: Some(backend),
            ttl,
        }
    }

    /// No backend: every lookup computes
    pub fn disabled() -> Self {
        Self {
            backend: None,
            ttl: Duration::ZERO,
        }
    }

    pub async fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        let backend: Arc<dyn CacheBackend> = match config.backend {
            CacheBackendKind::Disabled => return Ok(Self::disabled()),
            CacheBackendKind::Memory => Arc::new(MemoryCache::new(config.max_entries)),
            CacheBackendKind::Redis => {
                let uri = config
                    .uri
                    .as_deref()
                    .ok_or_else(|| CacheError::Config("CACHE_URI is required".to_string()))?;
                Arc::new(RedisCache::connect(uri).await?)
            }
        };
        Ok(Self::new(backend, config.ttl()))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.as_ref().map_or("none", |b| b.name())
    }

    /// Return the cached value for `key`, or run `compute` and store its result.
    ///
    /// Backend failures degrade to computing; only `compute` errors propagate.
    pub async fn get_or_compute<T, E, F, Fut>(&self, key: &str, compute: F) -> Result<Cached<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(backend) = &self.backend else {
            let value = compute().await?;
            return Ok(Cached {
                from_cache: false,
                value,
            });
        };

        // Keys carry the flush generation read before computing, so a result
        // computed across a flush is written where no later lookup reads.
        let generation = match backend.generation().await {
            Ok(generation) => generation,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache generation read failed");
                let value = compute().await?;
                return Ok(Cached {
                    from_cache: false,
                    value,
                });
            }
        };
        let entry_key = format!("{generation}:{key}");

        match backend.get(&entry_key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    debug!(key = %key, "Cache hit");
                    return Ok(Cached {
                        from_cache: true,
                        value,
                    });
                }
                Err(e) => warn!(key = %key, error = %e, "Discarding undecodable cache entry"),
            },
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "Cache read failed"),
        }

        let value = compute().await?;
        match serde_json::to_string(&value) {
            Ok(raw) => {
                if let Err(e) = backend.set(&entry_key, raw, self.ttl).await {
                    warn!(key = %key, error = %e, "Cache write failed");
                }
            }
            Err(e) => warn!(key = %key, error = %e, "Cache payload encode failed"),
        }

        Ok(Cached {
            from_cache: false,
            value,
        })
    }

    /// Drop every entry. Failures are logged, never returned.
    pub async fn flush(&self) {
        if let Some(backend) = &self.backend {
            match backend.flush_all().await {
                Ok(()) => debug!(backend = backend.name(), "Cache flushed"),
                Err(e) => warn!(backend = backend.name(), error = %e, "Cache flush failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingBackend;

    #[async_trait]
    impl CacheBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Config("down".to_string()))
        }
        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Config("down".to_string()))
        }
        async fn generation(&self) -> Result<u64, CacheError> {
            Err(CacheError::Config("down".to_string()))
        }
        async fn flush_all(&self) -> Result<(), CacheError> {
            Err(CacheError::Config("down".to_string()))
        }
    }

    fn memory_layer() -> CacheLayer {
        CacheLayer::new(Arc::new(MemoryCache::new(100)), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let cache = memory_layer();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let compute = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, std::convert::Infallible>(vec!["a".to_string(), "b".to_string()])
        };

        let first = cache.get_or_compute("keys|alice|host1", compute).await.unwrap();
        let second = cache.get_or_compute("keys|alice|host1", compute).await.unwrap();

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.value, second.value);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_flush_forces_recompute() {
        let cache = memory_layer();
        let compute = || async { Ok::<_, std::convert::Infallible>(1u32) };

        cache.get_or_compute("k", compute).await.unwrap();
        assert!(cache.get_or_compute("k", compute).await.unwrap().from_cache);

        cache.flush().await;
        assert!(!cache.get_or_compute("k", compute).await.unwrap().from_cache);
        assert!(cache.get_or_compute("k", compute).await.unwrap().from_cache);
    }

    #[tokio::test]
    async fn test_flush_during_compute_discards_result() {
        let cache = memory_layer();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let slow = cache.clone();
        let pending = tokio::spawn(async move {
            slow.get_or_compute("keys", move || async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
                Ok::<_, std::convert::Infallible>("old-key".to_string())
            })
            .await
        });

        started_rx.await.unwrap();
        cache.flush().await;
        release_tx.send(()).unwrap();
        let stale = pending.await.unwrap().unwrap();
        assert_eq!(stale.value, "old-key");

        let fresh = cache
            .get_or_compute("keys", || async {
                Ok::<_, std::convert::Infallible>("new-key".to_string())
            })
            .await
            .unwrap();
        assert!(!fresh.from_cache);
        assert_eq!(fresh.value, "new-key");
    }

    #[tokio::test]
    async fn test_disabled_always_computes() {
        let cache = CacheLayer::disabled();
        assert_eq!(cache.backend_name(), "none");
        for _ in 0..2 {
            let result = cache
                .get_or_compute("k", || async { Ok::<_, std::convert::Infallible>(7u8) })
                .await
                .unwrap();
            assert!(!result.from_cache);
            assert_eq!(result.value, 7);
        }
        cache.flush().await;
    }

    #[tokio::test]
    async fn test_backend_failure_degrades_to_compute() {
        let cache = CacheLayer::new(Arc::new(FailingBackend), Duration::from_secs(60));
        let result = cache
            .get_or_compute("k", || async { Ok::<_, std::convert::Infallible>("v".to_string()) })
            .await
            .unwrap();
        assert!(!result.from_cache);
        assert_eq!(result.value, "v");
        cache.flush().await;
    }

    #[tokio::test]
    async fn test_compute_error_propagates_and_is_not_cached() {
        let cache = memory_layer();
        let err = cache
            .get_or_compute("k", || async { Err::<u8, _>("storage down") })
            .await
            .unwrap_err();
        assert_eq!(err, "storage down");

        let ok = cache
            .get_or_compute("k", || async { Ok::<_, &str>(3u8) })
            .await
            .unwrap();
        assert!(!ok.from_cache);
    }
}
