use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

/// 缓存后端抽象：统一 `get` / `insert` 接口，支持插拔式实现。
#[async_trait]
pub trait CacheBackend: Send + Sync + 'static {
    type Key: Eq + Hash + Clone + Send + Sync + 'static;
    type Value: Send + Sync + 'static;

    async fn get(&self, key: &Self::Key) -> Option<Arc<Self::Value>>;

    async fn insert(&self, key: Self::Key, value: Arc<Self::Value>, ttl: Option<Duration>);

    /// 清理所有已过期条目，返回清理数量。
    async fn purge_expired(&self) -> usize;

    async fn len(&self) -> usize;
}

/// 过期策略：条目写入后 `ttl` 内有效，超过即视为不存在。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    ttl: Duration,
}

impl TtlPolicy {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// 高层缓存封装。并发回源同一个 key 时不加锁，后写入者覆盖先写入者：
/// 更新的报价总能替换旧报价，正确性只依赖过期判定。
pub struct Cache<B>
where
    B: CacheBackend,
{
    backend: B,
    policy: TtlPolicy,
}

impl<B> Cache<B>
where
    B: CacheBackend,
{
    pub fn new(backend: B, policy: TtlPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn policy(&self) -> TtlPolicy {
        self.policy
    }

    pub async fn get(&self, key: &B::Key) -> Option<Arc<B::Value>> {
        self.backend.get(key).await
    }

    pub async fn insert(&self, key: B::Key, value: B::Value) {
        self.backend
            .insert(key, Arc::new(value), Some(self.policy.ttl()))
            .await;
    }

    pub async fn load_or_fetch<F, Fut, E>(
        &self,
        key: B::Key,
        fetcher: F,
    ) -> Result<CacheLookup<B::Value>, E>
    where
        F: FnOnce(&B::Key) -> Fut + Send,
        Fut: std::future::Future<Output = Result<B::Value, E>> + Send,
    {
        if let Some(hit) = self.backend.get(&key).await {
            return Ok(CacheLookup::Hit(hit));
        }

        let value = Arc::new(fetcher(&key).await?);
        self.backend
            .insert(key, value.clone(), Some(self.policy.ttl()))
            .await;
        Ok(CacheLookup::Fetched(value))
    }

    pub async fn purge_expired(&self) -> usize {
        self.backend.purge_expired().await
    }

    pub async fn len(&self) -> usize {
        self.backend.len().await
    }
}

/// `load_or_fetch` 的结果，区分命中与回源。
#[derive(Debug, Clone)]
pub enum CacheLookup<V> {
    Hit(Arc<V>),
    Fetched(Arc<V>),
}

impl<V> CacheLookup<V> {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }

    pub fn into_value(self) -> Arc<V> {
        match self {
            CacheLookup::Hit(value) | CacheLookup::Fetched(value) => value,
        }
    }
}

/// 默认内存后端，基于 DashMap + Arc 实现，支持 TTL。
#[derive(Clone)]
pub struct InMemoryBackend<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    entries: DashMap<K, Entry<V>>,
}

impl<K, V> Default for InMemoryBackend<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

#[derive(Clone)]
struct Entry<V> {
    value: Arc<V>,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn new(value: Arc<V>, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|dur| Instant::now() + dur),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

#[async_trait]
impl<K, V> CacheBackend for InMemoryBackend<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    type Key = K;
    type Value = V;

    async fn get(&self, key: &Self::Key) -> Option<Arc<Self::Value>> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired(Instant::now()) {
                drop(entry);
                self.entries.remove(key);
                return None;
            }
            return Some(entry.value.clone());
        }
        None
    }

    async fn insert(&self, key: Self::Key, value: Arc<Self::Value>, ttl: Option<Duration>) {
        self.entries.insert(key, Entry::new(value, ttl));
    }

    async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    async fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(ttl_secs: u64) -> Cache<InMemoryBackend<String, u32>> {
        Cache::new(
            InMemoryBackend::default(),
            TtlPolicy::new(Duration::from_secs(ttl_secs)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = cache(300);
        cache.insert("a".to_string(), 1).await;
        assert_eq!(cache.get(&"a".to_string()).await.as_deref(), Some(&1));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cache.get(&"a".to_string()).await.is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(&"a".to_string()).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn load_or_fetch_refetches_stale_entries() {
        let cache = cache(60);
        let first = cache
            .load_or_fetch("k".to_string(), |_| async { Ok::<_, ()>(1) })
            .await
            .unwrap();
        assert!(!first.is_hit());

        let second = cache
            .load_or_fetch("k".to_string(), |_| async { Ok::<_, ()>(2) })
            .await
            .unwrap();
        assert!(second.is_hit());
        assert_eq!(*second.into_value(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        let third = cache
            .load_or_fetch("k".to_string(), |_| async { Ok::<_, ()>(3) })
            .await
            .unwrap();
        assert!(!third.is_hit());
        assert_eq!(*third.into_value(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired() {
        let cache = cache(10);
        cache.insert("old".to_string(), 1).await;
        tokio::time::advance(Duration::from_secs(11)).await;
        cache.insert("new".to_string(), 2).await;

        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 1);
    }
}
