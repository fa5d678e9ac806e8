use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

/// How long a cached credential may be served before it is looked up again.
pub const TOKEN_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Process-local cache with a fixed time-to-live per entry.
///
/// Entries are never shared between instances, so a deployment running more
/// than one process can observe a value up to `ttl` old after another process
/// changed it.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, (V, Instant)>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some((value, expires_at)) if Instant::now() < *expires_at => Some(value.clone()),
            _ => None,
        }
    }

    pub async fn put(&self, key: K, value: V) {
        let expires_at = Instant::now() + self.ttl;
        let mut entries = self.entries.write().await;
        entries.retain(|_, (_, at)| Instant::now() < *at);
        entries.insert(key, (value, expires_at));
    }

    pub async fn invalidate(&self, key: &K) {
        self.entries.write().await.remove(key);
    }
}
