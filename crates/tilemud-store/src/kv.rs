//! Key-value store seam.
//!
//! The core uses one shared KV store for three disjoint namespaces:
//! rate-limit windows (sorted sets), reconnect grace sessions, and
//! reconnect tokens (plain strings with TTL). The [`KvStore`] trait is the
//! read/write contract the core relies on; [`MemoryKvStore`] is the
//! in-process implementation used by default and in tests. A Redis adapter
//! implements the same trait out of tree.
//!
//! TTL semantics: expiry is authoritative at the store. An expired entry
//! behaves exactly like an absent one; no server-side timer is involved.

use std::collections::HashMap;
use std::collections::hash_map::Entry as MapEntry;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::StoreError;
use crate::clock::now_ms;

/// Shared KV contract: strings with TTL, atomic take, and score-ordered
/// sets for sliding-window counters.
pub trait KvStore: Send + Sync + 'static {
    /// Stores a string value, replacing any previous value and TTL.
    fn put(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Fetches a string value. Expired entries read as absent.
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Atomically fetches and deletes a string value. This is the
    /// single-use primitive reconnect tokens depend on.
    fn take(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Deletes a key of any kind. Returns whether it existed.
    fn delete(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Lists live keys beginning with `prefix`.
    fn keys_with_prefix(
        &self,
        prefix: &str,
    ) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Adds a member with a score to a sorted set, refreshing the set's
    /// TTL.
    fn sorted_add(
        &self,
        key: &str,
        member: String,
        score: u64,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Removes members with score strictly below `below`. Returns the
    /// number removed.
    fn sorted_remove_below(
        &self,
        key: &str,
        below: u64,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Counts members in a sorted set.
    fn sorted_count(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// The smallest score present in a sorted set.
    fn sorted_min_score(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<u64>, StoreError>> + Send;
}

enum Stored {
    Text {
        value: String,
        expires_at: Option<u64>,
    },
    Sorted {
        /// `(score, member)` pairs, unordered; operations scan.
        members: Vec<(u64, String)>,
        expires_at: Option<u64>,
    },
}

impl Stored {
    fn expired(&self, now: u64) -> bool {
        let expires_at = match self {
            Stored::Text { expires_at, .. } => expires_at,
            Stored::Sorted { expires_at, .. } => expires_at,
        };
        expires_at.is_some_and(|at| now >= at)
    }
}

/// In-process [`KvStore`] backed by a mutex-guarded map.
///
/// Expiry is evaluated lazily on access, so no background sweeper exists;
/// a key read after its deadline is removed and reported absent.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Stored>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn deadline(ttl: Option<Duration>) -> Option<u64> {
        ttl.map(|t| now_ms() + t.as_millis() as u64)
    }

    /// Drops `key` if its entry has lapsed. Call with the lock held,
    /// before reading.
    fn evict_expired(
        entries: &mut HashMap<String, Stored>,
        key: &str,
        now: u64,
    ) {
        if entries.get(key).is_some_and(|e| e.expired(now)) {
            entries.remove(key);
        }
    }
}

impl KvStore for MemoryKvStore {
    async fn put(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Stored::Text {
                value,
                expires_at: Self::deadline(ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock().await;
        Self::evict_expired(&mut entries, key, now_ms());
        Ok(match entries.get(key) {
            Some(Stored::Text { value, .. }) => Some(value.clone()),
            _ => None,
        })
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock().await;
        let now = now_ms();
        Ok(match entries.remove(key) {
            Some(entry) if entry.expired(now) => None,
            Some(Stored::Text { value, .. }) => Some(value),
            _ => None,
        })
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        Ok(entries.remove(key).is_some())
    }

    async fn keys_with_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<String>, StoreError> {
        let mut entries = self.entries.lock().await;
        let now = now_ms();
        entries.retain(|_, entry| !entry.expired(now));
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn sorted_add(
        &self,
        key: &str,
        member: String,
        score: u64,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        let now = now_ms();
        Self::evict_expired(&mut entries, key, now);
        let expires_at = Some(now + ttl.as_millis() as u64);
        match entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                if let Stored::Sorted {
                    members,
                    expires_at: deadline,
                } = occupied.get_mut()
                {
                    members.push((score, member));
                    *deadline = expires_at;
                } else {
                    // Type clash: a text key reused as a set. Overwrite,
                    // matching Redis DEL-then-ZADD recovery behavior.
                    occupied.insert(Stored::Sorted {
                        members: vec![(score, member)],
                        expires_at,
                    });
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Stored::Sorted {
                    members: vec![(score, member)],
                    expires_at,
                });
            }
        }
        Ok(())
    }

    async fn sorted_remove_below(
        &self,
        key: &str,
        below: u64,
    ) -> Result<u64, StoreError> {
        let mut entries = self.entries.lock().await;
        Self::evict_expired(&mut entries, key, now_ms());
        Ok(match entries.get_mut(key) {
            Some(Stored::Sorted { members, .. }) => {
                let before = members.len();
                members.retain(|(score, _)| *score >= below);
                (before - members.len()) as u64
            }
            _ => 0,
        })
    }

    async fn sorted_count(&self, key: &str) -> Result<u64, StoreError> {
        let mut entries = self.entries.lock().await;
        Self::evict_expired(&mut entries, key, now_ms());
        Ok(match entries.get(key) {
            Some(Stored::Sorted { members, .. }) => members.len() as u64,
            _ => 0,
        })
    }

    async fn sorted_min_score(
        &self,
        key: &str,
    ) -> Result<Option<u64>, StoreError> {
        let mut entries = self.entries.lock().await;
        Self::evict_expired(&mut entries, key, now_ms());
        Ok(match entries.get(key) {
            Some(Stored::Sorted { members, .. }) => {
                members.iter().map(|(score, _)| *score).min()
            }
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let kv = MemoryKvStore::new();
        kv.put("k", "v".into(), None).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let kv = MemoryKvStore::new();
        assert_eq!(kv.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_zero_ttl_expires_immediately() {
        let kv = MemoryKvStore::new();
        kv.put("k", "v".into(), Some(Duration::ZERO)).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_take_is_single_use() {
        let kv = MemoryKvStore::new();
        kv.put("k", "v".into(), None).await.unwrap();
        assert_eq!(kv.take("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(kv.take("k").await.unwrap(), None);
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_take_expired_returns_none() {
        let kv = MemoryKvStore::new();
        kv.put("k", "v".into(), Some(Duration::ZERO)).await.unwrap();
        assert_eq!(kv.take("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let kv = MemoryKvStore::new();
        kv.put("k", "v".into(), None).await.unwrap();
        assert!(kv.delete("k").await.unwrap());
        assert!(!kv.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_with_prefix_filters() {
        let kv = MemoryKvStore::new();
        kv.put("a:1", "x".into(), None).await.unwrap();
        kv.put("a:2", "y".into(), None).await.unwrap();
        kv.put("b:1", "z".into(), None).await.unwrap();
        let mut keys = kv.keys_with_prefix("a:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a:1", "a:2"]);
    }

    #[tokio::test]
    async fn test_sorted_add_count_and_min() {
        let kv = MemoryKvStore::new();
        let ttl = Duration::from_secs(60);
        kv.sorted_add("s", "m1".into(), 100, ttl).await.unwrap();
        kv.sorted_add("s", "m2".into(), 50, ttl).await.unwrap();
        kv.sorted_add("s", "m3".into(), 200, ttl).await.unwrap();
        assert_eq!(kv.sorted_count("s").await.unwrap(), 3);
        assert_eq!(kv.sorted_min_score("s").await.unwrap(), Some(50));
    }

    #[tokio::test]
    async fn test_sorted_remove_below_is_exclusive() {
        let kv = MemoryKvStore::new();
        let ttl = Duration::from_secs(60);
        kv.sorted_add("s", "m1".into(), 100, ttl).await.unwrap();
        kv.sorted_add("s", "m2".into(), 150, ttl).await.unwrap();
        let removed = kv.sorted_remove_below("s", 150).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(kv.sorted_count("s").await.unwrap(), 1);
        assert_eq!(kv.sorted_min_score("s").await.unwrap(), Some(150));
    }

    #[tokio::test]
    async fn test_sorted_set_expires_as_a_whole() {
        let kv = MemoryKvStore::new();
        kv.sorted_add("s", "m1".into(), 1, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(kv.sorted_count("s").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_text_key_reused_as_set_is_overwritten() {
        let kv = MemoryKvStore::new();
        kv.put("k", "text".into(), None).await.unwrap();
        kv.sorted_add("k", "m".into(), 5, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(kv.sorted_count("k").await.unwrap(), 1);
        assert_eq!(kv.get("k").await.unwrap(), None);
    }
}
