use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use common::art_link;
use parking_lot::RwLock;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq)]
pub struct ArtEntry {
    pub id: String,
    pub mime: String,
    pub data: Bytes,
    pub link: String,
}

/// In-memory image store shared by the scanner and the HTTP layer.
///
/// Ids are random, so the same bytes stored twice get two ids and nothing
/// survives a restart. A non-zero `max_entries` evicts the oldest entries
/// first.
#[derive(Clone, Default)]
pub struct ArtCache {
    inner: Arc<RwLock<ArtStore>>,
}

#[derive(Default)]
struct ArtStore {
    entries: HashMap<String, ArtEntry>,
    order: VecDeque<String>,
    max_entries: usize,
}

impl ArtCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        let cache = Self::default();
        cache.inner.write().max_entries = max_entries;
        cache
    }

    pub fn store(&self, mime: impl Into<String>, data: impl Into<Bytes>) -> ArtEntry {
        let id = Uuid::new_v4().simple().to_string();
        let entry = ArtEntry {
            link: art_link(&id),
            id: id.clone(),
            mime: mime.into(),
            data: data.into(),
        };

        let mut store = self.inner.write();
        store.entries.insert(id.clone(), entry.clone());
        store.order.push_back(id);
        if store.max_entries > 0 {
            while store.entries.len() > store.max_entries {
                let Some(oldest) = store.order.pop_front() else {
                    break;
                };
                store.entries.remove(&oldest);
            }
        }
        entry
    }

    pub fn fetch(&self, id: &str) -> Option<ArtEntry> {
        self.inner.read().entries.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().entries.contains_key(id)
    }

    pub fn contains_all(&self, ids: &[String]) -> bool {
        let store = self.inner.read();
        ids.iter().all(|id| store.entries.contains_key(id))
    }

    pub fn remove(&self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut store = self.inner.write();
        for id in &doomed {
            store.entries.remove(*id);
        }
        store.order.retain(|id| !doomed.contains(id.as_str()));
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry; issued links stop resolving.
    pub fn clear(&self) {
        let mut store = self.inner.write();
        store.entries.clear();
        store.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::ArtCache;

    #[test]
    fn identical_bytes_get_distinct_ids() {
        let cache = ArtCache::new();
        let first = cache.store("image/png", vec![1u8, 2, 3]);
        let second = cache.store("image/png", vec![1u8, 2, 3]);
        assert_ne!(first.id, second.id);
        assert_eq!(first.link, format!("/art/{}", first.id));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn fetch_returns_stored_entry() {
        let cache = ArtCache::new();
        let entry = cache.store("image/jpeg", vec![9u8; 4]);
        let fetched = cache.fetch(&entry.id).unwrap();
        assert_eq!(fetched.mime, "image/jpeg");
        assert_eq!(fetched.data.as_ref(), &[9u8; 4]);
        assert!(cache.fetch("missing").is_none());
    }

    #[test]
    fn remove_and_clear_drop_entries() {
        let cache = ArtCache::new();
        let a = cache.store("image/png", vec![1u8]);
        let b = cache.store("image/png", vec![2u8]);
        cache.remove(&[a.id.clone()]);
        assert!(!cache.contains(&a.id));
        assert!(cache.contains_all(&[b.id.clone()]));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn bounded_cache_evicts_oldest() {
        let cache = ArtCache::with_max_entries(2);
        let a = cache.store("image/png", vec![1u8]);
        let b = cache.store("image/png", vec![2u8]);
        let c = cache.store("image/png", vec![3u8]);
        assert!(!cache.contains(&a.id));
        assert!(cache.contains(&b.id));
        assert!(cache.contains(&c.id));
    }

    #[test]
    fn concurrent_writers_never_collide() {
        let cache = ArtCache::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| cache.store("image/png", vec![0u8]).id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut ids = std::collections::HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(ids.insert(id));
            }
        }
        assert_eq!(cache.len(), 400);
    }
}
