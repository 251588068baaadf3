//! # Render Caches
//!
//! Process-local memoization for the three expensive steps of issuance:
//! remote image fetching, QR generation, and full PDF rendering.
//!
//! All three caches share [`TtlStore`]: a mutex-guarded map of
//! timestamped entries with TTL expiry on read, oldest-first batch
//! eviction on overflow, and hit/miss counters. Caches are constructed
//! explicitly and injected into the orchestrator; there is no global
//! state, so tests get isolated instances for free.
//!
//! Caches are strictly best-effort and never the system of record. Every
//! failure path (including a poisoned lock) degrades to a miss, and a
//! miss always falls through to a fresh computation. Under multi-instance
//! deployment there is no cross-process coherency; a cold instance just
//! redoes work, it never serves wrong output.

pub mod image;
pub mod pdf;
pub mod qr;

pub use image::{FetchedImage, HttpImageFetcher, ImageCache, ImageFetcher};
pub use pdf::PdfCache;
pub use qr::{QrCache, QrEcLevel, QrOptions};

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Hit/miss counters for observability.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

struct Entry<V> {
    value: V,
    created_at: Instant,
}

/// A mutex-guarded TTL map with bounded size.
///
/// `evict_batch` controls overflow behavior: 1 gives plain oldest-first
/// eviction; larger values drop the oldest N entries at once to amortize
/// cleanup cost across many inserts.
pub struct TtlStore<K, V> {
    inner: Mutex<HashMap<K, Entry<V>>>,
    ttl: Duration,
    max_entries: usize,
    evict_batch: usize,
    stats: CacheStats,
}

impl<K: Eq + Hash + Clone + Ord, V: Clone> TtlStore<K, V> {
    pub fn new(ttl: Duration, max_entries: usize, evict_batch: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            ttl,
            max_entries,
            evict_batch: evict_batch.max(1),
            stats: CacheStats::default(),
        }
    }

    /// Batch size for the oldest-10% eviction policy.
    pub fn tenth_of(max_entries: usize) -> usize {
        (max_entries / 10).max(1)
    }

    /// A poisoned lock means a panic mid-mutation somewhere else; the map
    /// contents are still structurally sound (no partially-written entry
    /// is observable through the lock), so recover and carry on. Losing
    /// cache state is always acceptable here.
    fn lock(&self) -> MutexGuard<'_, HashMap<K, Entry<V>>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Look up a key, counting a hit or miss. Expired entries are removed
    /// and count as misses.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut map = self.lock();
        match map.get(key) {
            Some(entry) if entry.created_at.elapsed() <= self.ttl => {
                self.stats.hit();
                Some(entry.value.clone())
            }
            Some(_) => {
                map.remove(key);
                self.stats.miss();
                None
            }
            None => {
                self.stats.miss();
                None
            }
        }
    }

    /// Insert a value, evicting the oldest entries if the store would
    /// exceed its bound.
    pub fn insert(&self, key: K, value: V) {
        let mut map = self.lock();
        map.insert(
            key,
            Entry {
                value,
                created_at: Instant::now(),
            },
        );

        if map.len() > self.max_entries {
            let overflow = map.len() - self.max_entries;
            let n = overflow.max(self.evict_batch);
            Self::evict_oldest(&mut map, n);
        }
    }

    fn evict_oldest(map: &mut HashMap<K, Entry<V>>, n: usize) {
        let mut by_age: Vec<(K, Instant)> = map
            .iter()
            .map(|(k, e)| (k.clone(), e.created_at))
            .collect();
        // Age first; key as tiebreaker so eviction is deterministic.
        by_age.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        for (key, _) in by_age.into_iter().take(n) {
            map.remove(&key);
        }
    }

    pub fn remove(&self, key: &K) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Remove every entry whose key matches the predicate. Returns the
    /// number removed.
    pub fn remove_matching(&self, mut pred: impl FnMut(&K) -> bool) -> usize {
        let mut map = self.lock();
        let before = map.len();
        map.retain(|k, _| !pred(k));
        before - map.len()
    }

    /// Remove every entry older than `age`. Returns the number removed.
    pub fn remove_older_than(&self, age: Duration) -> usize {
        let mut map = self.lock();
        let before = map.len();
        map.retain(|_, e| e.created_at.elapsed() <= age);
        before - map.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(max: usize, batch: usize) -> TtlStore<String, u32> {
        TtlStore::new(Duration::from_secs(3600), max, batch)
    }

    #[test]
    fn test_get_miss_then_hit() {
        let s = store(10, 1);
        assert_eq!(s.get(&"a".to_string()), None);
        s.insert("a".to_string(), 1);
        assert_eq!(s.get(&"a".to_string()), Some(1));
        assert_eq!(s.stats().hits(), 1);
        assert_eq!(s.stats().misses(), 1);
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let s: TtlStore<String, u32> = TtlStore::new(Duration::ZERO, 10, 1);
        s.insert("a".to_string(), 1);
        // Anything but an instant-zero clock has elapsed() > ZERO by now.
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(s.get(&"a".to_string()), None);
        assert_eq!(s.len(), 0, "expired entry is removed on read");
    }

    #[test]
    fn test_eviction_bound_single() {
        let s = store(5, 1);
        for i in 0..20 {
            s.insert(format!("k{i}"), i);
            assert!(s.len() <= 5, "len {} exceeded bound after insert {i}", s.len());
        }
    }

    #[test]
    fn test_eviction_bound_batch() {
        let s = store(10, 3);
        for i in 0..50 {
            s.insert(format!("k{i:02}"), i);
            assert!(s.len() <= 10);
        }
    }

    #[test]
    fn test_eviction_removes_oldest() {
        let s = store(3, 1);
        s.insert("old".to_string(), 0);
        std::thread::sleep(Duration::from_millis(2));
        s.insert("mid".to_string(), 1);
        std::thread::sleep(Duration::from_millis(2));
        s.insert("new".to_string(), 2);
        std::thread::sleep(Duration::from_millis(2));
        s.insert("newest".to_string(), 3);
        assert_eq!(s.get(&"old".to_string()), None, "oldest entry evicted");
        assert_eq!(s.get(&"newest".to_string()), Some(3));
    }

    #[test]
    fn test_remove_matching() {
        let s = store(10, 1);
        s.insert("tpl1:a".to_string(), 1);
        s.insert("tpl1:b".to_string(), 2);
        s.insert("tpl2:a".to_string(), 3);
        let removed = s.remove_matching(|k| k.starts_with("tpl1:"));
        assert_eq!(removed, 2);
        assert_eq!(s.len(), 1);
        assert_eq!(s.get(&"tpl2:a".to_string()), Some(3));
    }

    #[test]
    fn test_remove_older_than() {
        let s = store(10, 1);
        s.insert("old".to_string(), 1);
        std::thread::sleep(Duration::from_millis(5));
        s.insert("new".to_string(), 2);
        let removed = s.remove_older_than(Duration::from_millis(3));
        assert_eq!(removed, 1);
        assert_eq!(s.get(&"new".to_string()), Some(2));
    }

    #[test]
    fn test_tenth_of() {
        assert_eq!(TtlStore::<String, u32>::tenth_of(200), 20);
        assert_eq!(TtlStore::<String, u32>::tenth_of(5), 1);
    }

    #[test]
    fn test_concurrent_inserts_stay_bounded() {
        use std::sync::Arc;
        let s = Arc::new(store(50, 5));
        let mut handles = Vec::new();
        for t in 0..4 {
            let s = Arc::clone(&s);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    s.insert(format!("t{t}-{i}"), i);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(s.len() <= 50);
    }
}
