//! Compute-once memoization for lookup results
//!
//! Entries are immutable snapshots kept for the process lifetime. Two
//! callers racing on the same missing key may both run the fetch, but
//! only the first inserted value is retained and both callers observe
//! it.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;

/// Concurrent map with first-insert-wins semantics
pub(crate) struct MemoMap<K, V> {
    entries: DashMap<K, Arc<V>>,
}

impl<K, V> MemoMap<K, V>
where
    K: Eq + Hash + Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub(crate) fn get(&self, key: &K) -> Option<Arc<V>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// The cached value for `key`, computing it with `init` on a miss.
    /// Errors are returned to the caller and nothing is cached, so the
    /// next call retries the fetch. No map lock is held across `init`.
    pub(crate) async fn get_or_try_insert_with<E, F, Fut>(
        &self,
        key: K,
        init: F,
    ) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let computed = Arc::new(init().await?);
        let entry = self.entries.entry(key).or_insert(computed);
        Ok(Arc::clone(entry.value()))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
