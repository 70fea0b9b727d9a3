//! Per-connection LRU of prepared statement handles.
//!
//! Keys are the final (`$n`-numbered) SQL text. Each connection link owns its
//! own cache, so the same text prepared on master and slave yields two handles.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

#[derive(Debug)]
pub(crate) struct StatementCache<S> {
    inner: Mutex<StatementCacheInner<S>>,
}

#[derive(Debug)]
struct StatementCacheInner<S> {
    capacity: usize,
    map: HashMap<String, S>,
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

impl<S: Clone> StatementCache<S> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(StatementCacheInner {
                capacity,
                map: HashMap::new(),
                order: VecDeque::new(),
                hits: 0,
                misses: 0,
            }),
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<S> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match inner.map.get(key).cloned() {
            Some(stmt) => {
                inner.hits += 1;
                inner.touch(key);
                Some(stmt)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert unless another caller won the race; returns the handle to use.
    pub(crate) fn insert_if_absent(&self, key: String, stmt: S) -> S {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = inner.map.get(&key).cloned() {
            inner.touch(&key);
            return existing;
        }
        inner.map.insert(key.clone(), stmt.clone());
        inner.order.push_back(key);
        inner.evict_if_needed();
        stmt
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).map.len()
    }

    /// `(hits, misses)` since creation.
    pub(crate) fn stats(&self) -> (u64, u64) {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        (inner.hits, inner.misses)
    }

    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.map.clear();
        inner.order.clear();
    }
}

impl<S> StatementCacheInner<S> {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }

    fn evict_if_needed(&mut self) {
        while self.map.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.map.remove(&oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let cache = StatementCache::new(2);
        cache.insert_if_absent("a".into(), 1);
        cache.insert_if_absent("b".into(), 2);
        assert_eq!(cache.get("a"), Some(1));
        cache.insert_if_absent("c".into(), 3);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn keeps_first_inserted_handle() {
        let cache = StatementCache::new(4);
        assert_eq!(cache.insert_if_absent("q".into(), 1), 1);
        assert_eq!(cache.insert_if_absent("q".into(), 2), 1);
        assert_eq!(cache.stats(), (0, 0));
        cache.get("q");
        cache.get("nope");
        assert_eq!(cache.stats(), (1, 1));
    }
}
