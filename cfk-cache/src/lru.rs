//! Simple in-memory LRU, same shape as the donor's
//! `metadata_cache::mod lru` (kept private — only `ttl_store` uses it).

use std::collections::HashMap;
use std::hash::Hash;

pub struct LruCache<K, V> {
    map: HashMap<K, V>,
    order: Vec<K>,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self { map: HashMap::new(), order: Vec::new(), capacity: capacity.max(1) }
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        if self.map.contains_key(key) {
            self.order.retain(|k| k != key);
            self.order.push(key.clone());
            self.map.get(key)
        } else {
            None
        }
    }

    pub fn put(&mut self, key: K, value: V) {
        if self.map.contains_key(&key) {
            self.order.retain(|k| k != &key);
        } else if self.map.len() >= self.capacity {
            if !self.order.is_empty() {
                let oldest = self.order.remove(0);
                self.map.remove(&oldest);
            }
        }
        self.map.insert(key.clone(), value);
        self.order.push(key);
    }

    pub fn pop(&mut self, key: &K) -> Option<V> {
        self.order.retain(|k| k != key);
        self.map.remove(key)
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }
}
