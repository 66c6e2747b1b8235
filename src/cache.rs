/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Bounded LRU cache with per-entry expiry.
//!
//! Used by the discovery layer to memoize serialized "latest version" and
//! "versions list" lookups. Entries are byte strings; every access (read or
//! write) promotes the entry and refreshes its timestamp. A single mutex
//! serializes all operations; the contract is thread-safe, not lock-free.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

struct Entry {
    value: Vec<u8>,
    date: Instant,
}

/// An LRU cache whose entries additionally expire `ttl` after their last
/// access.
///
/// A `max_entries` of zero means no capacity bound (eviction is the
/// caller's responsibility); a zero `ttl` means entries never expire.
pub struct Cache {
    ttl: Duration,
    inner: Mutex<LruCache<String, Entry>>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        let inner = match NonZeroUsize::new(max_entries) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Cache {
            ttl,
            inner: Mutex::new(inner),
        }
    }

    /// Insert or replace a value, marking it most recently used.
    ///
    /// When the cache is over capacity the least recently used entry is
    /// evicted.
    pub fn add(&self, key: impl Into<String>, value: Vec<u8>) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.push(
            key.into(),
            Entry {
                value,
                date: Instant::now(),
            },
        );
    }

    /// Look up a key.
    ///
    /// A hit within the TTL promotes the entry, refreshes its timestamp and
    /// returns the value. An expired entry is removed and reported as a
    /// miss.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        if let Some(entry) = inner.get_mut(key) {
            if self.ttl.is_zero() || entry.date.elapsed() <= self.ttl {
                entry.date = Instant::now();
                return Some(entry.value.clone());
            }
            inner.pop(key);
        }
        None
    }

    /// Remove a key, if present.
    pub fn remove(&self, key: &str) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.pop(key);
    }

    /// Evict the least recently used entry, if any.
    pub fn remove_oldest(&self) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.pop_lru();
    }

    /// Number of live entries, expired or not.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache mutex poisoned").len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
