//! A bounded, TTL-aware LRU cache shared by the token and project caches.
//!
//! The lock is held only for the map manipulation itself; any store call
//! that runs on a miss happens outside the lock so a slow backend lookup
//! never blocks other readers from hitting already-cached entries.

use std::hash::Hash;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

struct Entry<V> {
	value: V,
	expires_at: Instant,
}

pub struct TtlLru<K: Hash + Eq, V: Clone> {
	inner: Mutex<LruCache<K, Entry<V>>>,
	ttl: Duration,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlLru<K, V> {
	pub fn new(capacity: usize, ttl: Duration) -> Self {
		let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
		TtlLru {
			inner: Mutex::new(LruCache::new(capacity)),
			ttl,
		}
	}

	/// Returns a clone of the cached value if present and not expired.
	/// An expired entry is evicted on the way out.
	pub fn get(&self, key: &K) -> Option<V> {
		let mut guard = self.inner.lock();
		let hit = guard.get(key).map(|e| (e.value.clone(), e.expires_at));
		match hit {
			Some((value, expires_at)) if expires_at > Instant::now() => Some(value),
			Some(_) => {
				guard.pop(key);
				None
			}
			None => None,
		}
	}

	pub fn insert(&self, key: K, value: V) {
		let entry = Entry {
			value,
			expires_at: Instant::now() + self.ttl,
		};
		self.inner.lock().put(key, entry);
	}

	pub fn invalidate(&self, key: &K) {
		self.inner.lock().pop(key);
	}

	pub fn clear(&self) {
		self.inner.lock().clear();
	}

	pub fn len(&self) -> usize {
		self.inner.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn expired_entries_are_not_returned() {
		let cache: TtlLru<String, u64> = TtlLru::new(4, Duration::from_millis(10));
		cache.insert("a".into(), 1);
		assert_eq!(cache.get(&"a".to_string()), Some(1));
		std::thread::sleep(Duration::from_millis(20));
		assert_eq!(cache.get(&"a".to_string()), None);
	}

	#[test]
	fn invalidate_removes_entry_immediately() {
		let cache: TtlLru<String, u64> = TtlLru::new(4, Duration::from_secs(60));
		cache.insert("a".into(), 1);
		cache.invalidate(&"a".to_string());
		assert_eq!(cache.get(&"a".to_string()), None);
	}

	#[test]
	fn evicts_least_recently_used_past_capacity() {
		let cache: TtlLru<u32, u32> = TtlLru::new(2, Duration::from_secs(60));
		cache.insert(1, 1);
		cache.insert(2, 2);
		cache.insert(3, 3);
		assert_eq!(cache.len(), 2);
		assert_eq!(cache.get(&1), None);
	}
}
