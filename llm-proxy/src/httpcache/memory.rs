//! Bounded in-memory backend with lazy expiry on read.

use async_trait::async_trait;
use chrono::Utc;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

use super::{Cache, CacheEntry};

pub struct MemoryCache {
	inner: Mutex<LruCache<String, CacheEntry>>,
}

impl MemoryCache {
	pub fn new(max_entries: usize) -> Self {
		let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::new(1).unwrap());
		MemoryCache {
			inner: Mutex::new(LruCache::new(capacity)),
		}
	}
}

#[async_trait]
impl Cache for MemoryCache {
	async fn get(&self, key: &str) -> anyhow::Result<Option<CacheEntry>> {
		let mut guard = self.inner.lock();
		let entry = guard.get(key).cloned();
		match entry {
			Some(e) if e.is_live(Utc::now()) => Ok(Some(e)),
			Some(_) => {
				guard.pop(key);
				Ok(None)
			}
			None => Ok(None),
		}
	}

	async fn set(&self, entry: CacheEntry) -> anyhow::Result<()> {
		self.inner.lock().put(entry.key.clone(), entry);
		Ok(())
	}

	async fn purge(&self, key: &str) -> anyhow::Result<bool> {
		Ok(self.inner.lock().pop(key).is_some())
	}

	async fn purge_prefix(&self, prefix: &str) -> anyhow::Result<usize> {
		let mut guard = self.inner.lock();
		let matching: Vec<String> = guard.iter().filter(|(k, _)| k.starts_with(prefix)).map(|(k, _)| k.clone()).collect();
		for key in &matching {
			guard.pop(key);
		}
		Ok(matching.len())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	fn entry(key: &str, ttl: chrono::Duration) -> CacheEntry {
		CacheEntry {
			key: key.to_string(),
			status: 200,
			headers: vec![],
			body: b"ok".to_vec(),
			expires_at: Utc::now() + ttl,
			vary: String::new(),
		}
	}

	#[tokio::test]
	async fn expired_entries_miss_on_read() {
		let cache = MemoryCache::new(8);
		cache.set(entry("a", chrono::Duration::milliseconds(10))).await.unwrap();
		tokio::time::sleep(Duration::from_millis(30)).await;
		assert!(cache.get("a").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn purge_prefix_removes_matching_keys() {
		let cache = MemoryCache::new(8);
		cache.set(entry("proj/a", chrono::Duration::seconds(60))).await.unwrap();
		cache.set(entry("proj/b", chrono::Duration::seconds(60))).await.unwrap();
		cache.set(entry("other", chrono::Duration::seconds(60))).await.unwrap();
		let count = cache.purge_prefix("proj/").await.unwrap();
		assert_eq!(count, 2);
		assert!(cache.get("other").await.unwrap().is_some());
	}
}
