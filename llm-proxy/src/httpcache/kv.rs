//! Distributed cache backend: a thin adapter from [`Cache`] onto the
//! shared [`crate::kv::KvStore`] interface, namespaced under a configured
//! key prefix with server-side TTL.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::kv::KvStore;

use super::{Cache, CacheEntry};

pub struct KvCache {
	kv: Arc<dyn KvStore>,
	prefix: String,
}

impl KvCache {
	pub fn new(kv: Arc<dyn KvStore>, prefix: String) -> Self {
		KvCache { kv, prefix }
	}

	fn namespaced(&self, key: &str) -> String {
		format!("{}{}", self.prefix, key)
	}
}

#[async_trait]
impl Cache for KvCache {
	async fn get(&self, key: &str) -> anyhow::Result<Option<CacheEntry>> {
		let Some(bytes) = self.kv.get(&self.namespaced(key)).await? else {
			return Ok(None);
		};
		let entry: CacheEntry = serde_json::from_slice(&bytes)?;
		if entry.is_live(Utc::now()) {
			Ok(Some(entry))
		} else {
			self.kv.delete(&self.namespaced(key)).await?;
			Ok(None)
		}
	}

	async fn set(&self, entry: CacheEntry) -> anyhow::Result<()> {
		let ttl = (entry.expires_at - Utc::now()).to_std().unwrap_or(Duration::from_secs(0));
		let key = self.namespaced(&entry.key);
		let bytes = serde_json::to_vec(&entry)?;
		self.kv.set(&key, bytes, Some(ttl)).await
	}

	async fn purge(&self, key: &str) -> anyhow::Result<bool> {
		self.kv.delete(&self.namespaced(key)).await
	}

	async fn purge_prefix(&self, prefix: &str) -> anyhow::Result<usize> {
		let full_prefix = self.namespaced(prefix);
		let keys = self.kv.scan_prefix(&full_prefix).await?;
		for key in &keys {
			self.kv.delete(key).await?;
		}
		Ok(keys.len())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::kv::InProcessKv;

	fn entry(key: &str) -> CacheEntry {
		CacheEntry {
			key: key.to_string(),
			status: 200,
			headers: vec![],
			body: b"ok".to_vec(),
			expires_at: Utc::now() + chrono::Duration::seconds(60),
			vary: String::new(),
		}
	}

	#[tokio::test]
	async fn round_trips_through_namespaced_keys() {
		let cache = KvCache::new(Arc::new(InProcessKv::new()), "cache:".into());
		cache.set(entry("k1")).await.unwrap();
		let fetched = cache.get("k1").await.unwrap().unwrap();
		assert_eq!(fetched.body, b"ok");
	}
}
