//! A small async key-value interface shared by every component that can
//! run in "distributed" mode: the response cache's KV backend, the event
//! bus's stream backend, and the rate limiter's distributed counters.
//!
//! This crate ships one implementation, [`InProcessKv`], which behaves
//! like a real networked KV store (TTLs, atomic increment, prefix scan)
//! but keeps state in the current process. A deployment that needs actual
//! cross-instance sharing swaps in a networked implementation of the same
//! trait; nothing above this module needs to change.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

#[async_trait]
pub trait KvStore: Send + Sync {
	async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
	async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> anyhow::Result<()>;
	async fn delete(&self, key: &str) -> anyhow::Result<bool>;
	async fn scan_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>>;
	/// Atomically increments `key` by `by`, creating it at 0 first if
	/// absent, and (re)applies `ttl` if given. Used for sliding-window
	/// rate-limit counters.
	async fn incr(&self, key: &str, by: i64, ttl: Option<Duration>) -> anyhow::Result<i64>;
}

struct Slot {
	value: Vec<u8>,
	expires_at: Option<Instant>,
}

impl Slot {
	fn is_live(&self) -> bool {
		self.expires_at.is_none_or(|e| e > Instant::now())
	}
}

#[derive(Default)]
pub struct InProcessKv {
	slots: Mutex<HashMap<String, Slot>>,
}

impl InProcessKv {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl KvStore for InProcessKv {
	async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
		let mut guard = self.slots.lock();
		match guard.get(key) {
			Some(slot) if slot.is_live() => Ok(Some(slot.value.clone())),
			Some(_) => {
				guard.remove(key);
				Ok(None)
			}
			None => Ok(None),
		}
	}

	async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> anyhow::Result<()> {
		self.slots.lock().insert(
			key.to_string(),
			Slot {
				value,
				expires_at: ttl.map(|d| Instant::now() + d),
			},
		);
		Ok(())
	}

	async fn delete(&self, key: &str) -> anyhow::Result<bool> {
		Ok(self.slots.lock().remove(key).is_some())
	}

	async fn scan_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
		let guard = self.slots.lock();
		Ok(guard
			.iter()
			.filter(|(k, slot)| k.starts_with(prefix) && slot.is_live())
			.map(|(k, _)| k.clone())
			.collect())
	}

	async fn incr(&self, key: &str, by: i64, ttl: Option<Duration>) -> anyhow::Result<i64> {
		let mut guard = self.slots.lock();
		let now_value = match guard.get(key) {
			Some(slot) if slot.is_live() => i64::from_le_bytes(slot.value.clone().try_into().unwrap_or_default()),
			_ => 0,
		};
		let updated = now_value + by;
		guard.insert(
			key.to_string(),
			Slot {
				value: updated.to_le_bytes().to_vec(),
				expires_at: ttl.map(|d| Instant::now() + d),
			},
		);
		Ok(updated)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn incr_creates_and_accumulates() {
		let kv = InProcessKv::new();
		assert_eq!(kv.incr("k", 1, None).await.unwrap(), 1);
		assert_eq!(kv.incr("k", 2, None).await.unwrap(), 3);
	}

	#[tokio::test]
	async fn expired_entries_are_invisible() {
		let kv = InProcessKv::new();
		kv.set("k", b"v".to_vec(), Some(Duration::from_millis(5))).await.unwrap();
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert_eq!(kv.get("k").await.unwrap(), None);
	}

	#[tokio::test]
	async fn scan_prefix_filters_by_key() {
		let kv = InProcessKv::new();
		kv.set("a:1", b"x".to_vec(), None).await.unwrap();
		kv.set("a:2", b"y".to_vec(), None).await.unwrap();
		kv.set("b:1", b"z".to_vec(), None).await.unwrap();
		let mut keys = kv.scan_prefix("a:").await.unwrap();
		keys.sort();
		assert_eq!(keys, vec!["a:1".to_string(), "a:2".to_string()]);
	}
}
