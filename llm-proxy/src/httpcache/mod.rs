//! C5: fingerprint-keyed response cache with Vary/ETag semantics.

pub mod capture;
pub mod key;
pub mod kv;
pub mod memory;
pub mod policy;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
	pub key: String,
	pub status: u16,
	pub headers: Vec<(String, String)>,
	pub body: Vec<u8>,
	pub expires_at: DateTime<Utc>,
	pub vary: String,
}

impl CacheEntry {
	pub fn is_live(&self, now: DateTime<Utc>) -> bool {
		now < self.expires_at
	}

	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(h, _)| h.eq_ignore_ascii_case(name))
			.map(|(_, v)| v.as_str())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStatus {
	Hit,
	ConditionalHit,
	Miss,
	Bypass,
	Stored,
	StoredForced,
}

impl CacheStatus {
	pub fn as_header_value(&self) -> &'static str {
		match self {
			CacheStatus::Hit => "hit",
			CacheStatus::ConditionalHit => "conditional-hit",
			CacheStatus::Miss => "miss",
			CacheStatus::Bypass => "bypass",
			CacheStatus::Stored => "stored",
			CacheStatus::StoredForced => "stored (forced)",
		}
	}
}

/// Backend contract shared by the in-memory and distributed KV caches.
#[async_trait]
pub trait Cache: Send + Sync {
	async fn get(&self, key: &str) -> anyhow::Result<Option<CacheEntry>>;
	async fn set(&self, entry: CacheEntry) -> anyhow::Result<()>;
	async fn purge(&self, key: &str) -> anyhow::Result<bool>;
	async fn purge_prefix(&self, prefix: &str) -> anyhow::Result<usize>;
}
