//! C2: token validator in front of the token store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::store::{StoreError, Token, TokenStore};
use crate::usage::aggregator::UsageAggregator;

use super::lru::TtlLru;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidateError {
	#[error("token not found")]
	NotFound,
	#[error("token inactive")]
	Inactive,
	#[error("token expired")]
	Expired,
	#[error("token rate limit exceeded")]
	RateLimit,
	#[error("transient backend error: {0}")]
	Transient(String),
}

pub struct TokenCache {
	store: Arc<dyn TokenStore>,
	cache: TtlLru<String, Token>,
	usage: Arc<UsageAggregator>,
}

impl TokenCache {
	pub fn new(store: Arc<dyn TokenStore>, usage: Arc<UsageAggregator>, capacity: usize, ttl: Duration) -> Self {
		TokenCache {
			store,
			cache: TtlLru::new(capacity, ttl),
			usage,
		}
	}

	/// Resolves a bearer token to its project id, enforcing per-token rate
	/// limiting and fire-and-forget usage recording. Negative and transient
	/// outcomes are never cached.
	pub async fn validate(&self, token_str: &str) -> Result<Uuid, ValidateError> {
		let token = match self.cache.get(&token_str.to_string()) {
			Some(t) => t,
			None => {
				let fetched = self.store.get_by_token(token_str).await.map_err(|e| match e {
					StoreError::NotFound => ValidateError::NotFound,
					StoreError::Transient(msg) => ValidateError::Transient(msg),
					StoreError::UniqueConflict(msg) => ValidateError::Transient(msg),
				})?;
				self.cache.insert(token_str.to_string(), fetched.clone());
				fetched
			}
		};

		if !token.is_active {
			return Err(ValidateError::Inactive);
		}
		if token.is_expired(Utc::now()) {
			return Err(ValidateError::Expired);
		}
		if token.is_exhausted() {
			return Err(ValidateError::RateLimit);
		}

		self.usage.record(token_str.to_string());
		Ok(token.project_id)
	}

	pub fn invalidate(&self, token_str: &str) {
		self.cache.invalidate(&token_str.to_string());
	}

	/// Per-spec fallback when no per-project index of cached tokens is
	/// maintained: flush the whole cache on project-level revocation.
	pub fn invalidate_all(&self) {
		self.cache.clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::embedded::EmbeddedStore;
	use crate::store::{Project, ProjectStore};

	fn aggregator() -> Arc<UsageAggregator> {
		Arc::new(UsageAggregator::new_detached())
	}

	#[tokio::test]
	async fn unknown_token_is_not_found() {
		let store = Arc::new(EmbeddedStore::in_memory());
        let cache = TokenCache::new(store, aggregator(), 16, Duration::from_secs(60));
		let err = cache.validate("sk-missing").await.unwrap_err();
		assert!(matches!(err, ValidateError::NotFound));
	}

	#[tokio::test]
	async fn exhausted_token_is_rate_limited() {
		let store = Arc::new(EmbeddedStore::in_memory());
		let project = Project::new("acme".into(), "key".into());
		ProjectStore::create(store.as_ref(), project.clone()).await.unwrap();
		let mut token = crate::store::model::Token::new(project.id, None, Some(1));
		token.request_count = 1;
		TokenStore::create(store.as_ref(), token.clone()).await.unwrap();

		let cache = TokenCache::new(store, aggregator(), 16, Duration::from_secs(60));
		let err = cache.validate(&token.token).await.unwrap_err();
		assert!(matches!(err, ValidateError::RateLimit));
	}

	#[tokio::test]
	async fn valid_token_resolves_to_project_and_is_cached() {
		let store = Arc::new(EmbeddedStore::in_memory());
		let project = Project::new("acme".into(), "key".into());
		ProjectStore::create(store.as_ref(), project.clone()).await.unwrap();
		let token = crate::store::model::Token::new(project.id, None, None);
		TokenStore::create(store.as_ref(), token.clone()).await.unwrap();

		let cache = TokenCache::new(store, aggregator(), 16, Duration::from_secs(60));
		let resolved = cache.validate(&token.token).await.unwrap();
		assert_eq!(resolved, project.id);
		assert_eq!(cache.cache.len(), 1);
	}
}
