use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{StoreError, Token};

/// The token half of the persisted state (C1). Implementations must treat
/// `token` as the primary key and keep `request_count` monotonic under
/// concurrent `increment_usage_batch` calls.
#[async_trait]
pub trait TokenStore: Send + Sync {
	async fn get_by_token(&self, token: &str) -> Result<Token, StoreError>;

	async fn create(&self, token: Token) -> Result<Token, StoreError>;

	async fn update(&self, token: &str, f: Box<dyn for<'a> FnOnce(&'a mut Token) + Send + 'static>) -> Result<Token, StoreError>;

	async fn revoke(&self, token: &str) -> Result<Token, StoreError>;

	/// Revokes every token in `tokens`; missing tokens are skipped rather
	/// than failing the whole batch. Returns how many were actually revoked.
	async fn revoke_batch(&self, tokens: &[String]) -> Result<usize, StoreError>;

	async fn revoke_project(&self, project_id: Uuid) -> Result<usize, StoreError>;

	/// Revokes every active token whose `expires_at` is at or before `now`.
	/// Returns the revoked tokens so the caller can audit-log them.
	async fn revoke_expired(&self, now: DateTime<Utc>) -> Result<Vec<Token>, StoreError>;

	/// Applies usage deltas in one pass. Missing tokens are silently
	/// dropped (they may have been deleted since the usage was recorded).
	async fn increment_usage_batch(&self, deltas: &[(String, u64)], now: DateTime<Utc>) -> Result<(), StoreError>;

	/// Same contract as `increment_usage_batch` but updates `cache_hit_count`
	/// instead, and does not touch `last_used_at`.
	async fn increment_cache_hit_batch(&self, deltas: &[(String, u64)]) -> Result<(), StoreError>;

	async fn delete(&self, token: &str) -> Result<(), StoreError>;

	async fn list_for_project(&self, project_id: Uuid) -> Result<Vec<Token>, StoreError>;
}
