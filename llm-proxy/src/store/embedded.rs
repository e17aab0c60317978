//! A single-file embedded store: all state lives in memory behind one
//! `parking_lot::RwLock`, mutations are applied synchronously, and a
//! background task serializes the whole snapshot to disk after each
//! mutation so the process can restart without losing state. This is the
//! "no external database" deployment mode; a networked SQL store can
//! implement [`TokenStore`]/[`ProjectStore`] the same way for the
//! multi-instance deployment mode.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{Project, ProjectStore, StoreError, Token, TokenStore};

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
	projects: HashMap<Uuid, Project>,
	tokens: HashMap<String, Token>,
}

pub struct EmbeddedStore {
	inner: Arc<RwLock<Snapshot>>,
	flush_tx: Option<mpsc::UnboundedSender<()>>,
}

impl EmbeddedStore {
	/// In-memory only, no persistence; used in tests.
	pub fn in_memory() -> Self {
		EmbeddedStore {
			inner: Arc::new(RwLock::new(Snapshot::default())),
			flush_tx: None,
		}
	}

	/// Loads `path` if it exists, then spawns a background task that
	/// re-serializes the snapshot to `path` (via a temp file + rename)
	/// whenever a mutation signals the flush channel.
	pub async fn open(path: PathBuf) -> anyhow::Result<Self> {
		let snapshot = match tokio::fs::read(&path).await {
			Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
			Err(e) => return Err(e.into()),
		};
		let inner = Arc::new(RwLock::new(snapshot));
		let (flush_tx, mut flush_rx) = mpsc::unbounded_channel::<()>();

		let flush_inner = inner.clone();
		let flush_path = path.clone();
		tokio::spawn(async move {
			while flush_rx.recv().await.is_some() {
				// Drain any additional pending signals so a burst of
				// mutations coalesces into a single write.
				while flush_rx.try_recv().is_ok() {}
				let bytes = {
					let guard = flush_inner.read();
					serde_json::to_vec_pretty(&*guard)
				};
				let bytes = match bytes {
					Ok(b) => b,
					Err(e) => {
						tracing::error!(error = %e, "failed to serialize store snapshot");
						continue;
					}
				};
				let tmp = flush_path.with_extension("tmp");
				if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
					tracing::error!(error = %e, "failed to write store snapshot");
					continue;
				}
				if let Err(e) = tokio::fs::rename(&tmp, &flush_path).await {
					tracing::error!(error = %e, "failed to install store snapshot");
				}
			}
		});

		Ok(EmbeddedStore {
			inner,
			flush_tx: Some(flush_tx),
		})
	}

	fn signal_flush(&self) {
		if let Some(tx) = &self.flush_tx {
			let _ = tx.send(());
		}
	}
}

#[async_trait]
impl TokenStore for EmbeddedStore {
	async fn get_by_token(&self, token: &str) -> Result<Token, StoreError> {
		self.inner
			.read()
			.tokens
			.get(token)
			.cloned()
			.ok_or(StoreError::NotFound)
	}

	async fn create(&self, token: Token) -> Result<Token, StoreError> {
		let mut guard = self.inner.write();
		if guard.tokens.contains_key(&token.token) {
			return Err(StoreError::UniqueConflict(token.token.clone()));
		}
		guard.tokens.insert(token.token.clone(), token.clone());
		drop(guard);
		self.signal_flush();
		Ok(token)
	}

	async fn update(&self, token: &str, f: Box<dyn for<'a> FnOnce(&'a mut Token) + Send + 'static>) -> Result<Token, StoreError> {
		let out = {
			let mut guard = self.inner.write();
			let row = guard.tokens.get_mut(token).ok_or(StoreError::NotFound)?;
			f(row);
			row.clone()
		};
		self.signal_flush();
		Ok(out)
	}

	async fn revoke(&self, token: &str) -> Result<Token, StoreError> {
		TokenStore::update(
			self,
			token,
			Box::new(|t| {
				if t.is_active {
					t.is_active = false;
					t.deactivated_at = Some(Utc::now());
				}
			}),
		)
		.await
	}

	async fn revoke_batch(&self, tokens: &[String]) -> Result<usize, StoreError> {
		let mut guard = self.inner.write();
		let mut count = 0;
		let now = Utc::now();
		for token in tokens {
			if let Some(row) = guard.tokens.get_mut(token) {
				if row.is_active {
					row.is_active = false;
					row.deactivated_at = Some(now);
					count += 1;
				}
			}
		}
		drop(guard);
		if count > 0 {
			self.signal_flush();
		}
		Ok(count)
	}

	async fn revoke_project(&self, project_id: Uuid) -> Result<usize, StoreError> {
		let mut guard = self.inner.write();
		let now = Utc::now();
		let mut count = 0;
		for row in guard.tokens.values_mut() {
			if row.project_id == project_id && row.is_active {
				row.is_active = false;
				row.deactivated_at = Some(now);
				count += 1;
			}
		}
		drop(guard);
		if count > 0 {
			self.signal_flush();
		}
		Ok(count)
	}

	async fn revoke_expired(&self, now: DateTime<Utc>) -> Result<Vec<Token>, StoreError> {
		let mut guard = self.inner.write();
		let mut revoked = Vec::new();
		for row in guard.tokens.values_mut() {
			if row.is_active && row.is_expired(now) {
				row.is_active = false;
				row.deactivated_at = Some(now);
				revoked.push(row.clone());
			}
		}
		drop(guard);
		if !revoked.is_empty() {
			self.signal_flush();
		}
		Ok(revoked)
	}

	async fn increment_usage_batch(&self, deltas: &[(String, u64)], now: DateTime<Utc>) -> Result<(), StoreError> {
		let mut guard = self.inner.write();
		for (token, delta) in deltas {
			if let Some(row) = guard.tokens.get_mut(token) {
				row.request_count += delta;
				if row.last_used_at.map_or(true, |last| last < now) {
					row.last_used_at = Some(now);
				}
			}
		}
		drop(guard);
		if !deltas.is_empty() {
			self.signal_flush();
		}
		Ok(())
	}

	async fn increment_cache_hit_batch(&self, deltas: &[(String, u64)]) -> Result<(), StoreError> {
		let mut guard = self.inner.write();
		for (token, delta) in deltas {
			if let Some(row) = guard.tokens.get_mut(token) {
				row.cache_hit_count += delta;
			}
		}
		drop(guard);
		if !deltas.is_empty() {
			self.signal_flush();
		}
		Ok(())
	}

	async fn delete(&self, token: &str) -> Result<(), StoreError> {
		let removed = self.inner.write().tokens.remove(token).is_some();
		if !removed {
			return Err(StoreError::NotFound);
		}
		self.signal_flush();
		Ok(())
	}

	async fn list_for_project(&self, project_id: Uuid) -> Result<Vec<Token>, StoreError> {
		Ok(self
			.inner
			.read()
			.tokens
			.values()
			.filter(|t| t.project_id == project_id)
			.cloned()
			.collect())
	}
}

#[async_trait]
impl ProjectStore for EmbeddedStore {
	async fn get(&self, id: Uuid) -> Result<Project, StoreError> {
		self.inner.read().projects.get(&id).cloned().ok_or(StoreError::NotFound)
	}

	async fn get_by_name(&self, name: &str) -> Result<Project, StoreError> {
		self.inner
			.read()
			.projects
			.values()
			.find(|p| p.name == name)
			.cloned()
			.ok_or(StoreError::NotFound)
	}

	async fn create(&self, project: Project) -> Result<Project, StoreError> {
		let mut guard = self.inner.write();
		if guard.projects.values().any(|p| p.name == project.name) {
			return Err(StoreError::UniqueConflict(project.name.clone()));
		}
		guard.projects.insert(project.id, project.clone());
		drop(guard);
		self.signal_flush();
		Ok(project)
	}

	async fn update(&self, id: Uuid, f: Box<dyn for<'a> FnOnce(&'a mut Project) + Send + 'static>) -> Result<Project, StoreError> {
		let out = {
			let mut guard = self.inner.write();
			let row = guard.projects.get_mut(&id).ok_or(StoreError::NotFound)?;
			f(row);
			row.updated_at = Utc::now();
			row.clone()
		};
		self.signal_flush();
		Ok(out)
	}

	async fn deactivate(&self, id: Uuid) -> Result<Project, StoreError> {
		ProjectStore::update(
			self,
			id,
			Box::new(|p| {
				if p.is_active {
					p.is_active = false;
					p.deactivated_at = Some(Utc::now());
				}
			}),
		)
		.await
	}

	async fn list(&self) -> Result<Vec<Project>, StoreError> {
		Ok(self.inner.read().projects.values().cloned().collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn create_and_fetch_round_trips() {
		let store = EmbeddedStore::in_memory();
		let project = Project::new("acme".into(), "key-123".into());
		ProjectStore::create(&store, project.clone()).await.unwrap();
		let fetched = ProjectStore::get(&store, project.id).await.unwrap();
		assert_eq!(fetched.name, "acme");

		let token = Token::new(project.id, None, None);
		TokenStore::create(&store, token.clone()).await.unwrap();
		let fetched = store.get_by_token(&token.token).await.unwrap();
		assert_eq!(fetched.project_id, project.id);
	}

	#[tokio::test]
	async fn duplicate_project_name_conflicts() {
		let store = EmbeddedStore::in_memory();
		ProjectStore::create(&store, Project::new("acme".into(), "a".into())).await.unwrap();
		let err = ProjectStore::create(&store, Project::new("acme".into(), "b".into()))
			.await
			.unwrap_err();
		assert!(matches!(err, StoreError::UniqueConflict(_)));
	}

	#[tokio::test]
	async fn revoke_project_revokes_all_its_tokens() {
		let store = EmbeddedStore::in_memory();
		let project = Project::new("acme".into(), "key".into());
		ProjectStore::create(&store, project.clone()).await.unwrap();
		let t1 = Token::new(project.id, None, None);
		let t2 = Token::new(project.id, None, None);
		TokenStore::create(&store, t1.clone()).await.unwrap();
		TokenStore::create(&store, t2.clone()).await.unwrap();

		let count = store.revoke_project(project.id).await.unwrap();
		assert_eq!(count, 2);
		assert!(!store.get_by_token(&t1.token).await.unwrap().is_active);
	}

	#[tokio::test]
	async fn revoking_an_already_revoked_token_is_idempotent() {
		let store = EmbeddedStore::in_memory();
		let project = Project::new("acme".into(), "key".into());
		ProjectStore::create(&store, project.clone()).await.unwrap();
		let token = Token::new(project.id, None, None);
		TokenStore::create(&store, token.clone()).await.unwrap();

		let first = store.revoke(&token.token).await.unwrap();
		let deactivated_at = first.deactivated_at.unwrap();
		let second = store.revoke(&token.token).await.unwrap();
		assert_eq!(second.deactivated_at.unwrap(), deactivated_at);
	}

	#[tokio::test]
	async fn increment_usage_batch_does_not_move_last_used_at_backwards() {
		let store = EmbeddedStore::in_memory();
		let project = Project::new("acme".into(), "key".into());
		ProjectStore::create(&store, project.clone()).await.unwrap();
		let token = Token::new(project.id, None, None);
		TokenStore::create(&store, token.clone()).await.unwrap();

		let later = Utc::now();
		let earlier = later - chrono::Duration::seconds(30);
		store.increment_usage_batch(&[(token.token.clone(), 1)], later).await.unwrap();
		store.increment_usage_batch(&[(token.token.clone(), 1)], earlier).await.unwrap();

		let fetched = store.get_by_token(&token.token).await.unwrap();
		assert_eq!(fetched.last_used_at.unwrap(), later);
	}

	#[tokio::test]
	async fn increment_usage_batch_skips_missing_tokens() {
		let store = EmbeddedStore::in_memory();
		let project = Project::new("acme".into(), "key".into());
		ProjectStore::create(&store, project.clone()).await.unwrap();
		let token = Token::new(project.id, None, None);
		TokenStore::create(&store, token.clone()).await.unwrap();

		store
			.increment_usage_batch(&[(token.token.clone(), 3), ("missing".into(), 5)], Utc::now())
			.await
			.unwrap();

		let fetched = store.get_by_token(&token.token).await.unwrap();
		assert_eq!(fetched.request_count, 3);
	}
}
