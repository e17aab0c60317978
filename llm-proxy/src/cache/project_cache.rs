//! C3: project lookup cache with the same policy as the token cache.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::store::{Project, ProjectStore, StoreError};

use super::lru::TtlLru;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProjectLookupError {
	#[error("project not found")]
	NotFound,
	#[error("transient backend error: {0}")]
	Transient(String),
}

pub struct ProjectCache {
	store: Arc<dyn ProjectStore>,
	cache: TtlLru<Uuid, Project>,
}

impl ProjectCache {
	pub fn new(store: Arc<dyn ProjectStore>, capacity: usize, ttl: Duration) -> Self {
		ProjectCache {
			store,
			cache: TtlLru::new(capacity, ttl),
		}
	}

	async fn get(&self, project_id: Uuid) -> Result<Project, ProjectLookupError> {
		if let Some(project) = self.cache.get(&project_id) {
			return Ok(project);
		}
		let project = self.store.get(project_id).await.map_err(|e| match e {
			StoreError::NotFound => ProjectLookupError::NotFound,
			StoreError::Transient(msg) | StoreError::UniqueConflict(msg) => ProjectLookupError::Transient(msg),
		})?;
		self.cache.insert(project_id, project.clone());
		Ok(project)
	}

	pub async fn get_api_key(&self, project_id: Uuid) -> Result<String, ProjectLookupError> {
		self.get(project_id).await.map(|p| p.api_key)
	}

	pub async fn get_active(&self, project_id: Uuid) -> Result<bool, ProjectLookupError> {
		self.get(project_id).await.map(|p| p.is_active)
	}

	/// Call after any mutation to `project_id` made through this process so
	/// subsequent reads see the change immediately rather than waiting out
	/// the TTL.
	pub fn invalidate(&self, project_id: &Uuid) {
		self.cache.invalidate(project_id);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::embedded::EmbeddedStore;

	#[tokio::test]
	async fn unknown_project_is_not_found() {
		let store = Arc::new(EmbeddedStore::in_memory());
		let cache = ProjectCache::new(store, 16, Duration::from_secs(60));
		let err = cache.get_active(Uuid::new_v4()).await.unwrap_err();
		assert!(matches!(err, ProjectLookupError::NotFound));
	}

	#[tokio::test]
	async fn invalidate_forces_a_fresh_read() {
		let store = Arc::new(EmbeddedStore::in_memory());
		let project = Project::new("acme".into(), "key-1".into());
		ProjectStore::create(store.as_ref(), project.clone()).await.unwrap();

		let cache = ProjectCache::new(store.clone(), 16, Duration::from_secs(60));
		assert_eq!(cache.get_api_key(project.id).await.unwrap(), "key-1");

		ProjectStore::update(
			store.as_ref(),
			project.id,
			Box::new(|p| p.api_key = "key-2".into()),
		)
		.await
		.unwrap();

		// Still sees the stale cached value until invalidated.
		assert_eq!(cache.get_api_key(project.id).await.unwrap(), "key-1");
		cache.invalidate(&project.id);
		assert_eq!(cache.get_api_key(project.id).await.unwrap(), "key-2");
	}
}
