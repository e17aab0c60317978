use async_trait::async_trait;
use uuid::Uuid;

use super::{Project, StoreError};

/// The project half of the persisted state. `name` is unique; creating a
/// second project with a name already in use is a `UniqueConflict`.
#[async_trait]
pub trait ProjectStore: Send + Sync {
	async fn get(&self, id: Uuid) -> Result<Project, StoreError>;

	async fn get_by_name(&self, name: &str) -> Result<Project, StoreError>;

	async fn create(&self, project: Project) -> Result<Project, StoreError>;

	async fn update(&self, id: Uuid, f: Box<dyn for<'a> FnOnce(&'a mut Project) + Send + 'static>) -> Result<Project, StoreError>;

	async fn deactivate(&self, id: Uuid) -> Result<Project, StoreError>;

	async fn list(&self) -> Result<Vec<Project>, StoreError>;
}
