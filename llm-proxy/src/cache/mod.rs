pub mod lru;
pub mod project_cache;
pub mod token_cache;

pub use project_cache::{ProjectCache, ProjectLookupError};
pub use token_cache::{TokenCache, ValidateError};
