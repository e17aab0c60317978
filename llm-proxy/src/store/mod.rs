//! Persistent state: projects, tokens, and the audit trail.
//!
//! `TokenStore` and `ProjectStore` are traits rather than concrete types so
//! the proxy can run against either the embedded single-file backend
//! ([`embedded::EmbeddedStore`]), for a single-instance deployment, or a
//! networked SQL-backed implementation ([`sql::SqlStore`]), for a
//! multi-instance deployment where every replica must see the same
//! project/token state. `Config::store_backend` picks between them.

pub mod audit;
pub mod embedded;
pub mod migrations;
pub mod model;
pub mod project_store;
pub mod sql;
pub mod token_store;

pub use model::{AuditAction, AuditEvent, Project, Token};
pub use project_store::ProjectStore;
pub use token_store::TokenStore;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
	#[error("not found")]
	NotFound,
	#[error("unique constraint violated: {0}")]
	UniqueConflict(String),
	#[error("transient backend error: {0}")]
	Transient(String),
}
