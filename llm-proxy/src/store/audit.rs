//! Append-only audit trail. Every mutation to a project or token is
//! recorded here in addition to (optionally) the primary store, so the
//! audit log survives even if the store backend is swapped out.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::model::AuditEvent;

#[async_trait]
pub trait AuditSink: Send + Sync {
	async fn append(&self, event: &AuditEvent) -> anyhow::Result<()>;
}

/// No-op sink for deployments with auditing disabled.
pub struct NullAuditSink;

#[async_trait]
impl AuditSink for NullAuditSink {
	async fn append(&self, _event: &AuditEvent) -> anyhow::Result<()> {
		Ok(())
	}
}

/// Fans one event out to every sink in order. Used when `audit.store_in_db`
/// is set alongside a file sink, so the audit trail survives either the log
/// file or the database being unavailable independently.
pub struct CompositeAuditSink(pub Vec<std::sync::Arc<dyn AuditSink>>);

#[async_trait]
impl AuditSink for CompositeAuditSink {
	async fn append(&self, event: &AuditEvent) -> anyhow::Result<()> {
		for sink in &self.0 {
			sink.append(event).await?;
		}
		Ok(())
	}
}

/// Writes into the `audit_log` table of the same database backing
/// [`super::sql::SqlStore`], for deployments with `audit.store_in_db`.
pub struct SqlAuditSink {
	pool: PgPool,
}

impl SqlAuditSink {
	pub fn new(pool: PgPool) -> Self {
		SqlAuditSink { pool }
	}
}

#[async_trait]
impl AuditSink for SqlAuditSink {
	async fn append(&self, event: &AuditEvent) -> anyhow::Result<()> {
		sqlx::query(
			r#"
			INSERT INTO audit_log (id, action, project_id, token, actor, detail, occurred_at)
			VALUES ($1, $2, $3, $4, $5, $6, $7)
			"#,
		)
		.bind(event.id)
		.bind(event.action.as_str())
		.bind(event.project_id)
		.bind(&event.token)
		.bind(&event.actor)
		.bind(&event.detail)
		.bind(event.occurred_at)
		.execute(&self.pool)
		.await?;
		Ok(())
	}
}

/// Appends one JSON object per line to `path`, rotating to `path.1`,
/// `path.2`, ... once the file exceeds `max_file_bytes`, keeping at most
/// `max_backups` rotated files.
pub struct JsonlAuditSink {
	path: PathBuf,
	max_file_bytes: u64,
	max_backups: usize,
	state: Mutex<()>,
}

impl JsonlAuditSink {
	pub fn new(path: PathBuf, max_file_bytes: u64, max_backups: usize) -> Self {
		JsonlAuditSink {
			path,
			max_file_bytes,
			max_backups,
			state: Mutex::new(()),
		}
	}

	async fn rotate_if_needed(&self) -> anyhow::Result<()> {
		let size = match tokio::fs::metadata(&self.path).await {
			Ok(meta) => meta.len(),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
			Err(e) => return Err(e.into()),
		};
		if size < self.max_file_bytes {
			return Ok(());
		}
		for i in (1..self.max_backups).rev() {
			let from = backup_path(&self.path, i);
			let to = backup_path(&self.path, i + 1);
			if tokio::fs::metadata(&from).await.is_ok() {
				let _ = tokio::fs::rename(&from, &to).await;
			}
		}
		let first_backup = backup_path(&self.path, 1);
		tokio::fs::rename(&self.path, &first_backup).await?;
		Ok(())
	}
}

fn backup_path(base: &Path, index: usize) -> PathBuf {
	let mut os = base.as_os_str().to_owned();
	os.push(format!(".{index}"));
	PathBuf::from(os)
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
	async fn append(&self, event: &AuditEvent) -> anyhow::Result<()> {
		let _guard = self.state.lock().await;
		self.rotate_if_needed().await?;
		let mut line = serde_json::to_vec(event)?;
		line.push(b'\n');
		let mut file = OpenOptions::new().create(true).append(true).open(&self.path).await?;
		file.write_all(&line).await?;
		file.flush().await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::model::AuditAction;

	#[tokio::test]
	async fn appends_one_line_per_event() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("audit.jsonl");
		let sink = JsonlAuditSink::new(path.clone(), 1024 * 1024, 3);
		sink.append(&AuditEvent::new(AuditAction::ProjectCreated, "admin")).await.unwrap();
		sink.append(&AuditEvent::new(AuditAction::TokenCreated, "admin")).await.unwrap();

		let contents = tokio::fs::read_to_string(&path).await.unwrap();
		assert_eq!(contents.lines().count(), 2);
	}

	#[tokio::test]
	async fn rotates_when_file_exceeds_limit() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("audit.jsonl");
		let sink = JsonlAuditSink::new(path.clone(), 64, 2);
		for _ in 0..10 {
			sink.append(&AuditEvent::new(AuditAction::TokenCreated, "admin")).await.unwrap();
		}
		assert!(tokio::fs::metadata(backup_path(&path, 1)).await.is_ok());
	}
}
